// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command attributes: how many handles precede the parameters and which of
//! them require authorization.

use crate::tpm20proto::CommandCodeEnum;

/// Number of handles in the command and in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleCounts {
    pub command: usize,
    pub response: usize,
}

/// Authorization role required for a command handle, per the "Auth Role"
/// column of TPM 2.0 Part 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRole {
    /// The handle does not require authorization.
    None,
    /// `USER`: authorization value, policy, or HMAC session.
    User,
}

/// Source of command attributes, queried once per encode.
pub trait CommandPolicy: Send + Sync {
    /// Handle counts for `command_code`, or `None` when the command is unknown.
    fn handle_counts(&self, command_code: u32) -> Option<HandleCounts>;

    /// Role of the command handle at `handle_index`. Unknown commands and
    /// out-of-range indices have no role.
    fn auth_role(&self, command_code: u32, handle_index: usize) -> AuthRole;
}

struct PolicyEntry {
    command_code: CommandCodeEnum,
    /// One role per command handle.
    roles: &'static [AuthRole],
    response_handles: usize,
}

const fn entry(
    command_code: CommandCodeEnum,
    roles: &'static [AuthRole],
    response_handles: usize,
) -> PolicyEntry {
    PolicyEntry {
        command_code,
        roles,
        response_handles,
    }
}

use AuthRole::None as NONE;
use AuthRole::User as USER;

static DEFAULT_POLICY: &[PolicyEntry] = &[
    entry(CommandCodeEnum::Startup, &[], 0),
    entry(CommandCodeEnum::Shutdown, &[], 0),
    entry(CommandCodeEnum::SelfTest, &[], 0),
    entry(CommandCodeEnum::GetTestResult, &[], 0),
    entry(CommandCodeEnum::GetRandom, &[], 0),
    entry(CommandCodeEnum::StirRandom, &[], 0),
    entry(CommandCodeEnum::StartAuthSession, &[NONE, NONE], 1),
    entry(CommandCodeEnum::PolicyRestart, &[NONE], 0),
    entry(CommandCodeEnum::Hash, &[], 0),
    entry(CommandCodeEnum::PCR_Read, &[], 0),
    entry(CommandCodeEnum::PCR_Extend, &[USER], 0),
    entry(CommandCodeEnum::PCR_Allocate, &[USER], 0),
    entry(CommandCodeEnum::SetPrimaryPolicy, &[USER], 0),
    entry(CommandCodeEnum::Clear, &[USER], 0),
    entry(CommandCodeEnum::ClearControl, &[USER], 0),
    entry(CommandCodeEnum::HierarchyControl, &[USER], 0),
    entry(CommandCodeEnum::FlushContext, &[], 0),
    entry(CommandCodeEnum::EvictControl, &[USER, NONE], 0),
    entry(CommandCodeEnum::ReadPublic, &[NONE], 0),
    entry(CommandCodeEnum::Unseal, &[USER], 0),
    entry(CommandCodeEnum::NV_DefineSpace, &[USER], 0),
    entry(CommandCodeEnum::NV_UndefineSpace, &[USER, NONE], 0),
    entry(CommandCodeEnum::NV_ReadPublic, &[NONE], 0),
    entry(CommandCodeEnum::NV_Write, &[USER, NONE], 0),
    entry(CommandCodeEnum::NV_Read, &[USER, NONE], 0),
    // not marshaled by this layer
    entry(CommandCodeEnum::CreatePrimary, &[USER], 1),
];

/// Built-in command attribute table.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCommandPolicy;

impl DefaultCommandPolicy {
    fn find(command_code: u32) -> Option<&'static PolicyEntry> {
        DEFAULT_POLICY
            .iter()
            .find(|e| e.command_code as u32 == command_code)
    }
}

impl CommandPolicy for DefaultCommandPolicy {
    fn handle_counts(&self, command_code: u32) -> Option<HandleCounts> {
        Self::find(command_code).map(|e| HandleCounts {
            command: e.roles.len(),
            response: e.response_handles,
        })
    }

    fn auth_role(&self, command_code: u32, handle_index: usize) -> AuthRole {
        Self::find(command_code)
            .and_then(|e| e.roles.get(handle_index).copied())
            .unwrap_or(AuthRole::None)
    }
}
