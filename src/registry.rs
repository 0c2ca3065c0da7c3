// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Static table of the commands this layer can marshal.

use crate::commands::*;
use crate::error::CommandTable;
use crate::error::TssError;
use crate::marshal::MarshalError;
use crate::marshal::TpmReader;
use crate::marshal::TpmWriter;
use crate::marshal::UnmarshalError;
use crate::tpm20proto::CommandCodeEnum;
use std::fmt;

pub type EncodeFn = fn(&CommandParameters, &mut TpmWriter<'_>) -> Result<(), MarshalError>;
pub type DecodeFn = fn(&[u32], &mut TpmReader<'_>) -> Result<ResponseParameters, UnmarshalError>;
pub type ValidateFn = fn(&mut TpmReader<'_>) -> Result<(), UnmarshalError>;

/// How to marshal one command.
///
/// No encoder means the command takes no parameter structure; no decoder
/// means its response carries nothing to decode.
pub struct CommandDescriptor {
    pub command_code: CommandCodeEnum,
    pub name: &'static str,
    pub encoder: Option<EncodeFn>,
    pub decoder: Option<DecodeFn>,
    pub validator: Option<ValidateFn>,
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("command_code", &self.command_code)
            .field("name", &self.name)
            .field("encoder", &self.encoder.is_some())
            .field("decoder", &self.decoder.is_some())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

macro_rules! descriptor {
    ($cc:ident, in: $in:ident, out: $out:ident) => {
        CommandDescriptor {
            command_code: CommandCodeEnum::$cc,
            name: CommandCodeEnum::$cc.name(),
            encoder: Some(encode::<$in>),
            decoder: Some(decode::<$out>),
            validator: Some(<$in as CommandInput>::validate_parameters),
        }
    };
    ($cc:ident, in: $in:ident) => {
        CommandDescriptor {
            command_code: CommandCodeEnum::$cc,
            name: CommandCodeEnum::$cc.name(),
            encoder: Some(encode::<$in>),
            decoder: None,
            validator: Some(<$in as CommandInput>::validate_parameters),
        }
    };
    ($cc:ident, out: $out:ident) => {
        CommandDescriptor {
            command_code: CommandCodeEnum::$cc,
            name: CommandCodeEnum::$cc.name(),
            encoder: None,
            decoder: Some(decode::<$out>),
            validator: None,
        }
    };
}

static REGISTRY: &[CommandDescriptor] = &[
    descriptor!(Startup, in: StartupIn),
    descriptor!(Shutdown, in: ShutdownIn),
    descriptor!(SelfTest, in: SelfTestIn),
    descriptor!(GetTestResult, out: GetTestResultOut),
    descriptor!(GetRandom, in: GetRandomIn, out: GetRandomOut),
    descriptor!(StirRandom, in: StirRandomIn),
    descriptor!(StartAuthSession, in: StartAuthSessionIn, out: StartAuthSessionOut),
    descriptor!(PolicyRestart, in: PolicyRestartIn),
    descriptor!(Hash, in: HashIn, out: HashOut),
    descriptor!(PCR_Read, in: PcrReadIn, out: PcrReadOut),
    descriptor!(PCR_Extend, in: PcrExtendIn),
    descriptor!(PCR_Allocate, in: PcrAllocateIn, out: PcrAllocateOut),
    descriptor!(SetPrimaryPolicy, in: SetPrimaryPolicyIn),
    descriptor!(Clear, in: ClearIn),
    descriptor!(ClearControl, in: ClearControlIn),
    descriptor!(HierarchyControl, in: HierarchyControlIn),
    descriptor!(FlushContext, in: FlushContextIn),
    descriptor!(EvictControl, in: EvictControlIn),
    descriptor!(ReadPublic, in: ReadPublicIn, out: ReadPublicOut),
    descriptor!(Unseal, in: UnsealIn, out: UnsealOut),
    descriptor!(NV_DefineSpace, in: NvDefineSpaceIn),
    descriptor!(NV_UndefineSpace, in: NvUndefineSpaceIn),
    descriptor!(NV_ReadPublic, in: NvReadPublicIn, out: NvReadPublicOut),
    descriptor!(NV_Write, in: NvWriteIn),
    descriptor!(NV_Read, in: NvReadIn, out: NvReadOut),
];

/// Find the descriptor for `command_code`.
pub fn lookup(command_code: u32) -> Result<&'static CommandDescriptor, TssError> {
    REGISTRY
        .iter()
        .find(|d| d.command_code as u32 == command_code)
        .ok_or(TssError::UnknownCommand {
            command_code,
            table: CommandTable::Registry,
        })
}

/// Every registered descriptor.
pub fn descriptors() -> impl Iterator<Item = &'static CommandDescriptor> {
    REGISTRY.iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use test_log::test;

    #[test]
    fn test_lookup() {
        let descriptor = lookup(CommandCodeEnum::NV_Write as u32).unwrap();
        assert_eq!(descriptor.name, "TPM2_NV_Write");
        assert!(descriptor.encoder.is_some());
        assert!(descriptor.decoder.is_none());

        let descriptor = lookup(CommandCodeEnum::GetTestResult as u32).unwrap();
        assert!(descriptor.encoder.is_none());
        assert!(descriptor.validator.is_none());
        assert!(descriptor.decoder.is_some());
    }

    #[test]
    fn test_lookup_unknown() {
        let err = lookup(CommandCodeEnum::CreatePrimary as u32).unwrap_err();
        assert!(matches!(
            err,
            TssError::UnknownCommand {
                command_code: 0x131,
                table: CommandTable::Registry
            }
        ));
        assert!(lookup(0xffff_ffff).is_err());
    }

    #[test]
    fn test_codes_are_unique() {
        let mut seen = HashSet::new();
        for descriptor in descriptors() {
            assert!(
                seen.insert(descriptor.command_code as u32),
                "duplicate {descriptor:?}"
            );
            assert_eq!(descriptor.name, descriptor.command_code.name());
            // a validator is only meaningful next to an encoder
            assert!(descriptor.validator.is_none() || descriptor.encoder.is_some());
        }
        assert_eq!(seen.len(), 25);
    }
}
