// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM 2.0 protocol types, as defined in "Trusted Platform Module Library Part 2: Structures".

use self::packed_nums::*;
use crate::marshal::MarshalError;
use crate::marshal::TpmMarshal;
use crate::marshal::TpmReader;
use crate::marshal::TpmUnmarshal;
use crate::marshal::TpmWriter;
use crate::marshal::UnmarshalError;
use bitfield_struct::bitfield;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

#[allow(non_camel_case_types)]
pub(crate) mod packed_nums {
    pub type u16_be = zerocopy::U16<zerocopy::BigEndian>;
    pub type u32_be = zerocopy::U32<zerocopy::BigEndian>;
}

#[derive(Debug, Error)]
pub enum InvalidInput {
    #[error("input data size too large for buffer - input size > upper bound: {0} > {1}")]
    BufferSizeTooLarge(usize, usize),
    #[error("input list length too long - input length > upper bound: {0} > {1}")]
    PcrSelectionsLengthTooLong(usize, usize),
    #[error("input digest list too long - input length > upper bound: {0} > {1}")]
    DigestListTooLong(usize, usize),
    #[error("digest size {actual} does not match hash algorithm {alg:#x} digest size {expected}")]
    DigestSizeMismatch {
        alg: u16,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported hash algorithm {0:#x}")]
    UnsupportedHashAlg(u16),
}

#[repr(transparent)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct ReservedHandle(pub u32_be);

impl PartialEq<ReservedHandle> for u32 {
    fn eq(&self, other: &ReservedHandle) -> bool {
        other.0.get() == *self
    }
}

impl ReservedHandle {
    pub const fn new(kind: u8, offset: u32) -> ReservedHandle {
        ReservedHandle(new_u32_be((kind as u32) << 24 | offset))
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl From<u32> for ReservedHandle {
    fn from(x: u32) -> Self {
        ReservedHandle(x.into())
    }
}

impl TpmMarshal for ReservedHandle {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        writer.write(self)
    }
}

impl TpmUnmarshal for ReservedHandle {
    fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
        reader.read("handle")
    }
}

pub const TPM20_HT_PERMANENT: u8 = 0x40;

pub const TPM20_RH_OWNER: ReservedHandle = ReservedHandle::new(TPM20_HT_PERMANENT, 0x01);
pub const TPM20_RH_NULL: ReservedHandle = ReservedHandle::new(TPM20_HT_PERMANENT, 0x07);
pub const TPM20_RH_PLATFORM: ReservedHandle = ReservedHandle::new(TPM20_HT_PERMANENT, 0x0c);
// `TPM_RS_PW` (not `TPM_RH_PW`)
// See Table 28, Section 7.4, "Trusted Platform Module Library Part 2: Structures", revision 1.38.
pub const TPM20_RS_PW: ReservedHandle = ReservedHandle::new(TPM20_HT_PERMANENT, 0x09);

// The suggested minimal size for the buffer in `TPM2B_MAX_BUFFER`.
// See Table 79, Section 10.4.8, "Trusted Platform Module Library Part 2: Structures", revision 1.38.
pub const MAX_DIGEST_BUFFER_SIZE: usize = 1024;

/// `sizeof(TPMU_HA)`, the upper bound of `TPM2B_DIGEST`, `TPM2B_NONCE` and `TPM2B_AUTH`.
pub const MAX_HASH_SIZE: usize = 64;

/// Number of hash algorithms a TPM may implement, bounding `TPML_DIGEST_VALUES`
/// and `TPML_PCR_SELECTION`.
pub const HASH_COUNT: usize = 5;

/// Bytes in a PCR selection bitmap for a 24-PCR TPM.
pub const PCR_SELECT_MAX: usize = 3;

/// Upper bound of `TPML_DIGEST` entries.
pub const MAX_DIGEST_LIST: usize = 8;

#[repr(transparent)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct SessionTag(pub u16_be);

impl PartialEq<SessionTag> for u16 {
    fn eq(&self, other: &SessionTag) -> bool {
        other.0.get() == *self
    }
}

impl SessionTag {
    const fn new(val: u16) -> SessionTag {
        SessionTag(new_u16_be(val))
    }

    pub fn into_enum(self) -> Option<SessionTagEnum> {
        SessionTagEnum::from_u16(self.0.get())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum SessionTagEnum {
    // No structure type specified
    Null = 0x8000,

    // A command/response with no attached sessions. A failing command is
    // always answered with this tag.
    NoSessions = 0x8001,

    // A command/response with one or more attached sessions. The
    // authorization area is present.
    Sessions = 0x8002,

    // Ticket produced by `TPM2_Hash`
    Hashcheck = 0x8024,
}

impl From<SessionTagEnum> for SessionTag {
    fn from(x: SessionTagEnum) -> Self {
        SessionTag::new(x as u16)
    }
}

impl SessionTagEnum {
    pub fn from_u16(val: u16) -> Option<SessionTagEnum> {
        let ret = match val {
            0x8000 => Self::Null,
            0x8001 => Self::NoSessions,
            0x8002 => Self::Sessions,
            0x8024 => Self::Hashcheck,
            _ => return None,
        };
        Some(ret)
    }
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct CommandCode(pub u32_be);

impl PartialEq<CommandCode> for u32 {
    fn eq(&self, other: &CommandCode) -> bool {
        other.0.get() == *self
    }
}

impl CommandCode {
    const fn new(val: u32) -> CommandCode {
        CommandCode(new_u32_be(val))
    }

    pub fn into_enum(self) -> Option<CommandCodeEnum> {
        CommandCodeEnum::from_u32(self.0.get())
    }
}

#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandCodeEnum {
    EvictControl = 0x00000120,
    HierarchyControl = 0x00000121,
    NV_UndefineSpace = 0x00000122,
    Clear = 0x00000126,
    ClearControl = 0x00000127,
    NV_DefineSpace = 0x0000012a,
    PCR_Allocate = 0x0000012b,
    SetPrimaryPolicy = 0x0000012e,
    CreatePrimary = 0x00000131,
    NV_Write = 0x00000137,
    SelfTest = 0x00000143,
    Startup = 0x00000144,
    Shutdown = 0x00000145,
    StirRandom = 0x00000146,
    NV_Read = 0x0000014e,
    FlushContext = 0x00000165,
    NV_ReadPublic = 0x00000169,
    ReadPublic = 0x00000173,
    StartAuthSession = 0x00000176,
    GetTestResult = 0x0000017c,
    Hash = 0x0000017d,
    PCR_Read = 0x0000017e,
    PolicyRestart = 0x00000180,
    PCR_Extend = 0x00000182,
    GetRandom = 0x0000017b,
    Unseal = 0x0000015e,
}

impl From<CommandCodeEnum> for CommandCode {
    fn from(x: CommandCodeEnum) -> Self {
        CommandCode::new(x as u32)
    }
}

impl CommandCodeEnum {
    pub fn from_u32(val: u32) -> Option<CommandCodeEnum> {
        let ret = match val {
            0x00000120 => Self::EvictControl,
            0x00000121 => Self::HierarchyControl,
            0x00000122 => Self::NV_UndefineSpace,
            0x00000126 => Self::Clear,
            0x00000127 => Self::ClearControl,
            0x0000012a => Self::NV_DefineSpace,
            0x0000012b => Self::PCR_Allocate,
            0x0000012e => Self::SetPrimaryPolicy,
            0x00000131 => Self::CreatePrimary,
            0x00000137 => Self::NV_Write,
            0x00000143 => Self::SelfTest,
            0x00000144 => Self::Startup,
            0x00000145 => Self::Shutdown,
            0x00000146 => Self::StirRandom,
            0x0000014e => Self::NV_Read,
            0x0000015e => Self::Unseal,
            0x00000165 => Self::FlushContext,
            0x00000169 => Self::NV_ReadPublic,
            0x00000173 => Self::ReadPublic,
            0x00000176 => Self::StartAuthSession,
            0x0000017b => Self::GetRandom,
            0x0000017c => Self::GetTestResult,
            0x0000017d => Self::Hash,
            0x0000017e => Self::PCR_Read,
            0x00000180 => Self::PolicyRestart,
            0x00000182 => Self::PCR_Extend,
            _ => return None,
        };
        Some(ret)
    }

    /// Display name used in diagnostics, e.g. `TPM2_NV_Write`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::EvictControl => "TPM2_EvictControl",
            Self::HierarchyControl => "TPM2_HierarchyControl",
            Self::NV_UndefineSpace => "TPM2_NV_UndefineSpace",
            Self::Clear => "TPM2_Clear",
            Self::ClearControl => "TPM2_ClearControl",
            Self::NV_DefineSpace => "TPM2_NV_DefineSpace",
            Self::PCR_Allocate => "TPM2_PCR_Allocate",
            Self::SetPrimaryPolicy => "TPM2_SetPrimaryPolicy",
            Self::CreatePrimary => "TPM2_CreatePrimary",
            Self::NV_Write => "TPM2_NV_Write",
            Self::SelfTest => "TPM2_SelfTest",
            Self::Startup => "TPM2_Startup",
            Self::Shutdown => "TPM2_Shutdown",
            Self::StirRandom => "TPM2_StirRandom",
            Self::NV_Read => "TPM2_NV_Read",
            Self::Unseal => "TPM2_Unseal",
            Self::FlushContext => "TPM2_FlushContext",
            Self::NV_ReadPublic => "TPM2_NV_ReadPublic",
            Self::ReadPublic => "TPM2_ReadPublic",
            Self::StartAuthSession => "TPM2_StartAuthSession",
            Self::GetRandom => "TPM2_GetRandom",
            Self::GetTestResult => "TPM2_GetTestResult",
            Self::Hash => "TPM2_Hash",
            Self::PCR_Read => "TPM2_PCR_Read",
            Self::PolicyRestart => "TPM2_PolicyRestart",
            Self::PCR_Extend => "TPM2_PCR_Extend",
        }
    }
}

const FLAG_FMT1: u32 = 0x0080;
const FLAG_VER1: u32 = 0x0100;
const FLAG_WARN: u32 = 0x0800 + FLAG_VER1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResponseCode {
    Success = 0x000,
    /// Value is out of range or is not correct for the context.
    Value = FLAG_FMT1 + 0x004,
    /// Hierarchy is not enabled or is not correct for the use.
    Hierarchy = FLAG_FMT1 + 0x0005,
    /// The handle is not correct for the use.
    Handle = FLAG_FMT1 + 0x000B,
    /// The authorization HMAC check failed.
    AuthFail = FLAG_FMT1 + 0x000E,
    /// Structure is the wrong size.
    Size = FLAG_FMT1 + 0x0015,
    /// The TPM was unable to unmarshal a value because there were not
    /// enough bytes in the input buffer.
    Insufficient = FLAG_FMT1 + 0x001A,
    /// TPM is in failure mode.
    Failure = FLAG_VER1 + 0x0001,
    /// The command code is not implemented.
    CommandCode = FLAG_VER1 + 0x0043,
    /// Use of an authorization session with a context command.
    AuthContext = FLAG_VER1 + 0x0045,
    /// The NV index is used before being initialized or the state saved by
    /// TPM2_Shutdown could not be restored.
    NvUninitialized = FLAG_VER1 + 0x04A,
    /// Out of memory for session contexts.
    SessionMemory = FLAG_WARN + 0x003,
    /// The TPM is performing self tests.
    Testing = FLAG_WARN + 0x00A,
    /// Commands are not being accepted because the TPM is in DA lockout
    /// mode.
    Lockout = FLAG_WARN + 0x021,
    /// The TPM was not able to start the command. Retry might work.
    Retry = FLAG_WARN + 0x022,
}

impl ResponseCode {
    pub fn from_u32(val: u32) -> Option<ResponseCode> {
        let ret = match val {
            x if x == ResponseCode::Success as u32 => ResponseCode::Success,
            x if x == ResponseCode::Value as u32 => ResponseCode::Value,
            x if x == ResponseCode::Hierarchy as u32 => ResponseCode::Hierarchy,
            x if x == ResponseCode::Handle as u32 => ResponseCode::Handle,
            x if x == ResponseCode::AuthFail as u32 => ResponseCode::AuthFail,
            x if x == ResponseCode::Size as u32 => ResponseCode::Size,
            x if x == ResponseCode::Insufficient as u32 => ResponseCode::Insufficient,
            x if x == ResponseCode::Failure as u32 => ResponseCode::Failure,
            x if x == ResponseCode::CommandCode as u32 => ResponseCode::CommandCode,
            x if x == ResponseCode::AuthContext as u32 => ResponseCode::AuthContext,
            x if x == ResponseCode::NvUninitialized as u32 => ResponseCode::NvUninitialized,
            x if x == ResponseCode::SessionMemory as u32 => ResponseCode::SessionMemory,
            x if x == ResponseCode::Testing as u32 => ResponseCode::Testing,
            x if x == ResponseCode::Lockout as u32 => ResponseCode::Lockout,
            x if x == ResponseCode::Retry as u32 => ResponseCode::Retry,
            _ => return None,
        };
        Some(ret)
    }
}

#[repr(transparent)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct AlgId(pub u16_be);

impl PartialEq<AlgId> for u16 {
    fn eq(&self, other: &AlgId) -> bool {
        other.0.get() == *self
    }
}

impl AlgId {
    const fn new(val: u16) -> AlgId {
        AlgId(new_u16_be(val))
    }

    pub fn into_enum(self) -> Option<AlgIdEnum> {
        AlgIdEnum::from_u16(self.0.get())
    }
}

impl TpmMarshal for AlgId {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        writer.write(self)
    }
}

impl TpmUnmarshal for AlgId {
    fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
        reader.read("algorithm id")
    }
}

#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AlgIdEnum {
    RSA = 0x0001,
    SHA = 0x0004,
    AES = 0x0006,
    XOR = 0x000a,
    SHA256 = 0x000b,
    SHA384 = 0x000c,
    SHA512 = 0x000d,
    NULL = 0x0010,
    SM3_256 = 0x0012,
    CFB = 0x0043,
}

impl From<AlgIdEnum> for AlgId {
    fn from(x: AlgIdEnum) -> Self {
        AlgId::new(x as u16)
    }
}

impl AlgIdEnum {
    pub fn from_u16(val: u16) -> Option<AlgIdEnum> {
        let ret = match val {
            0x0001 => Self::RSA,
            0x0004 => Self::SHA,
            0x0006 => Self::AES,
            0x000a => Self::XOR,
            0x000b => Self::SHA256,
            0x000c => Self::SHA384,
            0x000d => Self::SHA512,
            0x0010 => Self::NULL,
            0x0012 => Self::SM3_256,
            0x0043 => Self::CFB,
            _ => return None,
        };

        Some(ret)
    }

    /// Digest size of a hash algorithm, `None` for anything else.
    pub fn digest_size(self) -> Option<usize> {
        match self {
            Self::SHA => Some(20),
            Self::SHA256 | Self::SM3_256 => Some(32),
            Self::SHA384 => Some(48),
            Self::SHA512 => Some(64),
            _ => None,
        }
    }
}

/// `TPMA_SESSION`
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct TpmaSessionBits {
    pub continue_session: bool,
    pub audit_exclusive: bool,
    pub audit_reset: bool,
    #[bits(2)]
    _reserved: u8,
    /// The first command parameter is encrypted.
    pub decrypt: bool,
    /// The first response parameter is encrypted.
    pub encrypt: bool,
    pub audit: bool,
}

/// `TPMA_NV`
#[repr(transparent)]
#[derive(Debug, Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct TpmaNv(pub u32_be);

impl TpmaNv {
    const fn new(val: u32) -> Self {
        Self(new_u32_be(val))
    }
}

impl From<TpmaNvBits> for TpmaNv {
    fn from(x: TpmaNvBits) -> Self {
        let val: u32 = x.into();
        Self::new(val)
    }
}

impl From<u32> for TpmaNv {
    fn from(x: u32) -> Self {
        Self::new(x)
    }
}

#[bitfield(u32)]
pub struct TpmaNvBits {
    pub nv_ppwrite: bool,
    pub nv_ownerwrite: bool,
    pub nv_authwrite: bool,
    pub nv_policywrite: bool,
    // bits 7:4: `TPM_NT`
    pub nt_counter: bool,
    pub nt_bits: bool,
    pub nt_extend: bool,
    _unused0: bool,
    #[bits(2)]
    _reserved1: u8,
    pub nv_policy_delete: bool,
    pub nv_writelocked: bool,
    pub nv_writeall: bool,
    pub nv_writedefine: bool,
    pub nv_write_stclear: bool,
    pub nv_globallock: bool,
    pub nv_ppread: bool,
    pub nv_ownerread: bool,
    pub nv_authread: bool,
    pub nv_policyread: bool,
    #[bits(5)]
    _reserved2: u8,
    pub nv_no_da: bool,
    pub nv_orderly: bool,
    pub nv_clear_stclear: bool,
    pub nv_readlocked: bool,
    pub nv_written: bool,
    pub nv_platformcreate: bool,
    pub nv_read_stclear: bool,
}

/// Workaround to allow constructing a zerocopy U32 in a const context.
const fn new_u32_be(val: u32) -> u32_be {
    u32_be::from_bytes(val.to_be_bytes())
}

/// Workaround to allow constructing a zerocopy U16 in a const context.
const fn new_u16_be(val: u16) -> u16_be {
    u16_be::from_bytes(val.to_be_bytes())
}

/// TPM structure definitions shared by the command parameter types.
pub mod protocol {
    use super::*;

    /// Command and response envelope headers
    pub mod common {
        use super::*;

        /// Size of either header on the wire.
        pub const HEADER_SIZE: usize = size_of::<CmdHeader>();

        #[repr(C)]
        #[derive(Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct CmdHeader {
            pub session_tag: SessionTag,
            pub size: u32_be,
            pub command_code: CommandCode,
        }

        impl CmdHeader {
            pub fn new(session_tag: SessionTag, size: u32, command_code: CommandCode) -> CmdHeader {
                CmdHeader {
                    session_tag,
                    size: size.into(),
                    command_code,
                }
            }
        }

        #[repr(C)]
        #[derive(Debug, IntoBytes, Immutable, KnownLayout, FromBytes)]
        pub struct ReplyHeader {
            pub session_tag: u16_be,
            pub size: u32_be,
            pub response_code: u32_be,
        }
    }

    /// `TPM_SU`
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum StartupType {
        Clear,
        State,
    }

    impl TpmMarshal for StartupType {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            writer.write_u16(match self {
                StartupType::Clear => 0,
                StartupType::State => 1,
            })
        }
    }

    impl TpmUnmarshal for StartupType {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            match reader.read_u16("startup type")? {
                0 => Ok(StartupType::Clear),
                1 => Ok(StartupType::State),
                value => Err(UnmarshalError::InvalidValue {
                    what: "startup type",
                    value: value.into(),
                }),
            }
        }
    }

    /// `TPM_SE`
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum SessionType {
        Hmac,
        Policy,
        Trial,
    }

    impl TpmMarshal for SessionType {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            writer.write_u8(match self {
                SessionType::Hmac => 0x00,
                SessionType::Policy => 0x01,
                SessionType::Trial => 0x03,
            })
        }
    }

    impl TpmUnmarshal for SessionType {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            match reader.read_u8("session type")? {
                0x00 => Ok(SessionType::Hmac),
                0x01 => Ok(SessionType::Policy),
                0x03 => Ok(SessionType::Trial),
                value => Err(UnmarshalError::InvalidValue {
                    what: "session type",
                    value: value.into(),
                }),
            }
        }
    }

    /// General type for TPM 2.0 sized buffers.
    #[repr(C)]
    #[derive(Debug, Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, PartialEq, Eq)]
    pub struct Tpm2bBuffer {
        pub size: u16_be,
        // Use value that is large enough as the buffer size so that we
        // only need to define one struct.
        pub buffer: [u8; MAX_DIGEST_BUFFER_SIZE],
    }

    impl Default for Tpm2bBuffer {
        fn default() -> Self {
            Self::new_zeroed()
        }
    }

    impl Tpm2bBuffer {
        /// Create a `Tpm2bBuffer` from a slice.
        pub fn new(data: &[u8]) -> Result<Self, InvalidInput> {
            let size = data.len();
            if size > MAX_DIGEST_BUFFER_SIZE {
                Err(InvalidInput::BufferSizeTooLarge(
                    size,
                    MAX_DIGEST_BUFFER_SIZE,
                ))?
            }

            let mut buffer = [0u8; MAX_DIGEST_BUFFER_SIZE];
            buffer[..size].copy_from_slice(data);

            Ok(Self {
                size: new_u16_be(size as u16),
                buffer,
            })
        }

        /// The payload, clamped to the buffer in case `size` was set directly.
        pub fn data(&self) -> &[u8] {
            let size = (self.size.get() as usize).min(MAX_DIGEST_BUFFER_SIZE);
            &self.buffer[..size]
        }

        pub fn payload_size(&self) -> usize {
            size_of_val(&self.size) + self.data().len()
        }

        /// Marshal as a `TPM2B` whose payload is bounded by `max`.
        pub fn marshal_bounded(
            &self,
            writer: &mut TpmWriter<'_>,
            what: &'static str,
            max: usize,
        ) -> Result<(), MarshalError> {
            if self.size.get() as usize > MAX_DIGEST_BUFFER_SIZE {
                Err(MarshalError::SizeTooLarge {
                    what,
                    size: self.size.get().into(),
                    max: max.min(MAX_DIGEST_BUFFER_SIZE),
                })?
            }
            writer.write_sized(what, self.data(), max)
        }

        /// Unmarshal a `TPM2B` whose payload is bounded by `max`.
        pub fn unmarshal_bounded(
            reader: &mut TpmReader<'_>,
            what: &'static str,
            max: usize,
        ) -> Result<Self, UnmarshalError> {
            let max = max.min(MAX_DIGEST_BUFFER_SIZE);
            let data = reader.read_sized(what, max)?;
            let mut buffer = [0u8; MAX_DIGEST_BUFFER_SIZE];
            buffer[..data.len()].copy_from_slice(data);
            Ok(Self {
                size: new_u16_be(data.len() as u16),
                buffer,
            })
        }
    }

    impl TpmMarshal for Tpm2bBuffer {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            self.marshal_bounded(writer, "TPM2B buffer", MAX_DIGEST_BUFFER_SIZE)
        }
    }

    impl TpmUnmarshal for Tpm2bBuffer {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            Self::unmarshal_bounded(reader, "TPM2B buffer", MAX_DIGEST_BUFFER_SIZE)
        }
    }

    /// `TPMS_PCR_SELECTION`
    #[repr(C)]
    #[derive(Debug, Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, PartialEq, Eq)]
    pub struct PcrSelection {
        pub hash: AlgId,
        pub size_of_select: u8,
        pub bitmap: [u8; PCR_SELECT_MAX],
    }

    impl PcrSelection {
        /// Select the PCRs of `hash` whose bits are set in `pcr_mask`.
        pub fn new(hash: AlgIdEnum, pcr_mask: u32) -> Self {
            let bytes = pcr_mask.to_le_bytes();
            Self {
                hash: hash.into(),
                size_of_select: PCR_SELECT_MAX as u8,
                bitmap: [bytes[0], bytes[1], bytes[2]],
            }
        }

        pub fn payload_size(&self) -> usize {
            let mut payload_size = 0;

            payload_size += size_of_val(&self.hash);
            payload_size += size_of_val(&self.size_of_select);
            payload_size += self.size_of_select as usize;

            payload_size
        }
    }

    impl TpmMarshal for PcrSelection {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            let size_of_select = self.size_of_select as usize;
            if size_of_select > PCR_SELECT_MAX {
                Err(MarshalError::SizeTooLarge {
                    what: "pcr select",
                    size: size_of_select,
                    max: PCR_SELECT_MAX,
                })?
            }
            writer.write(&self.hash)?;
            writer.write_u8(self.size_of_select)?;
            writer.write_bytes(&self.bitmap[..size_of_select])
        }
    }

    impl TpmUnmarshal for PcrSelection {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            let hash = AlgId::unmarshal(reader)?;
            let size_of_select = reader.read_u8("pcr select size")?;
            if size_of_select as usize > PCR_SELECT_MAX {
                Err(UnmarshalError::SizeTooLarge {
                    what: "pcr select",
                    size: size_of_select.into(),
                    max: PCR_SELECT_MAX,
                })?
            }
            let mut bitmap = [0u8; PCR_SELECT_MAX];
            bitmap[..size_of_select as usize]
                .copy_from_slice(reader.read_bytes("pcr select", size_of_select.into())?);

            Ok(Self {
                hash,
                size_of_select,
                bitmap,
            })
        }
    }

    /// `TPML_PCR_SELECTION`
    #[repr(C)]
    #[derive(Debug, Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, PartialEq, Eq)]
    pub struct TpmlPcrSelection {
        pub count: u32_be,
        pub pcr_selections: [PcrSelection; HASH_COUNT],
    }

    impl Default for TpmlPcrSelection {
        fn default() -> Self {
            Self::new_zeroed()
        }
    }

    impl TpmlPcrSelection {
        pub fn new(pcr_selections: &[PcrSelection]) -> Result<Self, InvalidInput> {
            let count = pcr_selections.len();
            if count > HASH_COUNT {
                Err(InvalidInput::PcrSelectionsLengthTooLong(count, HASH_COUNT))?
            }

            let mut base = [PcrSelection::new_zeroed(); HASH_COUNT];
            base[..count].copy_from_slice(pcr_selections);

            Ok(Self {
                count: new_u32_be(count as u32),
                pcr_selections: base,
            })
        }

        pub fn selections(&self) -> &[PcrSelection] {
            let count = (self.count.get() as usize).min(HASH_COUNT);
            &self.pcr_selections[..count]
        }
    }

    impl TpmMarshal for TpmlPcrSelection {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            let count = self.count.get() as usize;
            if count > HASH_COUNT {
                Err(MarshalError::SizeTooLarge {
                    what: "pcr selection list",
                    size: count,
                    max: HASH_COUNT,
                })?
            }
            writer.write(&self.count)?;
            for selection in self.selections() {
                selection.marshal(writer)?;
            }
            Ok(())
        }
    }

    impl TpmUnmarshal for TpmlPcrSelection {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            let count = reader.read_u32("pcr selection count")?;
            if count as usize > HASH_COUNT {
                Err(UnmarshalError::SizeTooLarge {
                    what: "pcr selection list",
                    size: count as usize,
                    max: HASH_COUNT,
                })?
            }

            let mut pcr_selections = [PcrSelection::new_zeroed(); HASH_COUNT];
            for selection in pcr_selections.iter_mut().take(count as usize) {
                *selection = PcrSelection::unmarshal(reader)?;
            }

            Ok(Self {
                count: count.into(),
                pcr_selections,
            })
        }
    }

    /// `TPML_DIGEST`
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TpmlDigest {
        pub digests: Vec<Tpm2bBuffer>,
    }

    impl TpmlDigest {
        pub fn new(digests: &[&[u8]]) -> Result<Self, InvalidInput> {
            if digests.len() > MAX_DIGEST_LIST {
                Err(InvalidInput::DigestListTooLong(digests.len(), MAX_DIGEST_LIST))?
            }
            let digests = digests
                .iter()
                .map(|d| {
                    if d.len() > MAX_HASH_SIZE {
                        Err(InvalidInput::BufferSizeTooLarge(d.len(), MAX_HASH_SIZE))
                    } else {
                        Tpm2bBuffer::new(d)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Self { digests })
        }
    }

    impl TpmMarshal for TpmlDigest {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            if self.digests.len() > MAX_DIGEST_LIST {
                Err(MarshalError::SizeTooLarge {
                    what: "digest list",
                    size: self.digests.len(),
                    max: MAX_DIGEST_LIST,
                })?
            }
            writer.write_u32(self.digests.len() as u32)?;
            for digest in &self.digests {
                digest.marshal_bounded(writer, "digest", MAX_HASH_SIZE)?;
            }
            Ok(())
        }
    }

    impl TpmUnmarshal for TpmlDigest {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            let count = reader.read_u32("digest count")? as usize;
            if count > MAX_DIGEST_LIST {
                Err(UnmarshalError::SizeTooLarge {
                    what: "digest list",
                    size: count,
                    max: MAX_DIGEST_LIST,
                })?
            }
            let digests = (0..count)
                .map(|_| Tpm2bBuffer::unmarshal_bounded(reader, "digest", MAX_HASH_SIZE))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Self { digests })
        }
    }

    /// `TPMT_HA`, a digest tagged with its hash algorithm.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TpmtHa {
        hash_alg: AlgIdEnum,
        digest: [u8; MAX_HASH_SIZE],
    }

    impl TpmtHa {
        pub fn new(hash_alg: AlgIdEnum, digest: &[u8]) -> Result<Self, InvalidInput> {
            let expected = hash_alg
                .digest_size()
                .ok_or(InvalidInput::UnsupportedHashAlg(hash_alg as u16))?;
            if digest.len() != expected {
                Err(InvalidInput::DigestSizeMismatch {
                    alg: hash_alg as u16,
                    expected,
                    actual: digest.len(),
                })?
            }
            let mut buffer = [0u8; MAX_HASH_SIZE];
            buffer[..expected].copy_from_slice(digest);
            Ok(Self {
                hash_alg,
                digest: buffer,
            })
        }

        pub fn hash_alg(&self) -> AlgIdEnum {
            self.hash_alg
        }

        pub fn digest(&self) -> &[u8] {
            // `new` only accepts hash algorithms
            let size = self.hash_alg.digest_size().unwrap_or(0);
            &self.digest[..size]
        }
    }

    impl TpmMarshal for TpmtHa {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            writer.write(&AlgId::from(self.hash_alg))?;
            writer.write_bytes(self.digest())
        }
    }

    impl TpmUnmarshal for TpmtHa {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            let alg = reader.read_u16("hash algorithm")?;
            let invalid = UnmarshalError::InvalidValue {
                what: "hash algorithm",
                value: alg.into(),
            };
            let hash_alg = AlgIdEnum::from_u16(alg).ok_or(invalid)?;
            let size = hash_alg.digest_size().ok_or(UnmarshalError::InvalidValue {
                what: "hash algorithm",
                value: alg.into(),
            })?;
            let mut digest = [0u8; MAX_HASH_SIZE];
            digest[..size].copy_from_slice(reader.read_bytes("digest", size)?);
            Ok(Self { hash_alg, digest })
        }
    }

    /// `TPML_DIGEST_VALUES`
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TpmlDigestValues {
        pub digests: Vec<TpmtHa>,
    }

    impl TpmlDigestValues {
        pub fn new(digests: &[TpmtHa]) -> Result<Self, InvalidInput> {
            if digests.len() > HASH_COUNT {
                Err(InvalidInput::DigestListTooLong(digests.len(), HASH_COUNT))?
            }
            Ok(Self {
                digests: digests.to_vec(),
            })
        }
    }

    impl TpmMarshal for TpmlDigestValues {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            if self.digests.len() > HASH_COUNT {
                Err(MarshalError::SizeTooLarge {
                    what: "digest values",
                    size: self.digests.len(),
                    max: HASH_COUNT,
                })?
            }
            writer.write_u32(self.digests.len() as u32)?;
            for digest in &self.digests {
                digest.marshal(writer)?;
            }
            Ok(())
        }
    }

    impl TpmUnmarshal for TpmlDigestValues {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            let count = reader.read_u32("digest values count")? as usize;
            if count > HASH_COUNT {
                Err(UnmarshalError::SizeTooLarge {
                    what: "digest values",
                    size: count,
                    max: HASH_COUNT,
                })?
            }
            let digests = (0..count)
                .map(|_| TpmtHa::unmarshal(reader))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Self { digests })
        }
    }

    /// `TPMT_SYM_DEF`
    #[repr(C)]
    #[derive(Debug, Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, PartialEq, Eq)]
    pub struct TpmtSymDef {
        algorithm: AlgId,
        key_bits: u16_be,
        mode: AlgId,
    }

    impl TpmtSymDef {
        pub fn new(algorithm: AlgId, key_bits: Option<u16>, mode: Option<AlgId>) -> Self {
            let key_bits = key_bits.map_or_else(|| new_u16_be(0), |v| v.into());
            let mode = mode.map_or_else(|| AlgId::new(0), |v| v);

            Self {
                algorithm,
                key_bits,
                mode,
            }
        }

        /// No parameter encryption.
        pub fn null() -> Self {
            Self::new(AlgIdEnum::NULL.into(), None, None)
        }

        pub fn algorithm(&self) -> AlgId {
            self.algorithm
        }
    }

    impl TpmMarshal for TpmtSymDef {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            writer.write(&self.algorithm)?;
            match self.algorithm.into_enum() {
                // No parameters when algorithm is NULL
                Some(AlgIdEnum::NULL) => Ok(()),
                // XOR carries a hash algorithm in place of key bits and no mode
                Some(AlgIdEnum::XOR) => writer.write(&self.key_bits),
                _ => {
                    writer.write(&self.key_bits)?;
                    writer.write(&self.mode)
                }
            }
        }
    }

    impl TpmUnmarshal for TpmtSymDef {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            let algorithm = AlgId::unmarshal(reader)?;
            let (key_bits, mode) = match algorithm.into_enum() {
                Some(AlgIdEnum::NULL) => (new_u16_be(0), AlgId::new(0)),
                Some(AlgIdEnum::XOR) => (reader.read("symmetric key bits")?, AlgId::new(0)),
                Some(AlgIdEnum::AES) => (
                    reader.read("symmetric key bits")?,
                    AlgId::unmarshal(reader)?,
                ),
                _ => Err(UnmarshalError::InvalidValue {
                    what: "symmetric algorithm",
                    value: algorithm.0.get().into(),
                })?,
            };

            Ok(Self {
                algorithm,
                key_bits,
                mode,
            })
        }
    }

    /// `TPMT_TK_HASHCHECK`
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TpmtTkHashcheck {
        pub hierarchy: ReservedHandle,
        pub digest: Tpm2bBuffer,
    }

    impl TpmUnmarshal for TpmtTkHashcheck {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            let tag: SessionTag = reader.read("ticket tag")?;
            if tag.into_enum() != Some(SessionTagEnum::Hashcheck) {
                Err(UnmarshalError::InvalidValue {
                    what: "ticket tag",
                    value: tag.0.get().into(),
                })?
            }
            Ok(Self {
                hierarchy: ReservedHandle::unmarshal(reader)?,
                digest: Tpm2bBuffer::unmarshal_bounded(reader, "ticket digest", MAX_HASH_SIZE)?,
            })
        }
    }

    /// `TPMS_NV_PUBLIC`
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TpmsNvPublic {
        pub nv_index: u32,
        pub name_alg: AlgId,
        pub attributes: TpmaNv,
        pub auth_policy: Tpm2bBuffer,
        pub data_size: u16,
    }

    impl TpmsNvPublic {
        pub fn new(
            nv_index: u32,
            name_alg: AlgId,
            attributes: TpmaNvBits,
            auth_policy: &[u8],
            data_size: u16,
        ) -> Result<Self, InvalidInput> {
            if auth_policy.len() > MAX_HASH_SIZE {
                Err(InvalidInput::BufferSizeTooLarge(
                    auth_policy.len(),
                    MAX_HASH_SIZE,
                ))?
            }

            Ok(Self {
                nv_index,
                name_alg,
                attributes: attributes.into(),
                auth_policy: Tpm2bBuffer::new(auth_policy)?,
                data_size,
            })
        }
    }

    /// Marshals as `TPM2B_NV_PUBLIC`.
    impl TpmMarshal for TpmsNvPublic {
        fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
            writer.write_sized_with("nv public", |w| {
                w.write_u32(self.nv_index)?;
                w.write(&self.name_alg)?;
                w.write(&self.attributes)?;
                self.auth_policy
                    .marshal_bounded(w, "nv auth policy", MAX_HASH_SIZE)?;
                w.write_u16(self.data_size)
            })
        }
    }

    /// Unmarshals from `TPM2B_NV_PUBLIC`.
    impl TpmUnmarshal for TpmsNvPublic {
        fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
            reader.read_sized_with("nv public", |r| {
                Ok(Self {
                    nv_index: r.read_u32("nv index")?,
                    name_alg: AlgId::unmarshal(r)?,
                    attributes: r.read("nv attributes")?,
                    auth_policy: Tpm2bBuffer::unmarshal_bounded(
                        r,
                        "nv auth policy",
                        MAX_HASH_SIZE,
                    )?,
                    data_size: r.read_u16("nv data size")?,
                })
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::protocol::*;
    use super::*;
    use test_log::test;

    #[test]
    fn test_session_attributes_layout() {
        let attrs = TpmaSessionBits::new()
            .with_continue_session(true)
            .with_decrypt(true)
            .with_encrypt(true);
        assert_eq!(u8::from(attrs), 0x61);
        assert_eq!(TpmaSessionBits::from(0x20u8), TpmaSessionBits::new().with_decrypt(true));
    }

    #[test]
    fn test_command_code_names() {
        for code in [0x144, 0x145, 0x137, 0x17e] {
            let cc = CommandCodeEnum::from_u32(code).unwrap();
            assert_eq!(cc as u32, code);
            assert!(cc.name().starts_with("TPM2_"));
        }
        assert_eq!(CommandCodeEnum::NV_Write.name(), "TPM2_NV_Write");
        assert!(CommandCodeEnum::from_u32(0x1ff).is_none());
    }

    #[test]
    fn test_pcr_selection_list() {
        const PCR_ALLOCATE_SELECTION: [u8; 16] = [
            0x00, 0x00, 0x00, 0x02, 0x00, 0x04, 0x03, 0xff, 0xff, 0xff, 0x00, 0x0b, 0x03, 0x00,
            0x00, 0x00,
        ];

        let selections = TpmlPcrSelection::new(&[
            PcrSelection::new(AlgIdEnum::SHA, 0xffffff),
            PcrSelection::new(AlgIdEnum::SHA256, 0),
        ])
        .unwrap();

        let mut buf = [0u8; 64];
        let mut writer = TpmWriter::new(&mut buf);
        selections.marshal(&mut writer).unwrap();
        assert_eq!(writer.written(), PCR_ALLOCATE_SELECTION);

        let mut reader = TpmReader::new(&PCR_ALLOCATE_SELECTION);
        let parsed = TpmlPcrSelection::unmarshal(&mut reader).unwrap();
        assert!(reader.is_empty());
        assert_eq!(parsed, selections);
        assert_eq!(parsed.selections().len(), 2);

        let result = TpmlPcrSelection::new(&[PcrSelection::new(AlgIdEnum::SHA, 0); 6]);
        assert!(matches!(
            result,
            Err(InvalidInput::PcrSelectionsLengthTooLong(6, 5))
        ));
    }

    #[test]
    fn test_sym_def_variants() {
        let cases: [(TpmtSymDef, &[u8]); 3] = [
            (TpmtSymDef::null(), &[0x00, 0x10]),
            (
                TpmtSymDef::new(AlgIdEnum::XOR.into(), Some(AlgIdEnum::SHA256 as u16), None),
                &[0x00, 0x0a, 0x00, 0x0b],
            ),
            (
                TpmtSymDef::new(AlgIdEnum::AES.into(), Some(128), Some(AlgIdEnum::CFB.into())),
                &[0x00, 0x06, 0x00, 0x80, 0x00, 0x43],
            ),
        ];

        for (sym, expected) in cases {
            let mut buf = [0u8; 8];
            let mut writer = TpmWriter::new(&mut buf);
            sym.marshal(&mut writer).unwrap();
            assert_eq!(writer.written(), expected);

            let mut reader = TpmReader::new(expected);
            assert_eq!(TpmtSymDef::unmarshal(&mut reader).unwrap(), sym);
        }

        let mut reader = TpmReader::new(&[0x00, 0x01, 0x08, 0x00]);
        assert!(matches!(
            TpmtSymDef::unmarshal(&mut reader),
            Err(UnmarshalError::InvalidValue { value: 1, .. })
        ));
    }

    #[test]
    fn test_digest_values() {
        let sha1 = TpmtHa::new(AlgIdEnum::SHA, &[0x11; 20]).unwrap();
        let sha256 = TpmtHa::new(AlgIdEnum::SHA256, &[0x22; 32]).unwrap();
        let values = TpmlDigestValues::new(&[sha1, sha256]).unwrap();

        let mut buf = [0u8; 128];
        let mut writer = TpmWriter::new(&mut buf);
        values.marshal(&mut writer).unwrap();
        assert_eq!(writer.position(), 4 + 2 + 20 + 2 + 32);

        let written = writer.written().to_vec();
        let mut reader = TpmReader::new(&written);
        assert_eq!(TpmlDigestValues::unmarshal(&mut reader).unwrap(), values);

        assert!(matches!(
            TpmtHa::new(AlgIdEnum::SHA256, &[0; 20]),
            Err(InvalidInput::DigestSizeMismatch {
                expected: 32,
                actual: 20,
                ..
            })
        ));
        assert!(matches!(
            TpmtHa::new(AlgIdEnum::AES, &[]),
            Err(InvalidInput::UnsupportedHashAlg(0x0006))
        ));
    }

    #[test]
    fn test_nv_public_sized_wrapper() {
        const NV_PUBLIC: [u8; 16] = [
            0x00, 0x0e, 0x01, 0x40, 0x00, 0x01, 0x00, 0x0b, 0x00, 0x02, 0x00, 0x02, 0x00, 0x00,
            0x10, 0x00,
        ];

        let attributes = TpmaNvBits::new().with_nv_ownerwrite(true).with_nv_ownerread(true);
        let public =
            TpmsNvPublic::new(0x01400001, AlgIdEnum::SHA256.into(), attributes, &[], 4096)
                .unwrap();

        let mut buf = [0u8; 32];
        let mut writer = TpmWriter::new(&mut buf);
        public.marshal(&mut writer).unwrap();
        assert_eq!(writer.written(), NV_PUBLIC);

        let mut reader = TpmReader::new(&NV_PUBLIC);
        assert_eq!(TpmsNvPublic::unmarshal(&mut reader).unwrap(), public);
    }

    #[test]
    fn test_tpm2b_bounds() {
        assert!(Tpm2bBuffer::new(&[0; MAX_DIGEST_BUFFER_SIZE]).is_ok());
        assert!(matches!(
            Tpm2bBuffer::new(&[0; MAX_DIGEST_BUFFER_SIZE + 1]),
            Err(InvalidInput::BufferSizeTooLarge(1025, 1024))
        ));

        let nonce = Tpm2bBuffer::new(&[0x5a; 65]).unwrap();
        let mut buf = [0u8; 128];
        let mut writer = TpmWriter::new(&mut buf);
        assert!(matches!(
            nonce.marshal_bounded(&mut writer, "nonce", MAX_HASH_SIZE),
            Err(MarshalError::SizeTooLarge { size: 65, max: 64, .. })
        ));
        assert_eq!(writer.position(), 0);
    }
}
