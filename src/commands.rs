// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Typed command inputs and response outputs for the registered commands.
//!
//! An input carries the command's handles followed by its parameters, in
//! the order they appear on the wire. An output carries the response handles
//! (if any) followed by the response parameters.

use crate::marshal::MarshalError;
use crate::marshal::TpmMarshal;
use crate::marshal::TpmReader;
use crate::marshal::TpmUnmarshal;
use crate::marshal::TpmWriter;
use crate::marshal::UnmarshalError;
use crate::tpm20proto::protocol::SessionType;
use crate::tpm20proto::protocol::StartupType;
use crate::tpm20proto::protocol::Tpm2bBuffer;
use crate::tpm20proto::protocol::TpmlDigest;
use crate::tpm20proto::protocol::TpmlDigestValues;
use crate::tpm20proto::protocol::TpmlPcrSelection;
use crate::tpm20proto::protocol::TpmsNvPublic;
use crate::tpm20proto::protocol::TpmtSymDef;
use crate::tpm20proto::protocol::TpmtTkHashcheck;
use crate::tpm20proto::AlgId;
use crate::tpm20proto::CommandCodeEnum;
use crate::tpm20proto::ReservedHandle;
use crate::tpm20proto::MAX_DIGEST_BUFFER_SIZE;
use crate::tpm20proto::MAX_HASH_SIZE;

/// Upper bound of `TPM2B_SENSITIVE_DATA`.
pub const MAX_SYM_DATA: usize = 128;
/// Upper bound of `TPM2B_ENCRYPTED_SECRET` for a 2048-bit RSA salt key.
pub const MAX_ENCRYPTED_SECRET_SIZE: usize = 256;
/// Upper bound of `TPM2B_NAME`: a hash algorithm id followed by a digest.
pub const MAX_NAME_SIZE: usize = 2 + MAX_HASH_SIZE;

/// A typed command input bound to exactly one command code.
pub trait CommandInput: TpmMarshal + Sized {
    const COMMAND: CommandCodeEnum;

    fn from_parameters(params: &CommandParameters) -> Option<&Self>;

    /// Parse the parameter area (the bytes after the handles) of an encoded
    /// command, rejecting out-of-range values.
    fn validate_parameters(_reader: &mut TpmReader<'_>) -> Result<(), UnmarshalError> {
        Ok(())
    }
}

/// A typed response output.
pub trait ResponseOutput: Sized + Into<ResponseParameters> {
    fn unmarshal_response(
        handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError>;
}

/// Uniform encoder over [`CommandParameters`] for input type `T`.
pub fn encode<T: CommandInput>(
    params: &CommandParameters,
    writer: &mut TpmWriter<'_>,
) -> Result<(), MarshalError> {
    let input = T::from_parameters(params).ok_or(MarshalError::ParameterMismatch {
        expected: T::COMMAND.name(),
        found: params.command().name(),
    })?;
    input.marshal(writer)
}

/// Uniform decoder producing [`ResponseParameters`] from output type `T`.
pub fn decode<T: ResponseOutput>(
    handles: &[u32],
    reader: &mut TpmReader<'_>,
) -> Result<ResponseParameters, UnmarshalError> {
    Ok(T::unmarshal_response(handles, reader)?.into())
}

fn response_handle(handles: &[u32], what: &'static str) -> Result<ReservedHandle, UnmarshalError> {
    handles
        .first()
        .map(|h| ReservedHandle::from(*h))
        .ok_or(UnmarshalError::Insufficient {
            what,
            needed: size_of::<u32>(),
            remaining: 0,
        })
}

macro_rules! command_parameters {
    ($($variant:ident($ty:ident) => $cc:ident,)*) => {
        /// Command input for any encodable command.
        #[derive(Debug, Clone)]
        pub enum CommandParameters {
            $($variant($ty),)*
        }

        impl CommandParameters {
            pub fn command(&self) -> CommandCodeEnum {
                match self {
                    $(Self::$variant(_) => CommandCodeEnum::$cc,)*
                }
            }
        }

        $(
            impl From<$ty> for CommandParameters {
                fn from(x: $ty) -> Self {
                    Self::$variant(x)
                }
            }
        )*
    };
}

command_parameters! {
    Startup(StartupIn) => Startup,
    Shutdown(ShutdownIn) => Shutdown,
    SelfTest(SelfTestIn) => SelfTest,
    GetRandom(GetRandomIn) => GetRandom,
    StirRandom(StirRandomIn) => StirRandom,
    StartAuthSession(StartAuthSessionIn) => StartAuthSession,
    PolicyRestart(PolicyRestartIn) => PolicyRestart,
    Hash(HashIn) => Hash,
    PcrRead(PcrReadIn) => PCR_Read,
    PcrExtend(PcrExtendIn) => PCR_Extend,
    PcrAllocate(PcrAllocateIn) => PCR_Allocate,
    SetPrimaryPolicy(SetPrimaryPolicyIn) => SetPrimaryPolicy,
    Clear(ClearIn) => Clear,
    ClearControl(ClearControlIn) => ClearControl,
    HierarchyControl(HierarchyControlIn) => HierarchyControl,
    FlushContext(FlushContextIn) => FlushContext,
    EvictControl(EvictControlIn) => EvictControl,
    ReadPublic(ReadPublicIn) => ReadPublic,
    Unseal(UnsealIn) => Unseal,
    NvDefineSpace(NvDefineSpaceIn) => NV_DefineSpace,
    NvUndefineSpace(NvUndefineSpaceIn) => NV_UndefineSpace,
    NvReadPublic(NvReadPublicIn) => NV_ReadPublic,
    NvWrite(NvWriteIn) => NV_Write,
    NvRead(NvReadIn) => NV_Read,
}

macro_rules! command_input {
    ($ty:ident, $variant:ident, $cc:ident, $validate:expr) => {
        impl CommandInput for $ty {
            const COMMAND: CommandCodeEnum = CommandCodeEnum::$cc;

            fn from_parameters(params: &CommandParameters) -> Option<&Self> {
                match params {
                    CommandParameters::$variant(x) => Some(x),
                    _ => None,
                }
            }

            fn validate_parameters(reader: &mut TpmReader<'_>) -> Result<(), UnmarshalError> {
                let validate: fn(&mut TpmReader<'_>) -> Result<(), UnmarshalError> = $validate;
                validate(reader)
            }
        }
    };
    ($ty:ident, $variant:ident, $cc:ident) => {
        impl CommandInput for $ty {
            const COMMAND: CommandCodeEnum = CommandCodeEnum::$cc;

            fn from_parameters(params: &CommandParameters) -> Option<&Self> {
                match params {
                    CommandParameters::$variant(x) => Some(x),
                    _ => None,
                }
            }
        }
    };
}

/// `TPM2_Startup`
#[derive(Debug, Clone)]
pub struct StartupIn {
    pub startup_type: StartupType,
}

impl TpmMarshal for StartupIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.startup_type.marshal(writer)
    }
}

command_input!(StartupIn, Startup, Startup, |r| StartupType::unmarshal(r)
    .map(drop));

/// `TPM2_Shutdown`
#[derive(Debug, Clone)]
pub struct ShutdownIn {
    pub shutdown_type: StartupType,
}

impl TpmMarshal for ShutdownIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.shutdown_type.marshal(writer)
    }
}

command_input!(ShutdownIn, Shutdown, Shutdown, |r| StartupType::unmarshal(r)
    .map(drop));

/// `TPM2_SelfTest`
#[derive(Debug, Clone)]
pub struct SelfTestIn {
    pub full_test: bool,
}

impl TpmMarshal for SelfTestIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.full_test.marshal(writer)
    }
}

command_input!(SelfTestIn, SelfTest, SelfTest, |r| r.read_bool("full test").map(drop));

/// `TPM2_GetTestResult` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetTestResultOut {
    pub out_data: Tpm2bBuffer,
    pub test_result: u32,
}

impl ResponseOutput for GetTestResultOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            out_data: Tpm2bBuffer::unmarshal(reader)?,
            test_result: reader.read_u32("test result")?,
        })
    }
}

/// `TPM2_GetRandom`
#[derive(Debug, Clone)]
pub struct GetRandomIn {
    pub bytes_requested: u16,
}

impl TpmMarshal for GetRandomIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        writer.write_u16(self.bytes_requested)
    }
}

command_input!(GetRandomIn, GetRandom, GetRandom, |r| r
    .read_u16("bytes requested")
    .map(drop));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRandomOut {
    pub random_bytes: Tpm2bBuffer,
}

impl ResponseOutput for GetRandomOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            random_bytes: Tpm2bBuffer::unmarshal_bounded(reader, "random bytes", MAX_HASH_SIZE)?,
        })
    }
}

/// `TPM2_StirRandom`
#[derive(Debug, Clone)]
pub struct StirRandomIn {
    pub in_data: Tpm2bBuffer,
}

impl TpmMarshal for StirRandomIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.in_data.marshal_bounded(writer, "in data", MAX_SYM_DATA)
    }
}

command_input!(StirRandomIn, StirRandom, StirRandom, |r| {
    r.read_sized("in data", MAX_SYM_DATA).map(drop)
});

/// `TPM2_StartAuthSession`
#[derive(Debug, Clone)]
pub struct StartAuthSessionIn {
    pub tpm_key: ReservedHandle,
    pub bind: ReservedHandle,
    pub nonce_caller: Tpm2bBuffer,
    pub encrypted_salt: Tpm2bBuffer,
    pub session_type: SessionType,
    pub symmetric: TpmtSymDef,
    pub auth_hash: AlgId,
}

impl TpmMarshal for StartAuthSessionIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.tpm_key.marshal(writer)?;
        self.bind.marshal(writer)?;
        self.nonce_caller
            .marshal_bounded(writer, "nonce caller", MAX_HASH_SIZE)?;
        self.encrypted_salt
            .marshal_bounded(writer, "encrypted salt", MAX_ENCRYPTED_SECRET_SIZE)?;
        self.session_type.marshal(writer)?;
        self.symmetric.marshal(writer)?;
        self.auth_hash.marshal(writer)
    }
}

command_input!(StartAuthSessionIn, StartAuthSession, StartAuthSession, |r| {
    r.read_sized("nonce caller", MAX_HASH_SIZE)?;
    r.read_sized("encrypted salt", MAX_ENCRYPTED_SECRET_SIZE)?;
    SessionType::unmarshal(r)?;
    TpmtSymDef::unmarshal(r)?;
    AlgId::unmarshal(r)?;
    Ok(())
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAuthSessionOut {
    pub session_handle: ReservedHandle,
    pub nonce_tpm: Tpm2bBuffer,
}

impl ResponseOutput for StartAuthSessionOut {
    fn unmarshal_response(
        handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            session_handle: response_handle(handles, "session handle")?,
            nonce_tpm: Tpm2bBuffer::unmarshal_bounded(reader, "nonce tpm", MAX_HASH_SIZE)?,
        })
    }
}

/// `TPM2_PolicyRestart`
#[derive(Debug, Clone)]
pub struct PolicyRestartIn {
    pub session_handle: ReservedHandle,
}

impl TpmMarshal for PolicyRestartIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.session_handle.marshal(writer)
    }
}

command_input!(PolicyRestartIn, PolicyRestart, PolicyRestart);

/// `TPM2_Hash`
#[derive(Debug, Clone)]
pub struct HashIn {
    pub data: Tpm2bBuffer,
    pub hash_alg: AlgId,
    pub hierarchy: ReservedHandle,
}

impl TpmMarshal for HashIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.data.marshal(writer)?;
        self.hash_alg.marshal(writer)?;
        self.hierarchy.marshal(writer)
    }
}

command_input!(HashIn, Hash, Hash, |r| {
    r.read_sized("data", MAX_DIGEST_BUFFER_SIZE)?;
    let alg = AlgId::unmarshal(r)?;
    if alg.into_enum().and_then(|a| a.digest_size()).is_none() {
        Err(UnmarshalError::InvalidValue {
            what: "hash algorithm",
            value: alg.0.get().into(),
        })?
    }
    ReservedHandle::unmarshal(r)?;
    Ok(())
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashOut {
    pub out_hash: Tpm2bBuffer,
    pub validation: TpmtTkHashcheck,
}

impl ResponseOutput for HashOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            out_hash: Tpm2bBuffer::unmarshal_bounded(reader, "out hash", MAX_HASH_SIZE)?,
            validation: TpmtTkHashcheck::unmarshal(reader)?,
        })
    }
}

/// `TPM2_PCR_Read`
#[derive(Debug, Clone)]
pub struct PcrReadIn {
    pub pcr_selection_in: TpmlPcrSelection,
}

impl TpmMarshal for PcrReadIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.pcr_selection_in.marshal(writer)
    }
}

command_input!(PcrReadIn, PcrRead, PCR_Read, |r| TpmlPcrSelection::unmarshal(r)
    .map(drop));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrReadOut {
    pub pcr_update_counter: u32,
    pub pcr_selection_out: TpmlPcrSelection,
    pub pcr_values: TpmlDigest,
}

impl ResponseOutput for PcrReadOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            pcr_update_counter: reader.read_u32("pcr update counter")?,
            pcr_selection_out: TpmlPcrSelection::unmarshal(reader)?,
            pcr_values: TpmlDigest::unmarshal(reader)?,
        })
    }
}

/// `TPM2_PCR_Extend`
#[derive(Debug, Clone)]
pub struct PcrExtendIn {
    pub pcr_handle: ReservedHandle,
    pub digests: TpmlDigestValues,
}

impl TpmMarshal for PcrExtendIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.pcr_handle.marshal(writer)?;
        self.digests.marshal(writer)
    }
}

command_input!(PcrExtendIn, PcrExtend, PCR_Extend, |r| TpmlDigestValues::unmarshal(r)
    .map(drop));

/// `TPM2_PCR_Allocate`
#[derive(Debug, Clone)]
pub struct PcrAllocateIn {
    pub auth_handle: ReservedHandle,
    pub pcr_allocation: TpmlPcrSelection,
}

impl TpmMarshal for PcrAllocateIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth_handle.marshal(writer)?;
        self.pcr_allocation.marshal(writer)
    }
}

command_input!(PcrAllocateIn, PcrAllocate, PCR_Allocate, |r| {
    TpmlPcrSelection::unmarshal(r).map(drop)
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrAllocateOut {
    pub allocation_success: bool,
    pub max_pcr: u32,
    pub size_needed: u32,
    pub size_available: u32,
}

impl ResponseOutput for PcrAllocateOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            allocation_success: reader.read_bool("allocation success")?,
            max_pcr: reader.read_u32("max pcr")?,
            size_needed: reader.read_u32("size needed")?,
            size_available: reader.read_u32("size available")?,
        })
    }
}

/// `TPM2_SetPrimaryPolicy`
#[derive(Debug, Clone)]
pub struct SetPrimaryPolicyIn {
    pub auth_handle: ReservedHandle,
    pub auth_policy: Tpm2bBuffer,
    pub hash_alg: AlgId,
}

impl TpmMarshal for SetPrimaryPolicyIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth_handle.marshal(writer)?;
        self.auth_policy
            .marshal_bounded(writer, "auth policy", MAX_HASH_SIZE)?;
        self.hash_alg.marshal(writer)
    }
}

command_input!(SetPrimaryPolicyIn, SetPrimaryPolicy, SetPrimaryPolicy, |r| {
    r.read_sized("auth policy", MAX_HASH_SIZE)?;
    AlgId::unmarshal(r).map(drop)
});

/// `TPM2_Clear`
#[derive(Debug, Clone)]
pub struct ClearIn {
    pub auth_handle: ReservedHandle,
}

impl TpmMarshal for ClearIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth_handle.marshal(writer)
    }
}

command_input!(ClearIn, Clear, Clear);

/// `TPM2_ClearControl`
#[derive(Debug, Clone)]
pub struct ClearControlIn {
    pub auth: ReservedHandle,
    pub disable: bool,
}

impl TpmMarshal for ClearControlIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth.marshal(writer)?;
        self.disable.marshal(writer)
    }
}

command_input!(ClearControlIn, ClearControl, ClearControl, |r| r
    .read_bool("disable")
    .map(drop));

/// `TPM2_HierarchyControl`
#[derive(Debug, Clone)]
pub struct HierarchyControlIn {
    pub auth_handle: ReservedHandle,
    pub enable: ReservedHandle,
    pub state: bool,
}

impl TpmMarshal for HierarchyControlIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth_handle.marshal(writer)?;
        self.enable.marshal(writer)?;
        self.state.marshal(writer)
    }
}

command_input!(HierarchyControlIn, HierarchyControl, HierarchyControl, |r| {
    ReservedHandle::unmarshal(r)?;
    r.read_bool("state").map(drop)
});

/// `TPM2_FlushContext`. The handle to flush is a parameter, not a handle.
#[derive(Debug, Clone)]
pub struct FlushContextIn {
    pub flush_handle: ReservedHandle,
}

impl TpmMarshal for FlushContextIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.flush_handle.marshal(writer)
    }
}

command_input!(FlushContextIn, FlushContext, FlushContext, |r| {
    ReservedHandle::unmarshal(r).map(drop)
});

/// `TPM2_EvictControl`
#[derive(Debug, Clone)]
pub struct EvictControlIn {
    pub auth: ReservedHandle,
    pub object_handle: ReservedHandle,
    pub persistent_handle: ReservedHandle,
}

impl TpmMarshal for EvictControlIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth.marshal(writer)?;
        self.object_handle.marshal(writer)?;
        self.persistent_handle.marshal(writer)
    }
}

command_input!(EvictControlIn, EvictControl, EvictControl, |r| {
    ReservedHandle::unmarshal(r).map(drop)
});

/// `TPM2_ReadPublic`
#[derive(Debug, Clone)]
pub struct ReadPublicIn {
    pub object_handle: ReservedHandle,
}

impl TpmMarshal for ReadPublicIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.object_handle.marshal(writer)
    }
}

command_input!(ReadPublicIn, ReadPublic, ReadPublic);

/// The public area is kept in its marshaled `TPMT_PUBLIC` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPublicOut {
    pub out_public: Tpm2bBuffer,
    pub name: Tpm2bBuffer,
    pub qualified_name: Tpm2bBuffer,
}

impl ResponseOutput for ReadPublicOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            out_public: Tpm2bBuffer::unmarshal(reader)?,
            name: Tpm2bBuffer::unmarshal_bounded(reader, "name", MAX_NAME_SIZE)?,
            qualified_name: Tpm2bBuffer::unmarshal_bounded(
                reader,
                "qualified name",
                MAX_NAME_SIZE,
            )?,
        })
    }
}

/// `TPM2_Unseal`
#[derive(Debug, Clone)]
pub struct UnsealIn {
    pub item_handle: ReservedHandle,
}

impl TpmMarshal for UnsealIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.item_handle.marshal(writer)
    }
}

command_input!(UnsealIn, Unseal, Unseal);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsealOut {
    pub out_data: Tpm2bBuffer,
}

impl ResponseOutput for UnsealOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            out_data: Tpm2bBuffer::unmarshal_bounded(reader, "out data", MAX_SYM_DATA)?,
        })
    }
}

/// `TPM2_NV_DefineSpace`
#[derive(Debug, Clone)]
pub struct NvDefineSpaceIn {
    pub auth_handle: ReservedHandle,
    pub auth: Tpm2bBuffer,
    pub public_info: TpmsNvPublic,
}

impl TpmMarshal for NvDefineSpaceIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth_handle.marshal(writer)?;
        self.auth.marshal_bounded(writer, "nv auth", MAX_HASH_SIZE)?;
        self.public_info.marshal(writer)
    }
}

command_input!(NvDefineSpaceIn, NvDefineSpace, NV_DefineSpace, |r| {
    r.read_sized("nv auth", MAX_HASH_SIZE)?;
    TpmsNvPublic::unmarshal(r).map(drop)
});

/// `TPM2_NV_UndefineSpace`
#[derive(Debug, Clone)]
pub struct NvUndefineSpaceIn {
    pub auth_handle: ReservedHandle,
    pub nv_index: ReservedHandle,
}

impl TpmMarshal for NvUndefineSpaceIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth_handle.marshal(writer)?;
        self.nv_index.marshal(writer)
    }
}

command_input!(NvUndefineSpaceIn, NvUndefineSpace, NV_UndefineSpace);

/// `TPM2_NV_ReadPublic`
#[derive(Debug, Clone)]
pub struct NvReadPublicIn {
    pub nv_index: ReservedHandle,
}

impl TpmMarshal for NvReadPublicIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.nv_index.marshal(writer)
    }
}

command_input!(NvReadPublicIn, NvReadPublic, NV_ReadPublic);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvReadPublicOut {
    pub nv_public: TpmsNvPublic,
    pub nv_name: Tpm2bBuffer,
}

impl ResponseOutput for NvReadPublicOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            nv_public: TpmsNvPublic::unmarshal(reader)?,
            nv_name: Tpm2bBuffer::unmarshal_bounded(reader, "nv name", MAX_NAME_SIZE)?,
        })
    }
}

/// `TPM2_NV_Write`
#[derive(Debug, Clone)]
pub struct NvWriteIn {
    pub auth_handle: ReservedHandle,
    pub nv_index: ReservedHandle,
    pub data: Tpm2bBuffer,
    pub offset: u16,
}

impl TpmMarshal for NvWriteIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth_handle.marshal(writer)?;
        self.nv_index.marshal(writer)?;
        self.data.marshal(writer)?;
        writer.write_u16(self.offset)
    }
}

command_input!(NvWriteIn, NvWrite, NV_Write, |r| {
    r.read_sized("nv data", MAX_DIGEST_BUFFER_SIZE)?;
    r.read_u16("nv offset").map(drop)
});

/// `TPM2_NV_Read`
#[derive(Debug, Clone)]
pub struct NvReadIn {
    pub auth_handle: ReservedHandle,
    pub nv_index: ReservedHandle,
    pub size: u16,
    pub offset: u16,
}

impl TpmMarshal for NvReadIn {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.auth_handle.marshal(writer)?;
        self.nv_index.marshal(writer)?;
        writer.write_u16(self.size)?;
        writer.write_u16(self.offset)
    }
}

command_input!(NvReadIn, NvRead, NV_Read, |r| {
    r.read_u16("nv size")?;
    r.read_u16("nv offset").map(drop)
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvReadOut {
    pub data: Tpm2bBuffer,
}

impl ResponseOutput for NvReadOut {
    fn unmarshal_response(
        _handles: &[u32],
        reader: &mut TpmReader<'_>,
    ) -> Result<Self, UnmarshalError> {
        Ok(Self {
            data: Tpm2bBuffer::unmarshal(reader)?,
        })
    }
}

/// Decoded response parameters. `Empty` is the placeholder a caller hands
/// to the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResponseParameters {
    #[default]
    Empty,
    GetTestResult(GetTestResultOut),
    GetRandom(GetRandomOut),
    StartAuthSession(StartAuthSessionOut),
    Hash(HashOut),
    PcrRead(PcrReadOut),
    PcrAllocate(PcrAllocateOut),
    ReadPublic(ReadPublicOut),
    Unseal(UnsealOut),
    NvReadPublic(NvReadPublicOut),
    NvRead(NvReadOut),
}

macro_rules! response_parameters_from {
    ($($variant:ident($ty:ident),)*) => {
        $(
            impl From<$ty> for ResponseParameters {
                fn from(x: $ty) -> Self {
                    Self::$variant(x)
                }
            }
        )*
    };
}

response_parameters_from! {
    GetTestResult(GetTestResultOut),
    GetRandom(GetRandomOut),
    StartAuthSession(StartAuthSessionOut),
    Hash(HashOut),
    PcrRead(PcrReadOut),
    PcrAllocate(PcrAllocateOut),
    ReadPublic(ReadPublicOut),
    Unseal(UnsealOut),
    NvReadPublic(NvReadPublicOut),
    NvRead(NvReadOut),
}
