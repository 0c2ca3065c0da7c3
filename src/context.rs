// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The marshaling context: request and response buffers of one command
//! exchange, plus the layout metadata needed to edit and parse them.

use crate::commands::CommandParameters;
use crate::commands::ResponseParameters;
use crate::error::CommandTable;
use crate::error::TssError;
use crate::marshal::TpmReader;
use crate::marshal::TpmWriter;
use crate::marshal::UnmarshalError;
use crate::policy::AuthRole;
use crate::policy::CommandPolicy;
use crate::policy::DefaultCommandPolicy;
use crate::policy::HandleCounts;
use crate::registry;
use crate::registry::CommandDescriptor;
use crate::tpm20proto::protocol::common::CmdHeader;
use crate::tpm20proto::protocol::common::ReplyHeader;
use crate::tpm20proto::protocol::common::HEADER_SIZE;
use crate::tpm20proto::CommandCode;
use crate::tpm20proto::CommandCodeEnum;
use crate::tpm20proto::SessionTagEnum;
use crate::transport::TpmTransport;
use std::ops::Range;
use std::sync::Arc;
use zerocopy::FromBytes;
use zeroize::Zeroize;

/// Default command buffer capacity (one page).
pub const MAX_COMMAND_SIZE: usize = 4096;
/// Default response buffer capacity (one page).
pub const MAX_RESPONSE_SIZE: usize = 4096;

/// Size of a handle on the wire.
pub const HANDLE_SIZE: usize = size_of::<u32>();
/// Size of the authorization-area and parameter-area size fields.
pub const AREA_SIZE_FIELD: usize = size_of::<u32>();
/// Size of the length prefix of a `TPM2B` field.
const SIZE_PREFIX: usize = size_of::<u16>();

/// Buffer capacities of a [`MarshalContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    pub max_command_size: usize,
    pub max_response_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_command_size: MAX_COMMAND_SIZE,
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }
}

/// A byte range inside a command or response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub offset: usize,
    pub len: usize,
}

impl Region {
    /// One past the last byte, saturating at `usize::MAX`.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.len)
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// The bytes of this region, empty if it lies outside `bytes`.
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        bytes.get(self.range()).unwrap_or(&[])
    }
}

/// Offset of the first command parameter: header plus handles.
pub fn command_parameter_offset(handle_count: usize) -> usize {
    HEADER_SIZE + handle_count * HANDLE_SIZE
}

/// Where the handles, parameters, and authorizations of a response lie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLayout {
    /// The response tag was `TPM_ST_SESSIONS`.
    pub sessions: bool,
    pub handles: Region,
    pub parameters: Region,
    /// Empty unless `sessions` is set.
    pub authorizations: Region,
}

/// Derive the layout of `bytes` from its tag.
///
/// Without sessions the parameters run from the handles to the end of the
/// response. With sessions a 4-byte parameter size follows the handles and
/// the authorization area follows the parameters.
pub fn response_layout(bytes: &[u8], handle_count: usize) -> Result<ResponseLayout, UnmarshalError> {
    let mut reader = TpmReader::new(bytes);
    let header: ReplyHeader = reader.read("response header")?;

    let handles = Region {
        offset: reader.position(),
        len: handle_count.saturating_mul(HANDLE_SIZE),
    };
    reader.read_bytes("response handles", handles.len)?;

    let tag = header.session_tag.get();
    match SessionTagEnum::from_u16(tag) {
        Some(SessionTagEnum::NoSessions) => Ok(ResponseLayout {
            sessions: false,
            handles,
            parameters: Region {
                offset: reader.position(),
                len: reader.remaining(),
            },
            authorizations: Region {
                offset: bytes.len(),
                len: 0,
            },
        }),
        Some(SessionTagEnum::Sessions) => {
            let parameter_size = reader.read_u32("parameter size")? as usize;
            let parameters = Region {
                offset: reader.position(),
                len: parameter_size,
            };
            reader.read_bytes("response parameters", parameter_size)?;
            Ok(ResponseLayout {
                sessions: true,
                handles,
                parameters,
                authorizations: Region {
                    offset: reader.position(),
                    len: reader.remaining(),
                },
            })
        }
        _ => Err(UnmarshalError::InvalidValue {
            what: "response tag",
            value: tag.into(),
        }),
    }
}

/// Locate the data of the `TPM2B` field at the start of `region`.
///
/// Both the size prefix and the data must lie within `region` and `bytes`.
pub fn locate_sized_field(bytes: &[u8], region: Region) -> Result<Region, TssError> {
    let limit = region.end().min(bytes.len());
    let out_of_bounds = move |offset, size| TssError::ParameterOutOfBounds {
        offset,
        size,
        limit,
    };

    let mut reader = TpmReader::new(bytes.get(region.offset..limit).unwrap_or(&[]));
    let size = reader
        .read_u16("parameter size")
        .map_err(|_| out_of_bounds(region.offset, SIZE_PREFIX))? as usize;

    let field = Region {
        offset: region.offset.saturating_add(SIZE_PREFIX),
        len: size,
    };
    if field.end() > limit {
        Err(out_of_bounds(field.offset, size))?
    }
    Ok(field)
}

/// Replace `target` with `replacement` if both have the same length.
/// Leaves `target` untouched otherwise.
pub fn overlay_equal_length(target: &mut [u8], replacement: &[u8]) -> Result<(), TssError> {
    if target.len() != replacement.len() {
        Err(TssError::SizeMismatch {
            expected: target.len(),
            actual: replacement.len(),
        })?
    }
    target.copy_from_slice(replacement);
    Ok(())
}

/// State of one command/response exchange.
///
/// A context is reused across commands: every [`encode`](Self::encode)
/// starts from a cleared state. Both buffers are zeroed on drop since they
/// may hold authorization values.
pub struct MarshalContext {
    pub(crate) policy: Arc<dyn CommandPolicy>,
    pub(crate) command_bytes: Box<[u8]>,
    pub(crate) command_size: usize,
    pub(crate) response_bytes: Box<[u8]>,
    pub(crate) response_size: usize,
    pub(crate) descriptor: Option<&'static CommandDescriptor>,
    pub(crate) handle_counts: HandleCounts,
    pub(crate) auth_count: usize,
    /// Set once a command has been encoded successfully.
    pub(crate) param_region: Option<Region>,
}

impl Default for MarshalContext {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl MarshalContext {
    /// Create a context using the built-in command policy.
    pub fn new(config: ContextConfig) -> Self {
        Self::with_policy(config, Arc::new(DefaultCommandPolicy))
    }

    pub fn with_policy(config: ContextConfig, policy: Arc<dyn CommandPolicy>) -> Self {
        // the size fields of both headers are 32 bits
        let command_capacity = config.max_command_size.clamp(HEADER_SIZE, u32::MAX as usize);
        let response_capacity = config.max_response_size.min(u32::MAX as usize);
        Self {
            policy,
            command_bytes: vec![0; command_capacity].into_boxed_slice(),
            command_size: 0,
            response_bytes: vec![0; response_capacity].into_boxed_slice(),
            response_size: 0,
            descriptor: None,
            handle_counts: HandleCounts {
                command: 0,
                response: 0,
            },
            auth_count: 0,
            param_region: None,
        }
    }

    /// Clear all exchange state and zero both buffers.
    pub fn reset(&mut self) {
        self.command_bytes.zeroize();
        self.command_size = 0;
        self.response_bytes.zeroize();
        self.response_size = 0;
        self.descriptor = None;
        self.handle_counts = HandleCounts {
            command: 0,
            response: 0,
        };
        self.auth_count = 0;
        self.param_region = None;
    }

    /// Encode `command_code` with its handles and parameters.
    ///
    /// The command is left without sessions; see
    /// [`attach_authorizations`](Self::attach_authorizations).
    pub fn encode(
        &mut self,
        command_code: u32,
        input: Option<&CommandParameters>,
    ) -> Result<(), TssError> {
        self.reset();

        let descriptor = registry::lookup(command_code)?;
        let name = descriptor.name;
        let handle_counts =
            self.policy
                .handle_counts(command_code)
                .ok_or(TssError::UnknownCommand {
                    command_code,
                    table: CommandTable::Policy,
                })?;

        let encode_error = |error| TssError::Encode {
            command: name,
            error,
        };
        let mut writer = TpmWriter::new(&mut self.command_bytes);
        let header = CmdHeader::new(
            SessionTagEnum::NoSessions.into(),
            0,
            CommandCode(command_code.into()),
        );
        writer.write(&header).map_err(encode_error)?;

        match (descriptor.encoder, input) {
            (Some(encoder), Some(input)) => encoder(input, &mut writer).map_err(encode_error)?,
            (Some(_), None) => Err(TssError::MissingInput(name))?,
            (None, Some(_)) => Err(TssError::UnexpectedInput(name))?,
            (None, None) => {}
        }
        let size = writer.position();

        let invalid_encoding = |error| TssError::InvalidEncoding {
            command: name,
            error,
        };
        let param_offset = command_parameter_offset(handle_counts.command);
        if size < param_offset {
            Err(invalid_encoding(UnmarshalError::Insufficient {
                what: "command handles",
                needed: param_offset - HEADER_SIZE,
                remaining: size - HEADER_SIZE,
            }))?
        }

        if let Some(validator) = descriptor.validator {
            let mut reader = TpmReader::new(&self.command_bytes[param_offset..size]);
            validator(&mut reader)
                .and_then(|()| reader.finish())
                .map_err(invalid_encoding)?;
        }

        // only a fully validated command becomes the loaded one
        self.descriptor = Some(descriptor);
        self.handle_counts = handle_counts;
        self.command_size = size;
        self.update_command_header(SessionTagEnum::NoSessions);
        self.param_region = Some(Region {
            offset: param_offset,
            len: size - param_offset,
        });

        tracing::debug!(
            command = name,
            size,
            handles = handle_counts.command,
            "encoded command"
        );
        Ok(())
    }

    /// Rewrite the tag and size fields of the command header.
    pub(crate) fn update_command_header(&mut self, tag: SessionTagEnum) {
        let size = self.command_size as u32;
        // the command buffer always holds at least a header
        if let Ok((header, _)) = CmdHeader::mut_from_prefix(&mut self.command_bytes[..]) {
            header.session_tag = tag.into();
            header.size = size.into();
        }
    }

    /// The descriptor of a successfully encoded command.
    fn loaded_descriptor(&self) -> Result<&'static CommandDescriptor, TssError> {
        match (self.descriptor, self.param_region) {
            (Some(descriptor), Some(_)) => Ok(descriptor),
            _ => Err(TssError::NoCommandLoaded),
        }
    }

    /// Decode the loaded response into `output`.
    ///
    /// Commands without a response decoder take no output and succeed
    /// without looking at the response.
    pub fn decode(&self, output: Option<&mut ResponseParameters>) -> Result<(), TssError> {
        let descriptor = self.loaded_descriptor()?;
        let name = descriptor.name;

        let (decoder, output) = match (descriptor.decoder, output) {
            (None, None) => return Ok(()),
            (None, Some(_)) => Err(TssError::UnexpectedOutput(name))?,
            (Some(_), None) => Err(TssError::MissingOutput(name))?,
            (Some(decoder), Some(output)) => (decoder, output),
        };

        let bytes = self.response_bytes();
        let layout = self.response_layout()?;
        let handles = read_handles(layout.handles.slice(bytes)).map_err(TssError::MalformedResponse)?;

        let mut reader = TpmReader::new(layout.parameters.slice(bytes));
        *output = decoder(&handles, &mut reader).map_err(|error| TssError::Decode {
            command: name,
            error,
        })?;
        match reader.remaining() {
            0 => Ok(()),
            n => Err(TssError::TrailingBytes(n)),
        }
    }

    /// Send the encoded command and load the response.
    pub fn transmit<T: TpmTransport + ?Sized>(&mut self, transport: &mut T) -> Result<(), TssError> {
        let name = self.loaded_descriptor()?.name;
        tracing::trace!(command = name, bytes = ?self.command_bytes(), "transmit");

        let size = transport
            .transmit(
                &self.command_bytes[..self.command_size],
                &mut self.response_bytes,
            )
            .map_err(|error| TssError::Transport {
                command: name,
                error,
            })?;
        self.set_response_size(size)?;

        tracing::trace!(command = name, bytes = ?self.response_bytes(), "received");
        Ok(())
    }

    /// Load a response received outside of [`transmit`](Self::transmit).
    pub fn load_response(&mut self, bytes: &[u8]) -> Result<(), TssError> {
        let capacity = self.response_bytes.len();
        let target = self
            .response_bytes
            .get_mut(..bytes.len())
            .ok_or(TssError::ResponseTooLarge {
                size: bytes.len(),
                capacity,
            })?;
        target.copy_from_slice(bytes);
        self.set_response_size(bytes.len())
    }

    fn set_response_size(&mut self, size: usize) -> Result<(), TssError> {
        if size > self.response_bytes.len() {
            Err(TssError::ResponseTooLarge {
                size,
                capacity: self.response_bytes.len(),
            })?
        }
        self.response_size = size;

        let header = self.reply_header()?;
        if header.size.get() as usize != size {
            Err(TssError::ResponseSizeMismatch {
                header: header.size.get() as usize,
                received: size,
            })?
        }
        Ok(())
    }

    fn reply_header(&self) -> Result<ReplyHeader, TssError> {
        TpmReader::new(self.response_bytes())
            .read::<ReplyHeader>("response header")
            .map_err(TssError::MalformedResponse)
    }

    /// Layout of the loaded response, re-derived from its tag.
    pub fn response_layout(&self) -> Result<ResponseLayout, TssError> {
        response_layout(self.response_bytes(), self.handle_counts.response)
            .map_err(TssError::MalformedResponse)
    }

    pub fn command_code(&self) -> Option<CommandCodeEnum> {
        self.descriptor.map(|d| d.command_code)
    }

    pub fn command_name(&self) -> Option<&'static str> {
        self.descriptor.map(|d| d.name)
    }

    pub fn command_handle_count(&self) -> usize {
        self.handle_counts.command
    }

    pub fn response_handle_count(&self) -> usize {
        self.handle_counts.response
    }

    /// Number of authorizations attached to the current command.
    pub fn auth_count(&self) -> usize {
        self.auth_count
    }

    /// The encoded command.
    pub fn command_bytes(&self) -> &[u8] {
        &self.command_bytes[..self.command_size]
    }

    /// The loaded response.
    pub fn response_bytes(&self) -> &[u8] {
        &self.response_bytes[..self.response_size]
    }

    /// The command parameter area, as hashed into a `cpHash`.
    pub fn command_parameters(&self) -> Result<&[u8], TssError> {
        let region = self.param_region.ok_or(TssError::NoCommandLoaded)?;
        Ok(&self.command_bytes[region.range()])
    }

    /// The response parameter area, as hashed into an `rpHash`.
    pub fn response_parameters(&self) -> Result<&[u8], TssError> {
        let layout = self.response_layout()?;
        Ok(layout.parameters.slice(self.response_bytes()))
    }

    /// The command handle at `index`.
    pub fn command_handle(&self, index: usize) -> Result<u32, TssError> {
        if self.param_region.is_none() {
            Err(TssError::NoCommandLoaded)?
        }
        let count = self.handle_counts.command;
        if index >= count {
            Err(TssError::BadHandleIndex { index, count })?
        }

        TpmReader::new(&self.command_bytes[command_parameter_offset(index)..])
            .read_u32("command handle")
            .map_err(|_| TssError::BadHandleIndex { index, count })
    }

    /// Authorization role of the command handle at `index`.
    pub fn auth_role(&self, index: usize) -> AuthRole {
        match self.command_code() {
            Some(code) => self.policy.auth_role(code as u32, index),
            None => AuthRole::None,
        }
    }

    /// The TPM return code of the loaded response.
    pub fn response_code(&self) -> Result<u32, TssError> {
        Ok(self.reply_header()?.response_code.get())
    }

    /// Locate the data of the first command parameter, which must be a
    /// `TPM2B` field.
    pub fn locate_command_param(&self) -> Result<Region, TssError> {
        let region = self.param_region.ok_or(TssError::NoCommandLoaded)?;
        locate_sized_field(self.command_bytes(), region)
    }

    /// Locate the data of the first response parameter, which must be a
    /// `TPM2B` field.
    pub fn locate_response_param(&self) -> Result<Region, TssError> {
        let layout = self.response_layout()?;
        locate_sized_field(self.response_bytes(), layout.parameters)
    }

    pub fn command_param(&self) -> Result<&[u8], TssError> {
        let field = self.locate_command_param()?;
        Ok(&self.command_bytes[field.range()])
    }

    pub fn response_param(&self) -> Result<&[u8], TssError> {
        let field = self.locate_response_param()?;
        Ok(&self.response_bytes[field.range()])
    }

    /// Replace the data of the first command parameter in place, e.g. with
    /// its ciphertext. The replacement must have the same length.
    pub fn overlay_command_param(&mut self, replacement: &[u8]) -> Result<(), TssError> {
        let field = self.locate_command_param()?;
        overlay_equal_length(&mut self.command_bytes[field.range()], replacement)
    }

    /// Replace the data of the first response parameter in place, e.g. with
    /// its plaintext. The replacement must have the same length.
    pub fn overlay_response_param(&mut self, replacement: &[u8]) -> Result<(), TssError> {
        let field = self.locate_response_param()?;
        overlay_equal_length(&mut self.response_bytes[field.range()], replacement)
    }
}

impl Drop for MarshalContext {
    fn drop(&mut self) {
        self.command_bytes.zeroize();
        self.response_bytes.zeroize();
    }
}

fn read_handles(bytes: &[u8]) -> Result<Vec<u32>, UnmarshalError> {
    let mut reader = TpmReader::new(bytes);
    let mut handles = Vec::with_capacity(bytes.len() / HANDLE_SIZE);
    while !reader.is_empty() {
        handles.push(reader.read_u32("response handle")?);
    }
    Ok(handles)
}
