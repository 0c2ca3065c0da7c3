// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Session authorization records and their placement in the command and
//! response envelopes.

use crate::context::MarshalContext;
use crate::context::Region;
use crate::context::AREA_SIZE_FIELD;
use crate::error::TssError;
use crate::marshal::MarshalError;
use crate::marshal::TpmMarshal;
use crate::marshal::TpmReader;
use crate::marshal::TpmUnmarshal;
use crate::marshal::TpmWriter;
use crate::marshal::UnmarshalError;
use crate::tpm20proto::protocol::Tpm2bBuffer;
use crate::tpm20proto::InvalidInput;
use crate::tpm20proto::ReservedHandle;
use crate::tpm20proto::SessionTagEnum;
use crate::tpm20proto::TpmaSessionBits;
use crate::tpm20proto::MAX_HASH_SIZE;
use crate::tpm20proto::TPM20_RS_PW;

/// Largest encoding of a single [`AuthCommand`].
pub const MAX_AUTH_COMMAND_SIZE: usize =
    size_of::<u32>() + 2 * (size_of::<u16>() + MAX_HASH_SIZE) + size_of::<u8>();

/// `TPMS_AUTH_COMMAND`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AuthCommand {
    pub session_handle: ReservedHandle,
    pub nonce: Tpm2bBuffer,
    pub attributes: TpmaSessionBits,
    pub hmac: Tpm2bBuffer,
}

impl AuthCommand {
    /// Create an authorization record. Nonce and HMAC are bounded by
    /// `MAX_HASH_SIZE` when the record is marshaled.
    pub fn new(
        session_handle: ReservedHandle,
        nonce: &[u8],
        attributes: TpmaSessionBits,
        hmac: &[u8],
    ) -> Result<Self, InvalidInput> {
        Ok(Self {
            session_handle,
            nonce: Tpm2bBuffer::new(nonce)?,
            attributes,
            hmac: Tpm2bBuffer::new(hmac)?,
        })
    }

    /// Password authorization: `TPM_RS_PW`, empty nonce, and the
    /// authorization value in place of the HMAC.
    pub fn password(auth_value: &[u8]) -> Result<Self, InvalidInput> {
        Self::new(
            TPM20_RS_PW,
            &[],
            TpmaSessionBits::new().with_continue_session(true),
            auth_value,
        )
    }

    pub fn payload_size(&self) -> usize {
        size_of_val(&self.session_handle)
            + self.nonce.payload_size()
            + size_of::<u8>()
            + self.hmac.payload_size()
    }
}

impl TpmMarshal for AuthCommand {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.session_handle.marshal(writer)?;
        self.nonce.marshal_bounded(writer, "nonce", MAX_HASH_SIZE)?;
        writer.write_u8(self.attributes.into())?;
        self.hmac.marshal_bounded(writer, "hmac", MAX_HASH_SIZE)
    }
}

impl TpmUnmarshal for AuthCommand {
    fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
        Ok(Self {
            session_handle: ReservedHandle::unmarshal(reader)?,
            nonce: Tpm2bBuffer::unmarshal_bounded(reader, "nonce", MAX_HASH_SIZE)?,
            attributes: reader.read_u8("session attributes")?.into(),
            hmac: Tpm2bBuffer::unmarshal_bounded(reader, "hmac", MAX_HASH_SIZE)?,
        })
    }
}

/// `TPMS_AUTH_RESPONSE`
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AuthResponse {
    pub nonce: Tpm2bBuffer,
    pub attributes: TpmaSessionBits,
    pub hmac: Tpm2bBuffer,
}

impl TpmMarshal for AuthResponse {
    fn marshal(&self, writer: &mut TpmWriter<'_>) -> Result<(), MarshalError> {
        self.nonce.marshal_bounded(writer, "nonce", MAX_HASH_SIZE)?;
        writer.write_u8(self.attributes.into())?;
        self.hmac.marshal_bounded(writer, "hmac", MAX_HASH_SIZE)
    }
}

impl TpmUnmarshal for AuthResponse {
    fn unmarshal(reader: &mut TpmReader<'_>) -> Result<Self, UnmarshalError> {
        Ok(Self {
            nonce: Tpm2bBuffer::unmarshal_bounded(reader, "nonce", MAX_HASH_SIZE)?,
            attributes: reader.read_u8("session attributes")?.into(),
            hmac: Tpm2bBuffer::unmarshal_bounded(reader, "hmac", MAX_HASH_SIZE)?,
        })
    }
}

impl MarshalContext {
    /// Insert `authorizations` between the handles and the parameters of the
    /// encoded command and switch it to `TPM_ST_SESSIONS`.
    ///
    /// An empty list leaves the command untouched. On error the command
    /// buffer is unmodified.
    pub fn attach_authorizations(&mut self, authorizations: &[AuthCommand]) -> Result<(), TssError> {
        if authorizations.is_empty() {
            return Ok(());
        }

        let name = self.command_name().ok_or(TssError::NoCommandLoaded)?;
        let params = self.param_region.ok_or(TssError::NoCommandLoaded)?;
        if self.auth_count != 0 {
            Err(TssError::AuthorizationsAlreadyAttached(name))?
        }

        // Size every record before touching the command.
        let mut scratch = [0u8; MAX_AUTH_COMMAND_SIZE];
        let mut auth_size = 0;
        for (index, auth) in authorizations.iter().enumerate() {
            let mut writer = TpmWriter::new(&mut scratch);
            auth.marshal(&mut writer)
                .map_err(|error| TssError::InvalidAuthorization { index, error })?;
            auth_size += writer.position();
        }

        let shift = AREA_SIZE_FIELD + auth_size;
        let needed = params.end() + shift;
        let capacity = self.command_bytes.len();
        if needed > capacity {
            Err(TssError::BufferOverflow { needed, capacity })?
        }

        self.command_bytes
            .copy_within(params.range(), params.offset + shift);

        let mut writer = TpmWriter::at(&mut self.command_bytes, params.offset);
        writer
            .write_u32(auth_size as u32)
            .map_err(|error| TssError::Encode {
                command: name,
                error,
            })?;
        for (index, auth) in authorizations.iter().enumerate() {
            auth.marshal(&mut writer)
                .map_err(|error| TssError::InvalidAuthorization { index, error })?;
        }

        self.command_size = needed;
        self.param_region = Some(Region {
            offset: params.offset + shift,
            len: params.len,
        });
        self.auth_count = authorizations.len();
        self.update_command_header(SessionTagEnum::Sessions);

        tracing::debug!(
            command = name,
            count = authorizations.len(),
            auth_size,
            size = needed,
            "attached authorizations"
        );
        Ok(())
    }

    /// Decode the response authorization area into `authorizations`,
    /// returning how many were present.
    ///
    /// Decoding stops when `authorizations` is full or the area is
    /// exhausted. Bytes left in the area and a count different from the
    /// number of attached command authorizations are both errors.
    pub fn extract_response_authorizations(
        &self,
        authorizations: &mut [AuthResponse],
    ) -> Result<usize, TssError> {
        let layout = self.response_layout()?;

        let mut received = 0;
        if layout.sessions {
            let mut reader = TpmReader::new(layout.authorizations.slice(self.response_bytes()));
            for slot in authorizations.iter_mut() {
                if reader.is_empty() {
                    break;
                }
                *slot = AuthResponse::unmarshal(&mut reader).map_err(TssError::MalformedResponse)?;
                received += 1;
            }
            if !reader.is_empty() {
                Err(TssError::TrailingBytes(reader.remaining()))?
            }
        }

        if received != self.auth_count {
            Err(TssError::AuthCountMismatch {
                sent: self.auth_count,
                received,
            })?
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandParameters;
    use crate::commands::NvWriteIn;
    use crate::context::ContextConfig;
    use crate::tpm20proto::protocol::common::HEADER_SIZE;
    use crate::tpm20proto::CommandCodeEnum;
    use crate::tpm20proto::TPM20_RH_OWNER;
    use test_log::test;

    fn nv_write(data: &[u8]) -> CommandParameters {
        NvWriteIn {
            auth_handle: TPM20_RH_OWNER,
            nv_index: ReservedHandle::from(0x01400001),
            data: Tpm2bBuffer::new(data).unwrap(),
            offset: 0,
        }
        .into()
    }

    fn encoded_nv_write(config: ContextConfig) -> MarshalContext {
        let mut context = MarshalContext::new(config);
        context
            .encode(
                CommandCodeEnum::NV_Write as u32,
                Some(&nv_write(&[1, 2, 3, 4, 5, 6, 7, 8])),
            )
            .unwrap();
        context
    }

    fn hmac_session(nonce: &[u8], hmac: &[u8]) -> AuthCommand {
        AuthCommand::new(
            ReservedHandle::from(0x02000000),
            nonce,
            TpmaSessionBits::new().with_continue_session(true),
            hmac,
        )
        .unwrap()
    }

    /// Build the response a TPM would send back for `auths`, echoing each
    /// nonce, attribute byte, and HMAC.
    fn mirrored_response(auths: &[AuthCommand], params: &[u8]) -> Vec<u8> {
        let mut area = [0u8; 512];
        let mut writer = TpmWriter::new(&mut area);
        for auth in auths {
            AuthResponse {
                nonce: auth.nonce,
                attributes: auth.attributes,
                hmac: auth.hmac,
            }
            .marshal(&mut writer)
            .unwrap();
        }
        let area = writer.written().to_vec();

        let size = HEADER_SIZE + AREA_SIZE_FIELD + params.len() + area.len();
        let mut response = vec![0x80, 0x02];
        response.extend_from_slice(&(size as u32).to_be_bytes());
        response.extend_from_slice(&[0; 4]);
        response.extend_from_slice(&(params.len() as u32).to_be_bytes());
        response.extend_from_slice(params);
        response.extend_from_slice(&area);
        response
    }

    #[test]
    fn test_password_record() {
        let auth = AuthCommand::password(b"pass").unwrap();
        let mut buf = [0u8; MAX_AUTH_COMMAND_SIZE];
        let mut writer = TpmWriter::new(&mut buf);
        auth.marshal(&mut writer).unwrap();
        assert_eq!(
            writer.written(),
            &[0x40, 0x00, 0x00, 0x09, 0x00, 0x00, 0x01, 0x00, 0x04, b'p', b'a', b's', b's']
        );
        assert_eq!(auth.payload_size(), 13);

        let mut reader = TpmReader::new(&buf[..13]);
        assert_eq!(AuthCommand::unmarshal(&mut reader).unwrap(), auth);
    }

    #[test]
    fn test_attach_shifts_parameters() {
        let mut context = encoded_nv_write(ContextConfig::default());
        let before = context.command_bytes().to_vec();
        let params = context.command_parameters().unwrap().to_vec();
        assert_eq!(params.len(), 12);

        // 9 + 7 + 7 and 9 + 11 + 11
        let auths = [
            hmac_session(&[0xa1; 7], &[0xb1; 7]),
            hmac_session(&[0xa2; 11], &[0xb2; 11]),
        ];
        assert_eq!(auths[0].payload_size(), 23);
        assert_eq!(auths[1].payload_size(), 31);
        context.attach_authorizations(&auths).unwrap();

        let after = context.command_bytes();
        assert_eq!(after.len(), before.len() + 4 + 54);
        assert_eq!(&after[..2], &[0x80, 0x02]);
        assert_eq!(&after[2..6], &(after.len() as u32).to_be_bytes());
        // handles are untouched
        assert_eq!(&after[6..18], &before[6..18]);
        assert_eq!(&after[18..22], &54u32.to_be_bytes());
        assert_eq!(&after[22..26], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&after[after.len() - 12..], params.as_slice());

        assert_eq!(context.command_parameters().unwrap(), params.as_slice());
        assert_eq!(context.command_param().unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(context.auth_count(), 2);

        assert!(matches!(
            context.attach_authorizations(&auths),
            Err(TssError::AuthorizationsAlreadyAttached("TPM2_NV_Write"))
        ));
    }

    #[test]
    fn test_attach_without_command() {
        let mut context = MarshalContext::default();
        context.attach_authorizations(&[]).unwrap();
        assert!(matches!(
            context.attach_authorizations(&[AuthCommand::password(&[]).unwrap()]),
            Err(TssError::NoCommandLoaded)
        ));
    }

    #[test]
    fn test_attach_overflow_leaves_command_unmodified() {
        let mut context = encoded_nv_write(ContextConfig {
            max_command_size: 64,
            max_response_size: 64,
        });
        let before = context.command_bytes().to_vec();

        let auths = [hmac_session(&[0; 32], &[0; 32])];
        let err = context.attach_authorizations(&auths).unwrap_err();
        assert!(matches!(
            err,
            TssError::BufferOverflow {
                needed: 107,
                capacity: 64
            }
        ));
        assert_eq!(context.command_bytes(), before);
        assert_eq!(context.auth_count(), 0);
    }

    #[test]
    fn test_attach_rejects_oversized_hmac() {
        let mut context = encoded_nv_write(ContextConfig::default());
        let before = context.command_bytes().to_vec();

        let auths = [
            AuthCommand::password(b"owner").unwrap(),
            hmac_session(&[0; 16], &[0; MAX_HASH_SIZE + 1]),
        ];
        let err = context.attach_authorizations(&auths).unwrap_err();
        assert!(matches!(
            err,
            TssError::InvalidAuthorization {
                index: 1,
                error: MarshalError::SizeTooLarge { what: "hmac", .. }
            }
        ));
        assert_eq!(context.command_bytes(), before);
    }

    #[test]
    fn test_extract_mirrored_authorizations() {
        let mut context = encoded_nv_write(ContextConfig::default());
        let auths = [
            AuthCommand::password(b"owner").unwrap(),
            hmac_session(&[0x11; 32], &[0x22; 32]),
        ];
        context.attach_authorizations(&auths).unwrap();
        context
            .load_response(&mirrored_response(&auths, &[]))
            .unwrap();

        let mut responses = [AuthResponse::default(); 2];
        assert_eq!(
            context
                .extract_response_authorizations(&mut responses)
                .unwrap(),
            2
        );
        for (response, auth) in responses.iter().zip(&auths) {
            assert_eq!(response.nonce, auth.nonce);
            assert_eq!(response.attributes, auth.attributes);
            assert_eq!(response.hmac, auth.hmac);
        }
        context.decode(None).unwrap();
    }

    #[test]
    fn test_extract_count_mismatch() {
        let mut context = encoded_nv_write(ContextConfig::default());
        let auths = [AuthCommand::password(b"owner").unwrap()];
        context.attach_authorizations(&auths).unwrap();

        // sessions tag with an empty authorization area
        context.load_response(&mirrored_response(&[], &[])).unwrap();
        let mut responses = [AuthResponse::default(); 1];
        assert!(matches!(
            context.extract_response_authorizations(&mut responses),
            Err(TssError::AuthCountMismatch {
                sent: 1,
                received: 0
            })
        ));

        // more records than the caller expected
        let mut context = encoded_nv_write(ContextConfig::default());
        context.attach_authorizations(&auths).unwrap();
        context
            .load_response(&mirrored_response(&[auths[0], auths[0]], &[]))
            .unwrap();
        assert!(matches!(
            context.extract_response_authorizations(&mut responses),
            Err(TssError::TrailingBytes(10))
        ));
    }

    #[test]
    fn test_extract_trailing_bytes() {
        let mut context = encoded_nv_write(ContextConfig::default());
        let auths = [AuthCommand::password(b"owner").unwrap()];
        context.attach_authorizations(&auths).unwrap();

        let mut response = mirrored_response(&auths, &[]);
        response.extend_from_slice(&[0xee; 3]);
        let size = response.len() as u32;
        response[2..6].copy_from_slice(&size.to_be_bytes());
        context.load_response(&response).unwrap();

        let mut responses = [AuthResponse::default(); 1];
        assert!(matches!(
            context.extract_response_authorizations(&mut responses),
            Err(TssError::TrailingBytes(3))
        ));
    }

    #[test]
    fn test_extract_without_sessions() {
        let mut context = encoded_nv_write(ContextConfig::default());
        context
            .load_response(&[0x80, 0x01, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(context.extract_response_authorizations(&mut []).unwrap(), 0);
    }
}
