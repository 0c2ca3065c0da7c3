// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Full command execution: marshal, authorize, transmit, and unmarshal.

use crate::auth::AuthCommand;
use crate::auth::AuthResponse;
use crate::commands::CommandParameters;
use crate::commands::ResponseParameters;
use crate::context::MarshalContext;
use crate::error::TssError;
use crate::tpm20proto::ResponseCode;
use crate::transport::TpmTransport;

pub type CipherError = Box<dyn std::error::Error + Send + Sync>;

/// Session parameter encryption, driven by the `decrypt` and `encrypt`
/// session attributes.
///
/// Ciphertext must have the same length as plaintext, since both replace
/// the first parameter in place.
pub trait ParameterCipher: Send {
    /// Encrypt the first command parameter.
    fn encrypt_command_param(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
    /// Decrypt the first response parameter.
    fn decrypt_response_param(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// One authorization session of a command, holding the record sent and,
/// after execution, the record received.
#[derive(Debug, Clone)]
pub struct SessionAuth {
    pub command: AuthCommand,
    pub response: AuthResponse,
}

impl SessionAuth {
    pub fn new(command: AuthCommand) -> Self {
        Self {
            command,
            response: AuthResponse::default(),
        }
    }
}

/// A marshaling context bound to a transport.
pub struct TssContext<T> {
    context: MarshalContext,
    transport: T,
    cipher: Option<Box<dyn ParameterCipher>>,
}

impl<T: TpmTransport> TssContext<T> {
    pub fn new(transport: T) -> Self {
        Self::with_context(transport, MarshalContext::default())
    }

    pub fn with_context(transport: T, context: MarshalContext) -> Self {
        Self {
            context,
            transport,
            cipher: None,
        }
    }

    /// Install the cipher used for sessions with `decrypt` or `encrypt` set.
    pub fn set_parameter_cipher(&mut self, cipher: Box<dyn ParameterCipher>) {
        self.cipher = Some(cipher);
    }

    /// The context of the last executed command.
    pub fn context(&self) -> &MarshalContext {
        &self.context
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Execute `command_code` and decode its response into `output`.
    ///
    /// On success each session's `response` holds the authorization the TPM
    /// returned. A non-zero response code fails with
    /// [`TssError::TpmCommandFailed`].
    pub fn execute(
        &mut self,
        command_code: u32,
        input: Option<&CommandParameters>,
        output: Option<&mut ResponseParameters>,
        sessions: &mut [SessionAuth],
    ) -> Result<(), TssError> {
        self.context.encode(command_code, input)?;

        let authorizations: Vec<AuthCommand> = sessions.iter().map(|s| s.command).collect();
        self.context.attach_authorizations(&authorizations)?;

        if sessions.iter().any(|s| s.command.attributes.decrypt()) {
            let cipher = self
                .cipher
                .as_mut()
                .ok_or(TssError::MissingParameterCipher)?;
            let ciphertext = cipher
                .encrypt_command_param(self.context.command_param()?)
                .map_err(TssError::ParameterCipher)?;
            self.context.overlay_command_param(&ciphertext)?;
        }

        self.context.transmit(&mut self.transport)?;

        let name = self.context.command_name().unwrap_or_default();
        let response_code = self.context.response_code()?;
        if response_code != ResponseCode::Success as u32 {
            tracing::warn!(
                kind = ?ResponseCode::from_u32(response_code),
                "{name} failed, response code: {response_code:#x}"
            );
            return Err(TssError::TpmCommandFailed {
                command: name,
                response_code,
            });
        }

        if sessions.iter().any(|s| s.command.attributes.encrypt()) {
            let cipher = self
                .cipher
                .as_mut()
                .ok_or(TssError::MissingParameterCipher)?;
            let plaintext = cipher
                .decrypt_response_param(self.context.response_param()?)
                .map_err(TssError::ParameterCipher)?;
            self.context.overlay_response_param(&plaintext)?;
        }

        self.context.decode(output)?;

        let mut responses = vec![AuthResponse::default(); sessions.len()];
        self.context.extract_response_authorizations(&mut responses)?;
        for (session, response) in sessions.iter_mut().zip(responses) {
            session.response = response;
        }

        tracing::debug!(command = name, sessions = sessions.len(), "executed command");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::GetRandomIn;
    use crate::commands::NvReadIn;
    use crate::commands::NvReadOut;
    use crate::commands::NvWriteIn;
    use crate::tpm20proto::protocol::Tpm2bBuffer;
    use crate::tpm20proto::CommandCodeEnum;
    use crate::tpm20proto::ReservedHandle;
    use crate::tpm20proto::TpmaSessionBits;
    use crate::tpm20proto::TPM20_RH_OWNER;
    use crate::transport::TransportError;
    use test_log::test;

    /// Returns canned responses and records every command it sees.
    #[derive(Default)]
    struct MockTransport {
        responses: Vec<Vec<u8>>,
        commands: Vec<Vec<u8>>,
    }

    impl TpmTransport for MockTransport {
        fn transmit(&mut self, command: &[u8], response: &mut [u8]) -> Result<usize, TransportError> {
            self.commands.push(command.to_vec());
            if self.responses.is_empty() {
                Err(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()))?
            }
            let reply = self.responses.remove(0);
            let capacity = response.len();
            response
                .get_mut(..reply.len())
                .ok_or(TransportError::ResponseTooLarge {
                    size: reply.len(),
                    capacity,
                })?
                .copy_from_slice(&reply);
            Ok(reply.len())
        }
    }

    /// XOR with a fixed byte.
    struct XorCipher(u8);

    impl ParameterCipher for XorCipher {
        fn encrypt_command_param(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
            Ok(plaintext.iter().map(|b| b ^ self.0).collect())
        }

        fn decrypt_response_param(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
            Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
        }
    }

    fn response(tag: u16, response_code: u32, body: &[u8]) -> Vec<u8> {
        let mut bytes = tag.to_be_bytes().to_vec();
        bytes.extend_from_slice(&((10 + body.len()) as u32).to_be_bytes());
        bytes.extend_from_slice(&response_code.to_be_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    /// Parameter size, parameters, then one empty continued-session
    /// acknowledgement.
    fn session_body(params: &[u8]) -> Vec<u8> {
        let mut body = (params.len() as u32).to_be_bytes().to_vec();
        body.extend_from_slice(params);
        body.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x00]);
        body
    }

    fn password_session(attributes: TpmaSessionBits) -> SessionAuth {
        let mut auth = AuthCommand::password(b"owner").unwrap();
        auth.attributes = attributes;
        SessionAuth::new(auth)
    }

    #[test]
    fn test_execute_without_sessions() {
        let mut transport = MockTransport::default();
        transport
            .responses
            .push(response(0x8001, 0, &[0x00, 0x02, 0xaa, 0xbb]));
        let mut tss = TssContext::new(transport);

        let input: CommandParameters = GetRandomIn { bytes_requested: 2 }.into();
        let mut output = ResponseParameters::default();
        tss.execute(
            CommandCodeEnum::GetRandom as u32,
            Some(&input),
            Some(&mut output),
            &mut [],
        )
        .unwrap();

        let ResponseParameters::GetRandom(out) = output else {
            panic!("unexpected response variant");
        };
        assert_eq!(out.random_bytes.data(), &[0xaa, 0xbb]);
        assert_eq!(
            tss.transport_mut().commands[0],
            &[0x80, 0x01, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x01, 0x7b, 0x00, 0x02]
        );
    }

    #[test]
    fn test_execute_with_password_session() {
        let mut transport = MockTransport::default();
        transport
            .responses
            .push(response(0x8002, 0, &session_body(&[0x00, 0x01, 0x42])));
        let mut tss = TssContext::new(transport);

        let input: CommandParameters = NvReadIn {
            auth_handle: TPM20_RH_OWNER,
            nv_index: ReservedHandle::from(0x01400001),
            size: 1,
            offset: 0,
        }
        .into();
        let mut output = ResponseParameters::default();
        let mut sessions = [password_session(
            TpmaSessionBits::new().with_continue_session(true),
        )];
        tss.execute(
            CommandCodeEnum::NV_Read as u32,
            Some(&input),
            Some(&mut output),
            &mut sessions,
        )
        .unwrap();

        assert_eq!(
            output,
            ResponseParameters::NvRead(NvReadOut {
                data: Tpm2bBuffer::new(&[0x42]).unwrap()
            })
        );
        assert!(sessions[0].response.attributes.continue_session());
        assert_eq!(tss.context().auth_count(), 1);

        let command = &tss.transport_mut().commands[0];
        assert_eq!(&command[..2], &[0x80, 0x02]);
        // auth size follows the two handles
        assert_eq!(&command[18..22], &14u32.to_be_bytes());
    }

    #[test]
    fn test_execute_tpm_failure() {
        let mut transport = MockTransport::default();
        transport.responses.push(response(0x8001, 0x98e, &[]));
        let mut tss = TssContext::new(transport);

        let input: CommandParameters = NvWriteIn {
            auth_handle: TPM20_RH_OWNER,
            nv_index: ReservedHandle::from(0x01400001),
            data: Tpm2bBuffer::new(b"x").unwrap(),
            offset: 0,
        }
        .into();
        let mut sessions = [password_session(TpmaSessionBits::new())];
        let err = tss
            .execute(
                CommandCodeEnum::NV_Write as u32,
                Some(&input),
                None,
                &mut sessions,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TssError::TpmCommandFailed {
                command: "TPM2_NV_Write",
                response_code: 0x98e
            }
        ));
    }

    #[test]
    fn test_execute_parameter_encryption() {
        let mut transport = MockTransport::default();
        // NV_Read returns "hi" encrypted with the session cipher
        transport
            .responses
            .push(response(0x8002, 0, &session_body(&[0x00, 0x02, b'h' ^ 0x5a, b'i' ^ 0x5a])));
        // NV_Write returns no parameters
        transport
            .responses
            .push(response(0x8002, 0, &session_body(&[])));
        let mut tss = TssContext::new(transport);
        tss.set_parameter_cipher(Box::new(XorCipher(0x5a)));

        let attributes = TpmaSessionBits::new()
            .with_continue_session(true)
            .with_decrypt(true)
            .with_encrypt(true);

        let read: CommandParameters = NvReadIn {
            auth_handle: TPM20_RH_OWNER,
            nv_index: ReservedHandle::from(0x01400001),
            size: 2,
            offset: 0,
        }
        .into();
        let mut output = ResponseParameters::default();
        let mut sessions = [password_session(attributes.with_decrypt(false))];
        tss.execute(
            CommandCodeEnum::NV_Read as u32,
            Some(&read),
            Some(&mut output),
            &mut sessions,
        )
        .unwrap();
        assert_eq!(
            output,
            ResponseParameters::NvRead(NvReadOut {
                data: Tpm2bBuffer::new(b"hi").unwrap()
            })
        );

        let write: CommandParameters = NvWriteIn {
            auth_handle: TPM20_RH_OWNER,
            nv_index: ReservedHandle::from(0x01400001),
            data: Tpm2bBuffer::new(b"hi").unwrap(),
            offset: 0,
        }
        .into();
        let mut sessions = [password_session(attributes.with_encrypt(false))];
        tss.execute(
            CommandCodeEnum::NV_Write as u32,
            Some(&write),
            None,
            &mut sessions,
        )
        .unwrap();

        let command = tss.transport_mut().commands[1].clone();
        let param = &command[command.len() - 6..];
        assert_eq!(param, &[0x00, 0x02, b'h' ^ 0x5a, b'i' ^ 0x5a, 0x00, 0x00]);
    }

    #[test]
    fn test_execute_transport_failure() {
        let mut tss = TssContext::new(MockTransport::default());
        let input: CommandParameters = GetRandomIn { bytes_requested: 8 }.into();
        let mut output = ResponseParameters::default();
        let err = tss
            .execute(
                CommandCodeEnum::GetRandom as u32,
                Some(&input),
                Some(&mut output),
                &mut [],
            )
            .unwrap_err();
        assert!(matches!(
            &err,
            TssError::Transport {
                command: "TPM2_GetRandom",
                error: TransportError::Io(e),
            } if e.kind() == std::io::ErrorKind::BrokenPipe
        ));
        assert_eq!(tss.transport_mut().commands.len(), 1);
        assert_eq!(output, ResponseParameters::default());
    }

    #[test]
    fn test_execute_encryption_without_cipher() {
        let mut tss = TssContext::new(MockTransport::default());
        let input: CommandParameters = NvWriteIn {
            auth_handle: TPM20_RH_OWNER,
            nv_index: ReservedHandle::from(0x01400001),
            data: Tpm2bBuffer::new(b"x").unwrap(),
            offset: 0,
        }
        .into();
        let mut sessions = [password_session(TpmaSessionBits::new().with_decrypt(true))];
        assert!(matches!(
            tss.execute(
                CommandCodeEnum::NV_Write as u32,
                Some(&input),
                None,
                &mut sessions,
            ),
            Err(TssError::MissingParameterCipher)
        ));
        assert!(tss.transport_mut().commands.is_empty());
    }
}
