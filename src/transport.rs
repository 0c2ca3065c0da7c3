// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The byte transport beneath the marshaling layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("TPM device I/O failed")]
    Io(#[source] std::io::Error),
    #[error("response of {size} bytes does not fit the {capacity} byte buffer")]
    ResponseTooLarge { size: usize, capacity: usize },
}

/// Blocking command/response exchange with a TPM.
pub trait TpmTransport {
    /// Send `command` and write the complete response into `response`,
    /// returning the number of response bytes.
    fn transmit(&mut self, command: &[u8], response: &mut [u8]) -> Result<usize, TransportError>;
}

impl<T: TpmTransport + ?Sized> TpmTransport for &mut T {
    fn transmit(&mut self, command: &[u8], response: &mut [u8]) -> Result<usize, TransportError> {
        (**self).transmit(command, response)
    }
}

impl<T: TpmTransport + ?Sized> TpmTransport for Box<T> {
    fn transmit(&mut self, command: &[u8], response: &mut [u8]) -> Result<usize, TransportError> {
        (**self).transmit(command, response)
    }
}
