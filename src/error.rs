// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::marshal::MarshalError;
use crate::marshal::UnmarshalError;
use crate::transport::TransportError;
use std::fmt;
use thiserror::Error;

/// The lookup table a command code was missing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTable {
    /// The marshaling registry
    Registry,
    /// The command policy (handle counts and authorization roles)
    Policy,
}

impl fmt::Display for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTable::Registry => f.write_str("command registry"),
            CommandTable::Policy => f.write_str("command policy"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TssError {
    #[error("command code {command_code:#x} not found in the {table}")]
    UnknownCommand {
        command_code: u32,
        table: CommandTable,
    },
    #[error("{0} requires a parameter structure")]
    MissingInput(&'static str),
    #[error("{0} does not take a parameter structure")]
    UnexpectedInput(&'static str),
    #[error("{0} requires a response parameter structure")]
    MissingOutput(&'static str),
    #[error("{0} does not return decodable response parameters")]
    UnexpectedOutput(&'static str),
    #[error("failed to encode {command}")]
    Encode {
        command: &'static str,
        #[source]
        error: MarshalError,
    },
    #[error("encoded parameters of {command} failed validation")]
    InvalidEncoding {
        command: &'static str,
        #[source]
        error: UnmarshalError,
    },
    #[error("failed to decode the response of {command}")]
    Decode {
        command: &'static str,
        #[source]
        error: UnmarshalError,
    },
    #[error("authorization record {index} is invalid")]
    InvalidAuthorization {
        index: usize,
        #[source]
        error: MarshalError,
    },
    #[error("authorization area overflows the command buffer - required size > capacity: {needed} > {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },
    #[error("authorizations are already attached to {0}")]
    AuthorizationsAlreadyAttached(&'static str),
    #[error("no command is loaded in the marshaling context")]
    NoCommandLoaded,
    #[error("replacement size {actual} does not match the parameter size {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("parameter field at offset {offset} with size {size} exceeds the parameter area end {limit}")]
    ParameterOutOfBounds {
        offset: usize,
        size: usize,
        limit: usize,
    },
    #[error("{0} unparsed bytes at the end of the response")]
    TrailingBytes(usize),
    #[error("response carries {received} authorizations, command carried {sent}")]
    AuthCountMismatch { sent: usize, received: usize },
    #[error("command handle index {index} out of range, command has {count} handles")]
    BadHandleIndex { index: usize, count: usize },
    #[error("malformed response")]
    MalformedResponse(#[source] UnmarshalError),
    #[error("response size {size} exceeds the response buffer capacity {capacity}")]
    ResponseTooLarge { size: usize, capacity: usize },
    #[error("response header size {header} does not match the received size {received}")]
    ResponseSizeMismatch { header: usize, received: usize },
    #[error("failed to transmit {command}")]
    Transport {
        command: &'static str,
        #[source]
        error: TransportError,
    },
    #[error("{command} failed, response code: {response_code:#x}")]
    TpmCommandFailed {
        command: &'static str,
        response_code: u32,
    },
    #[error("session requests parameter encryption but no parameter cipher is configured")]
    MissingParameterCipher,
    #[error("parameter cipher failed")]
    ParameterCipher(#[source] Box<dyn std::error::Error + Send + Sync>),
}
