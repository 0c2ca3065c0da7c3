// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM 2.0 command marshaling and session authorization.
//!
//! A [`MarshalContext`] encodes a command from typed parameters, inserts
//! session authorization records between the handles and the parameters,
//! and on the way back parses the response parameters and authorization
//! area. [`TssContext`] drives a full exchange over a [`TpmTransport`],
//! including in-place parameter encryption.

#![forbid(unsafe_code)]

pub mod auth;
pub mod commands;
pub mod context;
pub mod error;
pub mod execute;
pub mod marshal;
pub mod policy;
pub mod registry;
pub mod tpm20proto;
pub mod transport;

pub use auth::AuthCommand;
pub use auth::AuthResponse;
pub use commands::CommandParameters;
pub use commands::ResponseParameters;
pub use context::ContextConfig;
pub use context::MarshalContext;
pub use error::TssError;
pub use execute::ParameterCipher;
pub use execute::SessionAuth;
pub use execute::TssContext;
pub use policy::AuthRole;
pub use policy::CommandPolicy;
pub use policy::DefaultCommandPolicy;
pub use transport::TpmTransport;
