// src/connect/mod.rs

//! Connections declared under `[app_connects]`: shared service sessions,
//! per-user sessions, file handles and OAuth grant flows.

pub mod file;
pub mod keypair;
pub mod manager;
pub mod oauth;
pub mod registry;
pub mod secrets;
pub mod session;
pub mod statement;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

use crate::core::config_resolver::ConfigError;
use thiserror::Error;

pub use manager::ConnectManager;
pub use oauth::{OAuthConnect, OAuthError, TokenContext};
pub use registry::{ConnectionRegistry, ConnectionState, search_default_key};
pub use secrets::{EnvSecrets, SecretSource};
pub use session::{ConnectionHandle, Credential, Resource, Row, Session, SessionFactory, SessionParams};

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Connection '{key}' is not defined under [app_connects].")]
    ConnectionConfig { key: String },
    #[error("Authentication failed for '{key}': {reason}")]
    AuthFailure { key: String, reason: String },
    #[error("Environment variable '{var}' is not set.")]
    MissingEnv { var: String },
    #[error("Connection '{key}' is missing required field '{field}'.")]
    MissingField { key: String, field: String },
    #[error("Connection '{key}' points at '{path}', which does not exist.")]
    MissingPath { key: String, path: String },
    #[error("Connection '{key}' declares '{found}', expected {expected}.")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },
    #[error("No '{family}' connection supports authentication '{auth}'.")]
    Unsupported { family: String, auth: String },
    #[error("Session error: {0}")]
    Session(String),
    #[error("'{statement}' is not a {kind} statement.")]
    InvalidStatement { kind: String, statement: String },
    #[error("Connection '{key}' is closed.")]
    Closed { key: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    OAuth(#[from] OAuthError),
}

pub type ConnectResult<T> = Result<T, ConnectError>;
