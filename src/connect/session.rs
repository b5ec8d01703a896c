// src/connect/session.rs

use crate::connect::secrets::Redacted;
use crate::connect::{ConnectError, ConnectResult};
use crate::constants::LIVENESS_PROBE_QUERY;
use crate::models::{AuthMode, ConfigTree, ConfigTreeExt, JsonMap, QualifiedKey};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// One result row, column name to value.
pub type Row = JsonMap;

/// A live warehouse session provided by an external client library.
pub trait Session: Send + Sync + fmt::Debug {
    /// Runs a statement and collects its rows.
    ///
    /// # Errors
    /// Implementations report failures as `ConnectError::Session`.
    fn sql(&self, query: &str) -> ConnectResult<Vec<Row>>;

    /// Ends the session. Closing twice must be harmless.
    ///
    /// # Errors
    /// Implementations report failures as `ConnectError::Session`.
    fn close(&self) -> ConnectResult<()>;
}

/// Opens [`Session`]s. This is the only place the crate touches the warehouse.
pub trait SessionFactory: Send + Sync + fmt::Debug {
    /// # Errors
    /// Implementations report failures as `ConnectError::Session` or
    /// `ConnectError::AuthFailure`.
    fn create_session(&self, params: &SessionParams) -> ConnectResult<Arc<dyn Session>>;
}

/// How a session authenticates. Secret material is never printed.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    /// A decrypted PKCS#8 private key in DER form.
    KeyPair { private_key_der: Vec<u8> },
    ExternalBrowser,
    OAuthToken(String),
}

impl Credential {
    /// The `authenticator` name understood by Snowflake clients.
    pub fn authenticator(&self) -> &'static str {
        match self {
            Credential::Password(_) => "snowflake",
            Credential::KeyPair { .. } => "snowflake_jwt",
            Credential::ExternalBrowser => "externalbrowser",
            Credential::OAuthToken(_) => "oauth",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.debug_tuple("Password").field(&Redacted).finish(),
            Credential::KeyPair { private_key_der } => f
                .debug_struct("KeyPair")
                .field("private_key_der", &format_args!("<{} bytes>", private_key_der.len()))
                .finish(),
            Credential::ExternalBrowser => f.write_str("ExternalBrowser"),
            Credential::OAuthToken(_) => f.debug_tuple("OAuthToken").field(&Redacted).finish(),
        }
    }
}

/// Everything a [`SessionFactory`] needs to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub account: String,
    pub user: String,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub credential: Credential,
}

impl SessionParams {
    /// Takes the connection coordinates from a data connect entry.
    /// A `user` given here replaces the configured one.
    pub fn from_config(params: &ConfigTree, user: Option<String>, credential: Credential) -> Self {
        let text = |k: &str| params.get_str(k).map(str::to_string).filter(|s| !s.is_empty());
        Self {
            account: text("account").unwrap_or_default(),
            user: user.or_else(|| text("user")).unwrap_or_default(),
            role: text("role"),
            warehouse: text("warehouse"),
            database: text("database"),
            schema: text("schema"),
            credential,
        }
    }
}

/// What a connection wraps.
#[derive(Debug, Clone)]
pub enum Resource {
    Session(Arc<dyn Session>),
    /// A local file or directory.
    Path(PathBuf),
    /// A plain `host:port` endpoint.
    Endpoint(String),
}

/// A connection handed out by the registry. Each construction gets a new id,
/// so a recreated connection is distinguishable from the one it replaced.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    key: QualifiedKey,
    auth: AuthMode,
    resource: Resource,
}

impl ConnectionHandle {
    pub fn new(key: QualifiedKey, auth: AuthMode, resource: Resource) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            auth,
            resource,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &QualifiedKey {
        &self.key
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        match &self.resource {
            Resource::Session(s) => Some(s),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.resource {
            Resource::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the session, or `TypeMismatch` for file and endpoint connections.
    ///
    /// # Errors
    /// See above.
    pub fn require_session(&self) -> ConnectResult<&Arc<dyn Session>> {
        self.session().ok_or_else(|| ConnectError::TypeMismatch {
            key: self.key.to_string(),
            expected: "a session connection".to_string(),
            found: self.kind_name().to_string(),
        })
    }

    /// Cheap round trip to the underlying resource.
    pub fn probe(&self) -> bool {
        match &self.resource {
            Resource::Session(session) => match session.sql(LIVENESS_PROBE_QUERY) {
                Ok(rows) => !rows.is_empty(),
                Err(e) => {
                    log::warn!("Liveness probe failed for '{}': {}", self.key, e);
                    false
                }
            },
            Resource::Path(p) => p.exists(),
            Resource::Endpoint(_) => true,
        }
    }

    /// Releases the underlying resource. Only sessions hold anything to release.
    ///
    /// # Errors
    /// Propagates the session's close error.
    pub fn close(&self) -> ConnectResult<()> {
        match &self.resource {
            Resource::Session(session) => session.close(),
            Resource::Path(_) | Resource::Endpoint(_) => Ok(()),
        }
    }

    fn kind_name(&self) -> &'static str {
        match &self.resource {
            Resource::Session(_) => "session",
            Resource::Path(_) => "path",
            Resource::Endpoint(_) => "endpoint",
        }
    }
}
