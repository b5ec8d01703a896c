// src/setup/data_setup.rs

use crate::connect::registry::ConnectionRegistry;
use crate::connect::statement;
use crate::connect::{ConnectError, ConnectResult};
use crate::constants::{K_DATA_CONNECT_REF, STAGE_KEY_PREFIX};
use crate::models::{ConfigTree, ConfigTreeExt, QualifiedKey};
use std::path::PathBuf;

/// One `[data_setups.<group>.<item>]` entry: the data connect it works
/// against and the stages it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSetup {
    key: QualifiedKey,
    data_connect: Option<String>,
    stages: Vec<String>,
    config: ConfigTree,
}

impl DataSetup {
    /// Stage names are the values of every `stage*` key, in key order.
    pub fn from_config(key: QualifiedKey, config: ConfigTree) -> Self {
        let mut stage_keys: Vec<&String> = config
            .keys()
            .filter(|k| k.starts_with(STAGE_KEY_PREFIX))
            .collect();
        stage_keys.sort();
        let stages = stage_keys
            .into_iter()
            .filter_map(|k| config.get_str(k))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            data_connect: config
                .get_str(K_DATA_CONNECT_REF)
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
            stages,
            key,
            config,
        }
    }

    pub fn key(&self) -> &QualifiedKey {
        &self.key
    }

    /// The referenced data connect, if any. `None` means the registry default.
    pub fn data_connect(&self) -> Option<&str> {
        self.data_connect.as_deref()
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    /// Creates one stage (or, with `None`, every configured stage) through
    /// the setup's Snowflake connection. Returns the stages created.
    ///
    /// # Errors
    /// * `TypeMismatch` if the data connect is not a shared session.
    /// * `InvalidStatement` for a stage name that is not a plain identifier.
    /// * Any session error.
    pub fn create_stages(&self, registry: &ConnectionRegistry, stage: Option<&str>) -> ConnectResult<Vec<String>> {
        let names: Vec<String> = match stage.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => vec![name.to_string()],
            None => self.stages.clone(),
        };
        if names.is_empty() {
            log::warn!("Data setup '{}' declares no stages.", self.key);
            return Ok(names);
        }

        let handle = registry
            .get_connection(self.data_connect())?
            .ok_or_else(|| ConnectError::TypeMismatch {
                key: self.data_connect().unwrap_or_default().to_string(),
                expected: "a shared snowflake session".to_string(),
                found: "a user-session connect".to_string(),
            })?;
        let session = handle.require_session()?;

        for name in &names {
            let ddl = format!("CREATE STAGE IF NOT EXISTS {}", name);
            if !is_identifier(name) {
                return Err(ConnectError::InvalidStatement {
                    kind: statement::StatementKind::Ddl.to_string(),
                    statement: ddl,
                });
            }
            statement::ddl(&**session, &ddl)?;
            log::info!("Stage '{}' is ready ({}).", name, self.key);
        }
        Ok(names)
    }

    /// The local path behind the setup's file connect, optionally joined
    /// with `file_name`.
    ///
    /// # Errors
    /// `TypeMismatch` if the data connect is not a file connect.
    pub fn data_path(&self, registry: &ConnectionRegistry, file_name: Option<&str>) -> ConnectResult<PathBuf> {
        let handle = registry.get_connection(self.data_connect())?;
        let Some(path) = handle.as_ref().and_then(|h| h.path()) else {
            return Err(ConnectError::TypeMismatch {
                key: self.data_connect().unwrap_or_default().to_string(),
                expected: "a file connect".to_string(),
                found: "a session connect".to_string(),
            });
        };
        Ok(match file_name.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => path.join(name),
            None => path.to_path_buf(),
        })
    }
}

/// Snowflake identifiers, optionally database/schema qualified.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}
