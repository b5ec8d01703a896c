// src/connect/registry.rs

//! The cache of live connections for one resolved configuration.
//!
//! Service connections (password, key-pair, client-credentials OAuth, files)
//! are shared: at most one handle per connect key, probed before every reuse
//! and rebuilt when the probe fails. User sessions (external browser,
//! delegated OAuth) are built on demand through
//! [`ConnectionRegistry::create_user_session`] and never cached.

use crate::connect::oauth::{OAuthConnect, TokenContext};
use crate::connect::secrets::{EnvSecrets, SecretSource};
use crate::connect::session::{ConnectionHandle, SessionFactory};
use crate::connect::strategy::{self, BuildContext, Builder};
use crate::connect::{ConnectError, ConnectResult};
use crate::constants::{
    DEFAULT_MARKER, K_AUTH_TYPE, K_INIT_LIST, K_OAUTH_CONNECT_REF, K_TYPE, POSITIONAL_MARKER,
};
use crate::core::config_resolver::{ResolvedConfig, split_group_key};
use crate::models::{
    AuthMode, AuthType, ConfigTree, ConfigTreeExt, ConfigType, ConnectFamily, ConnectType, QualifiedKey,
};
use crate::state::lock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Lifecycle of one connect key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Created,
    /// Passed its last liveness probe.
    Active,
    /// Failed its last liveness probe; rebuilt on next access.
    Stale,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Created => "created",
            ConnectionState::Active => "active",
            ConnectionState::Stale => "stale",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A data connect entry with its type and effective auth mode worked out.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectSpec {
    pub key: QualifiedKey,
    pub params: ConfigTree,
    pub connect_type: ConnectType,
    pub auth: AuthMode,
}

#[derive(Debug, Default)]
struct Entry {
    state: ConnectionState,
    handle: Option<ConnectionHandle>,
}

/// Picks the default entry of a group: the first sorted key containing
/// `default`, else the first ending in `_0`, else the first sorted key.
pub fn search_default_key(entries: &ConfigTree) -> Option<String> {
    let mut keys: Vec<&String> = entries.keys().collect();
    keys.sort();
    keys.iter()
        .find(|k| k.contains(DEFAULT_MARKER))
        .or_else(|| keys.iter().find(|k| k.ends_with(POSITIONAL_MARKER)))
        .or_else(|| keys.first())
        .map(|k| k.to_string())
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    config: Arc<ResolvedConfig>,
    factory: Arc<dyn SessionFactory>,
    secrets: Arc<dyn SecretSource>,
    connections: Mutex<HashMap<QualifiedKey, Entry>>,
    oauth: Mutex<HashMap<QualifiedKey, Arc<OAuthConnect>>>,
    current: Mutex<Option<QualifiedKey>>,
}

impl ConnectionRegistry {
    pub fn new(
        config: Arc<ResolvedConfig>,
        factory: Arc<dyn SessionFactory>,
        secrets: Arc<dyn SecretSource>,
    ) -> Self {
        Self {
            config,
            factory,
            secrets,
            connections: Mutex::new(HashMap::new()),
            oauth: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
        }
    }

    /// A registry reading secrets from the process environment.
    pub fn with_env_secrets(config: Arc<ResolvedConfig>, factory: Arc<dyn SessionFactory>) -> Self {
        Self::new(config, factory, Arc::new(EnvSecrets))
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    // --- Configuration ---

    /// Returns `[app_connects.<group>.<item>]` for `key`, which may omit the
    /// group. A blank key selects the group's default entry.
    ///
    /// # Errors
    /// * `MissingSection` (as `Config`) without an `[app_connects]` section.
    /// * `ConnectionConfig` if the entry is absent or `key` names another group.
    pub fn connect_config(&self, family: ConnectFamily, key: &str) -> ConnectResult<(QualifiedKey, ConfigTree)> {
        let qualified = self.qualify(family, key)?;
        let section = self.config.section(ConfigType::AppConnects)?;
        section
            .get_table(&qualified.group)
            .and_then(|g| g.get_table(&qualified.item))
            .cloned()
            .map(|params| (qualified.clone(), params))
            .ok_or_else(|| ConnectError::ConnectionConfig {
                key: format!("{}.{}", ConfigType::AppConnects, qualified),
            })
    }

    /// The default entry of a connect group, per [`search_default_key`].
    ///
    /// # Errors
    /// `ConnectionConfig` if the group is absent or holds no entries.
    pub fn default_key(&self, family: ConnectFamily) -> ConnectResult<QualifiedKey> {
        let group_name = family.group_name();
        let section = self.config.section(ConfigType::AppConnects)?;
        let entries: ConfigTree = section
            .get_table(group_name)
            .map(|g| {
                g.iter()
                    .filter(|(_, v)| v.is_table())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let item = search_default_key(&entries).ok_or_else(|| ConnectError::ConnectionConfig {
            key: format!("{}.{}", ConfigType::AppConnects, group_name),
        })?;
        Ok(QualifiedKey::new(group_name, item))
    }

    /// Reads a data connect's `type` and `auth_type`, following its
    /// `oauth_connect` reference for OAuth entries.
    ///
    /// # Errors
    /// `ConnectionConfig` for unknown keys or references, `TypeMismatch` for
    /// an unknown `auth_type`.
    pub fn describe(&self, key: &str) -> ConnectResult<ConnectSpec> {
        let (key, params) = self.connect_config(ConnectFamily::Data, key)?;
        let connect_type = ConnectType::from_name(params.get_str(K_TYPE).unwrap_or_default());
        let raw_auth = params.get_str(K_AUTH_TYPE).unwrap_or_default();
        let auth_type = AuthType::from_name(raw_auth).ok_or_else(|| ConnectError::TypeMismatch {
            key: key.to_string(),
            expected: "one of snowflake, keypair, externalbrowser, oauth".to_string(),
            found: raw_auth.to_string(),
        })?;
        let grant = match (auth_type, params.get_str(K_OAUTH_CONNECT_REF)) {
            (AuthType::OAuth, Some(reference)) => Some(self.oauth_connect(Some(reference))?.grant()),
            _ => None,
        };
        Ok(ConnectSpec {
            auth: AuthMode::resolve(auth_type, grant),
            key,
            params,
            connect_type,
        })
    }

    /// The effective auth mode of a data connect.
    ///
    /// # Errors
    /// Same as [`ConnectionRegistry::describe`].
    pub fn auth_mode(&self, key: &str) -> ConnectResult<AuthMode> {
        self.describe(key).map(|spec| spec.auth)
    }

    /// Whether `key` may be opened as a shared, process-wide connection.
    ///
    /// # Errors
    /// Same as [`ConnectionRegistry::describe`].
    pub fn is_service_connection(&self, key: &str) -> ConnectResult<bool> {
        self.auth_mode(key).map(|auth| auth.is_service())
    }

    // --- Shared connections ---

    /// Returns the shared connection for `key`, creating it on first use.
    /// Without a key, the current connection is used, or the default data
    /// connect when none has been opened yet.
    ///
    /// A cached handle is probed first; a stale one is closed and rebuilt
    /// once. User-session connects are never shared and yield `None`.
    ///
    /// # Errors
    /// Configuration errors, construction failures, or a rebuilt connection
    /// that still fails its probe.
    pub fn get_connection(&self, key: Option<&str>) -> ConnectResult<Option<ConnectionHandle>> {
        let spec = self.spec_for(key)?;
        if !spec.auth.is_service() {
            log::warn!(
                "'{}' authenticates per user ({:?}); use create_user_session instead.",
                spec.key,
                spec.auth
            );
            return Ok(None);
        }

        let mut connections = lock(&self.connections);
        let entry = connections.entry(spec.key.clone()).or_default();
        let cached = if entry.state == ConnectionState::Closed {
            None
        } else {
            entry.handle.clone()
        };

        let handle = match cached {
            Some(handle) if handle.probe() => {
                log::debug!("Reusing connection '{}' ({}).", spec.key, handle.id());
                entry.state = ConnectionState::Active;
                handle
            }
            Some(stale) => {
                log::warn!("Connection '{}' failed its liveness probe; reconnecting.", spec.key);
                entry.state = ConnectionState::Stale;
                entry.handle = None;
                if let Err(e) = stale.close() {
                    log::debug!("Closing stale connection '{}' failed: {}", spec.key, e);
                }
                let fresh = self.build_service(&spec)?;
                let alive = fresh.probe();
                entry.handle = Some(fresh.clone());
                if !alive {
                    return Err(ConnectError::Session(format!(
                        "connection '{}' is still unreachable after reconnecting",
                        spec.key
                    )));
                }
                entry.state = ConnectionState::Active;
                fresh
            }
            None => {
                let fresh = self.build_service(&spec)?;
                log::info!("Created connection '{}' ({}).", spec.key, fresh.id());
                entry.state = ConnectionState::Created;
                entry.handle = Some(fresh.clone());
                fresh
            }
        };
        drop(connections);

        self.set_current(&spec.key);
        Ok(Some(handle))
    }

    /// Builds a new shared connection for `key`, replacing (and closing) any
    /// cached one. User-session connects yield `None`.
    ///
    /// # Errors
    /// Any construction error. A key-pair connect whose key file cannot be
    /// read fails here with `AuthFailure`.
    pub fn create_connection(&self, key: Option<&str>) -> ConnectResult<Option<ConnectionHandle>> {
        let spec = self.spec_for(key)?;
        if !spec.auth.is_service() {
            log::info!("'{}' is a user-session connect; nothing shared to create.", spec.key);
            return Ok(None);
        }
        let fresh = self.build_service(&spec)?;

        let mut connections = lock(&self.connections);
        let entry = connections.entry(spec.key.clone()).or_default();
        if let Some(previous) = entry.handle.replace(fresh.clone()) {
            if entry.state != ConnectionState::Closed {
                if let Err(e) = previous.close() {
                    log::debug!("Closing replaced connection '{}' failed: {}", spec.key, e);
                }
            }
        }
        entry.state = ConnectionState::Created;
        drop(connections);

        log::info!("Created connection '{}' ({}).", spec.key, fresh.id());
        self.set_current(&spec.key);
        Ok(Some(fresh))
    }

    /// Whether the cached connection for `key` answers its probe. Always
    /// `false` for user-session connects and for keys with no open handle.
    pub fn is_currently_active(&self, key: Option<&str>) -> bool {
        let spec = match self.spec_for(key) {
            Ok(spec) => spec,
            Err(e) => {
                log::warn!("Cannot check connection activity: {}", e);
                return false;
            }
        };
        if !spec.auth.is_service() {
            return false;
        }

        let mut connections = lock(&self.connections);
        let Some(entry) = connections.get_mut(&spec.key) else {
            return false;
        };
        if entry.state == ConnectionState::Closed {
            return false;
        }
        let Some(handle) = &entry.handle else {
            return false;
        };
        let alive = handle.probe();
        entry.state = if alive {
            ConnectionState::Active
        } else {
            ConnectionState::Stale
        };
        alive
    }

    /// Closes the cached connection for `key` (or the current one). The next
    /// [`ConnectionRegistry::get_connection`] builds a fresh handle.
    ///
    /// # Errors
    /// Propagates the session's close error; the entry is marked closed regardless.
    pub fn close_connection(&self, key: Option<&str>) -> ConnectResult<()> {
        let qualified = match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) => self.qualify(ConnectFamily::Data, k)?,
            None => match self.current_key() {
                Some(k) => k,
                None => return Ok(()),
            },
        };

        let mut connections = lock(&self.connections);
        let Some(entry) = connections.get_mut(&qualified) else {
            log::debug!("No connection '{}' to close.", qualified);
            return Ok(());
        };
        entry.state = ConnectionState::Closed;
        match entry.handle.take() {
            Some(handle) => {
                log::info!("Closing connection '{}' ({}).", qualified, handle.id());
                handle.close()
            }
            None => Ok(()),
        }
    }

    /// Closes every cached connection.
    pub fn close_all(&self) {
        let mut connections = lock(&self.connections);
        for (key, entry) in connections.iter_mut() {
            if let Some(handle) = entry.handle.take() {
                if let Err(e) = handle.close() {
                    log::warn!("Closing connection '{}' failed: {}", key, e);
                }
            }
            entry.state = ConnectionState::Closed;
        }
    }

    // --- User sessions ---

    /// Builds a session for one end user from their token context. The
    /// result is not cached; the caller closes it.
    ///
    /// # Errors
    /// `TypeMismatch` if `key` is a shared (service) connect; otherwise any
    /// construction error.
    pub fn create_user_session(&self, key: Option<&str>, tokens: &TokenContext) -> ConnectResult<ConnectionHandle> {
        let spec = self.spec_for(key)?;
        let strategy = strategy::lookup(spec.connect_type, spec.auth)?;
        let Builder::User(build) = strategy.builder else {
            return Err(ConnectError::TypeMismatch {
                key: spec.key.to_string(),
                expected: "a user-session connect (externalbrowser or delegated oauth)".to_string(),
                found: format!("{:?}", spec.auth),
            });
        };
        let ctx = self.build_context(&spec)?;
        let handle = ConnectionHandle::new(spec.key.clone(), spec.auth, build(&ctx, tokens)?);
        log::info!("Created user session '{}' ({}).", spec.key, handle.id());
        Ok(handle)
    }

    // --- OAuth ---

    /// Returns the OAuth connect for `key` (or the default one), registering
    /// it on first use.
    ///
    /// # Errors
    /// `ConnectionConfig` for unknown keys, `OAuth` for an unknown grant type.
    pub fn oauth_connect(&self, key: Option<&str>) -> ConnectResult<Arc<OAuthConnect>> {
        let qualified = self.qualify(ConnectFamily::OAuth, key.unwrap_or_default())?;
        if let Some(connect) = lock(&self.oauth).get(&qualified) {
            return Ok(Arc::clone(connect));
        }

        let (qualified, params) = self.connect_config(ConnectFamily::OAuth, &qualified.to_string())?;
        let connect = Arc::new(OAuthConnect::new(qualified.clone(), &params, Arc::clone(&self.secrets))?);
        let mut oauth = lock(&self.oauth);
        Ok(Arc::clone(oauth.entry(qualified).or_insert(connect)))
    }

    /// Processes both `init_list`s: registers the listed OAuth connects and
    /// opens the listed data connects that can be shared. User-session
    /// connects in the data list are skipped.
    ///
    /// # Errors
    /// `ConnectionConfig` if a listed name is not defined; any construction error.
    pub fn init_connects(&self) -> ConnectResult<Vec<ConnectionHandle>> {
        let section = self.config.section(ConfigType::AppConnects)?;
        let init_list = |family: ConnectFamily| {
            section
                .get_table(family.group_name())
                .map(|g| g.get_string_list(K_INIT_LIST))
                .unwrap_or_default()
        };

        for name in init_list(ConnectFamily::OAuth) {
            let connect = self.oauth_connect(Some(&name))?;
            log::debug!("Registered OAuth connect '{}'.", connect.key());
        }

        let mut opened = Vec::new();
        for name in init_list(ConnectFamily::Data) {
            let spec = self.describe(&name)?;
            if !spec.auth.is_service() {
                log::info!("Skipping user-session connect '{}' at init.", spec.key);
                continue;
            }
            if let Some(handle) = self.get_connection(Some(&spec.key.to_string()))? {
                opened.push(handle);
            }
        }
        Ok(opened)
    }

    // --- State ---

    /// Lifecycle state of a data connect key.
    pub fn state(&self, key: &str) -> ConnectionState {
        self.qualify(ConnectFamily::Data, key)
            .ok()
            .and_then(|k| lock(&self.connections).get(&k).map(|e| e.state))
            .unwrap_or_default()
    }

    /// The connection most recently handed out or created.
    pub fn current_key(&self) -> Option<QualifiedKey> {
        lock(&self.current).clone()
    }

    // --- Helpers ---

    fn qualify(&self, family: ConnectFamily, key: &str) -> ConnectResult<QualifiedKey> {
        let QualifiedKey { group, item } = split_group_key(key);
        if item.is_empty() {
            return self.default_key(family);
        }
        if !group.is_empty() && group != family.group_name() {
            return Err(ConnectError::ConnectionConfig { key: key.to_string() });
        }
        Ok(QualifiedKey::new(family.group_name(), item))
    }

    fn spec_for(&self, key: Option<&str>) -> ConnectResult<ConnectSpec> {
        match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) => self.describe(k),
            None => {
                let current = self.current_key();
                let key = match current {
                    Some(k) => k,
                    None => self.default_key(ConnectFamily::Data)?,
                };
                self.describe(&key.to_string())
            }
        }
    }

    fn build_context<'a>(&'a self, spec: &'a ConnectSpec) -> ConnectResult<BuildContext<'a>> {
        let oauth = match spec.params.get_str(K_OAUTH_CONNECT_REF) {
            Some(reference) => Some(self.oauth_connect(Some(reference))?),
            None => None,
        };
        Ok(BuildContext {
            key: &spec.key,
            params: &spec.params,
            root: &self.config.root_path,
            factory: self.factory.as_ref(),
            secrets: self.secrets.as_ref(),
            oauth,
        })
    }

    fn build_service(&self, spec: &ConnectSpec) -> ConnectResult<ConnectionHandle> {
        let strategy = strategy::lookup(spec.connect_type, spec.auth)?;
        let Builder::Service(build) = strategy.builder else {
            return Err(ConnectError::TypeMismatch {
                key: spec.key.to_string(),
                expected: "a shareable connect".to_string(),
                found: format!("{:?}", spec.auth),
            });
        };
        let ctx = self.build_context(spec)?;
        let resource = build(&ctx)?;
        Ok(ConnectionHandle::new(spec.key.clone(), spec.auth, resource))
    }

    fn set_current(&self, key: &QualifiedKey) {
        *lock(&self.current) = Some(key.clone());
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
