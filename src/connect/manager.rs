// src/connect/manager.rs

use crate::connect::oauth::{OAuthConnect, TokenContext};
use crate::connect::registry::{ConnectSpec, ConnectionRegistry};
use crate::connect::session::ConnectionHandle;
use crate::connect::{ConnectError, ConnectResult};
use crate::core::app_config::AppConfig;
use crate::core::config_resolver::split_group_key;
use crate::models::{ConnectFamily, ConnectType};
use crate::state::lock;
use std::sync::{Arc, Mutex};

/// One entry of an application's `app_connects` list.
#[derive(Debug, Clone)]
pub enum AppConnect {
    OAuth(Arc<OAuthConnect>),
    /// A data connect. Shared connects carry their open handle; user-session
    /// connects carry none until a user signs in.
    Data {
        spec: ConnectSpec,
        handle: Option<ConnectionHandle>,
    },
}

/// A resolved `app_connects` reference. Only references are memoised; data
/// handles always come from the registry so closed or stale sessions are
/// never handed out again.
#[derive(Debug, Clone)]
enum Declared {
    OAuth(Arc<OAuthConnect>),
    Data(ConnectSpec),
}

/// Opens the connects an application declares, on top of a shared registry.
#[derive(Debug)]
pub struct ConnectManager {
    app: Arc<AppConfig>,
    registry: Arc<ConnectionRegistry>,
    declared: Mutex<Option<Vec<Declared>>>,
}

impl ConnectManager {
    pub fn new(app: Arc<AppConfig>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            app,
            registry,
            declared: Mutex::new(None),
        }
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the application's connects in declaration order. OAuth
    /// connects are registered once; shared data connects are fetched from
    /// the registry on every call, so a closed or stale session is rebuilt
    /// before it is returned.
    ///
    /// # Errors
    /// `ConnectionConfig` for references to undefined connects or unknown
    /// groups; any construction error.
    pub fn create_app_connects(&self) -> ConnectResult<Vec<AppConnect>> {
        let declared = self.declared()?;
        let mut connects = Vec::with_capacity(declared.len());
        for entry in declared {
            connects.push(match entry {
                Declared::OAuth(connect) => AppConnect::OAuth(connect),
                Declared::Data(spec) => {
                    let handle = if spec.auth.is_service() {
                        self.registry.get_connection(Some(&spec.key.to_string()))?
                    } else {
                        None
                    };
                    AppConnect::Data { spec, handle }
                }
            });
        }
        Ok(connects)
    }

    /// The application's first OAuth connect, else the configuration's default one.
    ///
    /// # Errors
    /// Same as [`ConnectManager::create_app_connects`].
    pub fn default_oauth_connect(&self) -> ConnectResult<Arc<OAuthConnect>> {
        let declared = self.declared()?.into_iter().find_map(|d| match d {
            Declared::OAuth(connect) => Some(connect),
            Declared::Data(_) => None,
        });
        match declared {
            Some(connect) => Ok(connect),
            None => self.registry.oauth_connect(None),
        }
    }

    /// The application's first shared Snowflake connection, else the
    /// configuration's default data connect. The handle is re-validated
    /// through the registry, so a stale session is rebuilt first.
    ///
    /// # Errors
    /// Same as [`ConnectionRegistry::get_connection`].
    pub fn default_snow_connect(&self) -> ConnectResult<Option<ConnectionHandle>> {
        let declared = self.first_snowflake(true)?;
        let key = declared.map(|spec| spec.key.to_string());
        self.registry.get_connection(key.as_deref())
    }

    /// Opens a session for a signed-in user on the application's first
    /// user-session Snowflake connect (else the default data connect).
    ///
    /// # Errors
    /// Same as [`ConnectionRegistry::create_user_session`].
    pub fn create_user_session(&self, tokens: &TokenContext) -> ConnectResult<ConnectionHandle> {
        let declared = self.first_snowflake(false)?;
        let key = declared.map(|spec| spec.key.to_string());
        self.registry.create_user_session(key.as_deref(), tokens)
    }

    fn first_snowflake(&self, service: bool) -> ConnectResult<Option<ConnectSpec>> {
        Ok(self.declared()?.into_iter().find_map(|d| match d {
            Declared::Data(spec)
                if spec.connect_type == ConnectType::Snowflake && spec.auth.is_service() == service =>
            {
                Some(spec)
            }
            _ => None,
        }))
    }

    /// Resolves every `app_connects` reference on first use.
    fn declared(&self) -> ConnectResult<Vec<Declared>> {
        let mut guard = lock(&self.declared);
        if let Some(declared) = &*guard {
            return Ok(declared.clone());
        }

        let mut declared = Vec::with_capacity(self.app.app_connects().len());
        for reference in self.app.app_connects() {
            let key = split_group_key(reference);
            match ConnectFamily::from_group(&key.group) {
                Some(ConnectFamily::OAuth) => {
                    declared.push(Declared::OAuth(self.registry.oauth_connect(Some(reference))?));
                }
                Some(ConnectFamily::Data) => declared.push(Declared::Data(self.registry.describe(reference)?)),
                None => {
                    return Err(ConnectError::ConnectionConfig {
                        key: reference.clone(),
                    });
                }
            }
        }
        log::info!(
            "Application '{}' declares {} connect(s).",
            self.app.key(),
            declared.len()
        );
        *guard = Some(declared.clone());
        Ok(declared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::testing::MockSessionFactory;
    use crate::core::config_loader;
    use crate::core::config_resolver::{ConfigOrigin, ResolvedConfig};
    use std::collections::HashMap;
    use std::path::PathBuf;

    const CONFIG: &str = r#"
        [apps.grp.app]
        app_connects = ["oauth_connects.device_code_0", "data_connects.browser", "data_connects.snow_0"]

        [apps.grp.bare]
        type = "console"

        [apps.grp.broken]
        app_connects = ["elsewhere.thing"]

        [app_connects.oauth_connects.auth_code_0]
        type = "auth_code"
        [app_connects.oauth_connects.device_code_0]
        type = "device_code"

        [app_connects.data_connects.snow_0]
        type = "snowflake"
        auth_type = "snowflake"
        password_env = "SF_PWD"
        [app_connects.data_connects.browser]
        type = "snowflake"
        auth_type = "externalbrowser"
    "#;

    fn manager(app_key: &str) -> (ConnectManager, Arc<MockSessionFactory>) {
        let resolved = ResolvedConfig {
            root_path: PathBuf::from("/"),
            origin: ConfigOrigin::Bundled,
            tree: config_loader::parse_str("test", CONFIG).unwrap(),
            sources: Vec::new(),
            fingerprint: String::new(),
        };
        let app = Arc::new(AppConfig::from_resolved(app_key, &resolved).unwrap());
        let factory = Arc::new(MockSessionFactory::default());
        let mut secrets = HashMap::new();
        secrets.insert("SF_PWD".to_string(), "pw".to_string());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(resolved),
            factory.clone(),
            Arc::new(secrets),
        ));
        (ConnectManager::new(app, registry), factory)
    }

    #[test]
    fn test_app_connects_open_each_shared_session_once() {
        let (manager, factory) = manager("grp.app");
        let connects = manager.create_app_connects().unwrap();
        assert_eq!(connects.len(), 3);
        assert!(matches!(&connects[0], AppConnect::OAuth(c) if c.key().item == "device_code_0"));
        assert!(matches!(&connects[1], AppConnect::Data { handle: None, .. }));
        assert!(matches!(&connects[2], AppConnect::Data { handle: Some(_), .. }));

        manager.create_app_connects().unwrap();
        assert_eq!(factory.created_count(), 1);
    }

    #[test]
    fn test_closed_connection_is_rebuilt_for_the_app() {
        let (manager, factory) = manager("grp.app");
        let handle_of = |connects: &[AppConnect]| match connects.get(2) {
            Some(AppConnect::Data { handle: Some(h), .. }) => h.clone(),
            other => panic!("expected an open data connect, got {:?}", other),
        };

        let first = handle_of(&manager.create_app_connects().unwrap());
        manager.registry().close_connection(Some("snow_0")).unwrap();
        assert!(!first.probe());

        let second = handle_of(&manager.create_app_connects().unwrap());
        assert_ne!(first.id(), second.id());
        assert!(second.probe());
        assert_eq!(factory.created_count(), 2);
    }

    #[test]
    fn test_stale_connection_is_rebuilt_for_the_app() {
        let (manager, factory) = manager("grp.app");
        manager.create_app_connects().unwrap();
        factory.last_session().break_session();

        let connects = manager.create_app_connects().unwrap();
        assert!(matches!(connects.get(2), Some(AppConnect::Data { handle: Some(h), .. }) if h.probe()));
        assert_eq!(factory.created_count(), 2);
    }

    #[test]
    fn test_defaults_prefer_declared_connects() {
        let (manager, factory) = manager("grp.app");
        assert_eq!(manager.default_oauth_connect().unwrap().key().item, "device_code_0");
        let snow = manager.default_snow_connect().unwrap().unwrap();
        assert_eq!(snow.key().item, "snow_0");
        assert_eq!(factory.created_count(), 1);

        let session = manager.create_user_session(&TokenContext::default()).unwrap();
        assert_eq!(session.key().item, "browser");
        assert_eq!(factory.created_count(), 2);
    }

    #[test]
    fn test_apps_without_connects_fall_back_to_configured_defaults() {
        let (manager, _) = manager("grp.bare");
        assert!(manager.create_app_connects().unwrap().is_empty());
        assert_eq!(manager.default_oauth_connect().unwrap().key().item, "auth_code_0");
        assert_eq!(manager.default_snow_connect().unwrap().unwrap().key().item, "snow_0");
    }

    #[test]
    fn test_reference_to_unknown_group_is_rejected() {
        let (manager, _) = manager("grp.broken");
        assert!(matches!(
            manager.create_app_connects(),
            Err(ConnectError::ConnectionConfig { .. })
        ));
    }
}
