// src/setup/manager.rs

use crate::connect::ConnectResult;
use crate::connect::registry::ConnectionRegistry;
use crate::core::app_config::AppConfig;
use crate::core::config_resolver::{self, ConfigError};
use crate::models::ConfigType;
use crate::setup::data_setup::DataSetup;
use std::sync::Arc;

/// Builds the data setups an application lists under `data_setups`.
#[derive(Debug)]
pub struct SetupManager {
    app: Arc<AppConfig>,
    registry: Arc<ConnectionRegistry>,
}

impl SetupManager {
    pub fn new(app: Arc<AppConfig>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { app, registry }
    }

    /// One [`DataSetup`] per reference, in declaration order.
    ///
    /// # Errors
    /// `MissingSection` without `[data_setups]`; `KeyNotFound` for a
    /// reference matching no entry.
    pub fn create_data_setups(&self) -> ConnectResult<Vec<DataSetup>> {
        let section = ConfigType::DataSetups.as_str();
        let tree = &self.registry.config().tree;
        let mut setups = Vec::with_capacity(self.app.data_setups().len());
        for reference in self.app.data_setups() {
            let lookup = config_resolver::get_group_item_config(reference, section, tree)?;
            let key = config_resolver::split_group_key(&lookup.key);
            if lookup.is_empty() || !key.is_complete() {
                return Err(ConfigError::KeyNotFound {
                    section: section.to_string(),
                    key: reference.clone(),
                }
                .into());
            }
            setups.push(DataSetup::from_config(key, lookup.config));
        }
        Ok(setups)
    }

    /// Creates every stage of every data setup. Returns the stage names.
    ///
    /// # Errors
    /// Stops at the first failing setup; see [`DataSetup::create_stages`].
    pub fn create_stages(&self) -> ConnectResult<Vec<String>> {
        let mut created = Vec::new();
        for setup in self.create_data_setups()? {
            created.extend(setup.create_stages(&self.registry, None)?);
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::ConnectError;
    use crate::connect::testing::MockSessionFactory;
    use crate::core::config_loader;
    use crate::core::config_resolver::{ConfigOrigin, ResolvedConfig};
    use std::collections::HashMap;
    use std::path::PathBuf;

    const CONFIG: &str = r#"
        [apps.grp.app]
        data_setups = ["grp.setup_0", "setup_files"]

        [apps.grp.ghost]
        data_setups = ["grp.nope"]

        [app_connects.data_connects.snowflake_0]
        type = "snowflake"
        auth_type = "snowflake"
        password_env = "SF_PWD"

        [data_setups.grp.setup_0]
        data_connect = "data_connects.snowflake_0"
        stage_model = "ML_MODELS"
        stage_data = "ML_DATA"

        [data_setups.grp.setup_files]
        stage_raw = "RAW"
    "#;

    fn manager(app_key: &str) -> (SetupManager, Arc<MockSessionFactory>) {
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
        (SetupManager::new(app, registry), factory)
    }

    #[test]
    fn test_setups_follow_the_app_list() {
        let (manager, _) = manager("grp.app");
        let setups = manager.create_data_setups().unwrap();
        let keys: Vec<String> = setups.iter().map(|s| s.key().to_string()).collect();
        assert_eq!(keys, ["grp.setup_0", "grp.setup_files"]);
        assert_eq!(setups[1].data_connect(), None);
    }

    #[test]
    fn test_stages_are_created_through_the_session() {
        let (manager, factory) = manager("grp.app");
        let created = manager.create_stages().unwrap();
        assert_eq!(created, ["ML_DATA", "ML_MODELS", "RAW"]);
        assert_eq!(factory.created_count(), 1);
        let ddl: Vec<String> = factory
            .last_session()
            .queries()
            .into_iter()
            .filter(|q| q.starts_with("CREATE"))
            .collect();
        assert_eq!(
            ddl,
            [
                "CREATE STAGE IF NOT EXISTS ML_DATA",
                "CREATE STAGE IF NOT EXISTS ML_MODELS",
                "CREATE STAGE IF NOT EXISTS RAW"
            ]
        );
    }

    #[test]
    fn test_unknown_setup_reference_fails() {
        let (manager, _) = manager("grp.ghost");
        assert!(matches!(
            manager.create_data_setups(),
            Err(ConnectError::Config(ConfigError::KeyNotFound { .. }))
        ));
    }
}
