// src/core/app_config.rs

use crate::constants::{
    K_APP_DIR, K_ENVIRONMENT, K_NAME, K_ROOT_PATH, K_SCRIPT_HOME_DIR, K_TYPE, K_VERSION,
};
use crate::core::config_resolver::{
    self, ConfigError, ConfigResult, ResolvedConfig, filter_group_section,
};
use crate::core::paths;
use crate::models::{AppType, ConfigTree, ConfigTreeExt, ConfigType, QualifiedKey};
use std::path::{Path, PathBuf};

/// The resolved view of one `[apps.<group>.<name>]` entry.
///
/// Built once per application key and shared behind an `Arc` by
/// [`crate::state::AppContext`]. All fields are read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    key: QualifiedKey,
    config: ConfigTree,
    group_config: ConfigTree,
    name: Option<String>,
    type_name: String,
    version: Option<String>,
    environment: Option<String>,
    root_path: PathBuf,
    app_dir: PathBuf,
    script_home_dir: PathBuf,
    app_connects: Vec<String>,
    data_setups: Vec<String>,
    ml_pipelines: Vec<String>,
    ml_ops: Vec<String>,
}

impl AppConfig {
    /// Looks `app_key` up in the `apps` section and derives the application's attributes.
    ///
    /// Missing values fall back to the section-level `apps.<key>` value, then to
    /// built-in defaults (`streamlit_ml` type, the configuration root, `.` dirs).
    ///
    /// # Errors
    /// * `EmptyKey` for a blank key.
    /// * `MissingSection` if the tree has no `[apps]`.
    /// * `KeyNotFound` if the key matches no application.
    /// * `Path` if a configured path cannot be expanded.
    pub fn from_resolved(app_key: &str, resolved: &ResolvedConfig) -> ConfigResult<Self> {
        let section = ConfigType::Apps.as_str();
        if app_key.trim().is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        let apps = resolved.section(ConfigType::Apps)?;
        let lookup = config_resolver::get_group_item_config(app_key, section, &resolved.tree)?;

        let key = config_resolver::split_group_key(&lookup.key);
        if lookup.is_empty() || !key.is_complete() {
            return Err(ConfigError::KeyNotFound {
                section: section.to_string(),
                key: app_key.to_string(),
            });
        }
        let config = lookup.config;

        let type_name = config
            .get_str(K_TYPE)
            .or_else(|| apps.get_str(K_TYPE))
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| AppType::StreamlitMl.as_str().to_string());

        let root_path = match config.get_str(K_ROOT_PATH).or_else(|| apps.get_str(K_ROOT_PATH)) {
            Some(p) if !p.trim().is_empty() => paths::resolve_config_path(p, &resolved.root_path)?,
            _ => resolved.root_path.clone(),
        };
        let app_dir = dir_or_default(&config, K_APP_DIR, &root_path)?;
        let script_home_dir = dir_or_default(&config, K_SCRIPT_HOME_DIR, &root_path)?;

        let group_config = filter_group_section(&key.group, section, &resolved.tree);
        let inherited = |k: &str| {
            config
                .get_str(k)
                .or_else(|| group_config.get_str(k))
                .map(str::to_string)
        };

        let app = Self {
            name: config.get_str(K_NAME).map(str::to_string),
            version: inherited(K_VERSION),
            environment: inherited(K_ENVIRONMENT),
            app_connects: config.get_string_list(ConfigType::AppConnects.as_str()),
            data_setups: config.get_string_list(ConfigType::DataSetups.as_str()),
            ml_pipelines: config.get_string_list(ConfigType::MlPipelines.as_str()),
            ml_ops: config.get_string_list(ConfigType::MlOps.as_str()),
            type_name,
            root_path,
            app_dir,
            script_home_dir,
            group_config,
            config,
            key,
        };
        log::info!(
            "AppConfig '{}' resolved: type={}, root='{}', connects={:?}",
            app.key,
            app.type_name,
            app.root_path.display(),
            app.app_connects
        );
        Ok(app)
    }

    pub fn key(&self) -> &QualifiedKey {
        &self.key
    }

    pub fn group(&self) -> &str {
        &self.key.group
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// The declared type exactly as configured (lower-cased).
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Parses the declared type.
    ///
    /// # Errors
    /// Returns `TypeMismatch` if the type is not one of the known [`AppType`]s.
    pub fn app_type(&self) -> ConfigResult<AppType> {
        AppType::from_name(&self.type_name).ok_or_else(|| self.type_mismatch(&AppType::ALL))
    }

    /// Checks the declared type against the types a caller accepts.
    ///
    /// # Errors
    /// Returns `TypeMismatch` if the type is unknown or not in `allowed`.
    pub fn ensure_app_type(&self, allowed: &[AppType]) -> ConfigResult<AppType> {
        let app_type = self.app_type()?;
        if allowed.contains(&app_type) {
            Ok(app_type)
        } else {
            Err(self.type_mismatch(allowed))
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn script_home_dir(&self) -> &Path {
        &self.script_home_dir
    }

    /// The application's own subsection.
    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    /// Scalar defaults shared by every application in the same group.
    pub fn group_config(&self) -> &ConfigTree {
        &self.group_config
    }

    pub fn app_connects(&self) -> &[String] {
        &self.app_connects
    }

    pub fn data_setups(&self) -> &[String] {
        &self.data_setups
    }

    pub fn ml_pipelines(&self) -> &[String] {
        &self.ml_pipelines
    }

    pub fn ml_ops(&self) -> &[String] {
        &self.ml_ops
    }

    fn type_mismatch(&self, expected: &[AppType]) -> ConfigError {
        ConfigError::TypeMismatch {
            key: self.key.to_string(),
            expected: expected
                .iter()
                .map(AppType::as_str)
                .collect::<Vec<_>>()
                .join(" | "),
            found: self.type_name.clone(),
        }
    }
}

fn dir_or_default(config: &ConfigTree, key: &str, base: &Path) -> ConfigResult<PathBuf> {
    let value = config.get_str(key).filter(|s| !s.trim().is_empty()).unwrap_or(".");
    paths::resolve_config_path(value, base).map_err(ConfigError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_loader;
    use crate::core::config_resolver::ConfigOrigin;
    use tempfile::TempDir;

    fn resolved(root: &Path, text: &str) -> ResolvedConfig {
        ResolvedConfig {
            root_path: root.to_path_buf(),
            origin: ConfigOrigin::Bundled,
            tree: config_loader::parse_str("test", text).unwrap(),
            sources: Vec::new(),
            fingerprint: String::new(),
        }
    }

    const APPS: &str = r#"
        [apps]
        type = "console"

        [apps.group_def]
        version = "1.2"
        environment = "prod"

        [apps.group_def.app1]
        type = "default"
        name = "First"
        app_dir = "apps/first"
        app_connects = ["data_connects.snowflake_0", "oauth_connects.auth_code_0"]
        data_setups = ["group_def.setup_0"]
        ml_pipelines = ["group_def.pipeline_0"]

        [apps.group_def.plain]
        environment = "dev"

        [apps.group_x.weird]
        type = "gui"
    "#;

    #[test]
    fn test_direct_key_yields_declared_type() {
        let root = TempDir::new().unwrap();
        let app = AppConfig::from_resolved("group_def.app1", &resolved(root.path(), APPS)).unwrap();

        assert_eq!(app.key(), &QualifiedKey::new("group_def", "app1"));
        assert_eq!(app.type_name(), "default");
        assert_eq!(app.app_type().unwrap(), AppType::Default);
        assert_eq!(app.name(), Some("First"));
        assert_eq!(app.app_dir(), root.path().join("apps/first"));
        assert_eq!(app.script_home_dir(), dunce::canonicalize(root.path()).unwrap());
        assert_eq!(app.app_connects().len(), 2);
        assert_eq!(app.data_setups(), ["group_def.setup_0"]);
        assert!(app.ml_ops().is_empty());
    }

    #[test]
    fn test_section_and_group_defaults_are_inherited() {
        let root = TempDir::new().unwrap();
        let app = AppConfig::from_resolved("plain", &resolved(root.path(), APPS)).unwrap();

        assert_eq!(app.key().to_string(), "group_def.plain");
        assert_eq!(app.type_name(), "console");
        assert_eq!(app.version(), Some("1.2"));
        assert_eq!(app.environment(), Some("dev"));
        assert_eq!(app.group_config().get_str("environment"), Some("prod"));
        assert_eq!(app.root_path(), root.path());
    }

    #[test]
    fn test_unknown_type_is_rejected_by_validating_callers() {
        let root = TempDir::new().unwrap();
        let app = AppConfig::from_resolved("group_x.weird", &resolved(root.path(), APPS)).unwrap();

        assert!(matches!(app.app_type(), Err(ConfigError::TypeMismatch { .. })));

        let typed = AppConfig::from_resolved("group_def.app1", &resolved(root.path(), APPS)).unwrap();
        assert!(typed.ensure_app_type(&[AppType::Default]).is_ok());
        assert!(matches!(
            typed.ensure_app_type(&[AppType::Streamlit, AppType::StreamlitMl]),
            Err(ConfigError::TypeMismatch { found, .. }) if found == "default"
        ));
    }

    #[test]
    fn test_missing_app_and_empty_key() {
        let root = TempDir::new().unwrap();
        let cfg = resolved(root.path(), APPS);
        assert!(matches!(
            AppConfig::from_resolved("group_def.ghost", &cfg),
            Err(ConfigError::KeyNotFound { .. })
        ));
        assert!(matches!(
            AppConfig::from_resolved("  ", &cfg),
            Err(ConfigError::EmptyKey)
        ));
        let no_apps = resolved(root.path(), "[ml_ops.g.x]\nsteps = []");
        assert!(matches!(
            AppConfig::from_resolved("g.x", &no_apps),
            Err(ConfigError::MissingSection { .. })
        ));
    }
}
