// src/state.rs

use crate::core::app_config::AppConfig;
use crate::core::config_resolver::{self, BootstrapOptions, ConfigError, ConfigResult, ResolvedConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Applications resolved so far, keyed by their qualified `<group>.<name>` key.
#[derive(Debug, Default)]
struct AppCache {
    by_key: HashMap<String, Arc<AppConfig>>,
    /// Requested key (as typed by the caller, normalised) -> qualified key.
    aliases: HashMap<String, String>,
    active: Option<Arc<AppConfig>>,
}

/// Process-wide configuration state: the resolved configuration tree and the
/// applications built from it.
///
/// Tests construct their own context with [`AppContext::new`]; hosts usually
/// share [`AppContext::global`].
#[derive(Debug)]
pub struct AppContext {
    options: BootstrapOptions,
    resolved: Mutex<Option<Arc<ResolvedConfig>>>,
    apps: Mutex<AppCache>,
}

impl AppContext {
    pub fn new(options: BootstrapOptions) -> Self {
        Self {
            options,
            resolved: Mutex::new(None),
            apps: Mutex::new(AppCache::default()),
        }
    }

    pub fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    /// The merged configuration. Resolution runs once; later calls return the
    /// memoized result until [`AppContext::reset`].
    ///
    /// # Errors
    /// Propagates any bootstrap error. A failed resolution is not memoized.
    pub fn resolved_config(&self) -> ConfigResult<Arc<ResolvedConfig>> {
        let mut guard = lock(&self.resolved);
        if let Some(resolved) = &*guard {
            return Ok(Arc::clone(resolved));
        }
        let resolved = Arc::new(config_resolver::bootstrap(&self.options)?);
        *guard = Some(Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Returns the application for `app_key`, building it on first use.
    ///
    /// Repeated requests with the same key, or with different keys resolving to
    /// the same application, return the same instance.
    ///
    /// # Errors
    /// `EmptyKey` for a blank key; otherwise any resolution or lookup error.
    pub fn app_config(&self, app_key: &str) -> ConfigResult<Arc<AppConfig>> {
        let requested = app_key.trim().to_lowercase();
        if requested.is_empty() {
            log::error!("An application key is required.");
            return Err(ConfigError::EmptyKey);
        }

        {
            let cache = lock(&self.apps);
            if let Some(app) = cache
                .aliases
                .get(&requested)
                .and_then(|k| cache.by_key.get(k))
            {
                log::debug!("AppConfig cache hit for '{}'.", requested);
                return Ok(Arc::clone(app));
            }
        }

        let resolved = self.resolved_config()?;
        let built = AppConfig::from_resolved(&requested, &resolved)?;
        let qualified = built.key().to_string();

        let mut cache = lock(&self.apps);
        let app = Arc::clone(
            cache
                .by_key
                .entry(qualified.clone())
                .or_insert_with(|| Arc::new(built)),
        );
        cache.aliases.insert(requested, qualified);
        if cache.active.is_none() {
            cache.active = Some(Arc::clone(&app));
        }
        Ok(app)
    }

    /// Qualified keys of every application built so far, sorted.
    pub fn cached_app_keys(&self) -> Vec<String> {
        let cache = lock(&self.apps);
        let mut keys: Vec<String> = cache.by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The application handed out by default: the first one built, unless
    /// swapped with [`AppContext::set_active_app`].
    pub fn active_app(&self) -> Option<Arc<AppConfig>> {
        lock(&self.apps).active.clone()
    }

    /// Makes `app_key` the active application, building it if needed.
    ///
    /// # Errors
    /// Same as [`AppContext::app_config`].
    pub fn set_active_app(&self, app_key: &str) -> ConfigResult<Arc<AppConfig>> {
        let app = self.app_config(app_key)?;
        lock(&self.apps).active = Some(Arc::clone(&app));
        log::info!("Active application set to '{}'.", app.key());
        Ok(app)
    }

    /// Drops the memoized configuration and every cached application.
    pub fn reset(&self) {
        *lock(&self.resolved) = None;
        *lock(&self.apps) = AppCache::default();
        log::debug!("Application context reset.");
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

static APP_CONTEXT: OnceLock<AppContext> = OnceLock::new();

/// The shared context. The first call fixes its bootstrap options, taking the
/// custom directory from `SNOWFLAKE_AI_CONF_DIR` when set.
pub fn global() -> &'static AppContext {
    APP_CONTEXT.get_or_init(|| AppContext::new(BootstrapOptions::from_env()))
}

/// Builds (or fetches) an application from the shared context.
///
/// `config_dir` and `config_file` only take effect if they are the first
/// options the shared context sees; afterwards the configuration is already
/// resolved and they are ignored with a warning.
///
/// # Errors
/// Same as [`AppContext::app_config`].
pub fn create_app_config(
    app_key: &str,
    config_dir: Option<&Path>,
    config_file: Option<&str>,
) -> ConfigResult<Arc<AppConfig>> {
    let ctx = APP_CONTEXT.get_or_init(|| {
        let mut options = BootstrapOptions::from_env();
        if let Some(dir) = config_dir {
            options = options.with_dir(dir);
        }
        if let Some(file) = config_file {
            options = options.with_file(file);
        }
        AppContext::new(options)
    });
    let requested_dir = config_dir.map(Path::to_path_buf);
    if (requested_dir.is_some() && requested_dir != ctx.options.custom_dir)
        || (config_file.is_some() && config_file != ctx.options.custom_file.as_deref())
    {
        log::warn!(
            "Configuration is already bootstrapped; ignoring directory {:?} and file {:?}.",
            config_dir,
            config_file
        );
    }
    ctx.app_config(app_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn context_with(text: &str) -> (TempDir, AppContext) {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("conf");
        fs::create_dir_all(&conf).unwrap();
        fs::write(conf.join("app_config.toml"), text).unwrap();
        let ctx = AppContext::new(
            BootstrapOptions::new()
                .with_dir(&conf)
                .with_cwd(dir.path())
                .with_home(dir.path()),
        );
        (dir, ctx)
    }

    const APPS: &str = r#"
        [apps.group_def.app_1]
        type = "console"
        [apps.group_1.app_1]
        type = "notebook"
        [apps.default_group.app_2]
        type = "default"
    "#;

    #[test]
    fn test_same_key_returns_same_instance() {
        let (_dir, ctx) = context_with(APPS);
        let a = ctx.app_config("group_1.app_1").unwrap();
        let b = ctx.app_config(" GROUP_1.APP_1 ").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(ctx.cached_app_keys(), vec!["group_1.app_1"]);
    }

    #[test]
    fn test_alias_and_qualified_key_share_an_entry() {
        let (_dir, ctx) = context_with(APPS);
        let searched = ctx.app_config("app_2").unwrap();
        let direct = ctx.app_config("default_group.app_2").unwrap();
        assert!(Arc::ptr_eq(&searched, &direct));
        assert_eq!(ctx.cached_app_keys().len(), 1);
    }

    #[test]
    fn test_first_app_becomes_active_until_swapped() {
        let (_dir, ctx) = context_with(APPS);
        assert!(ctx.active_app().is_none());
        ctx.app_config("group_1.app_1").unwrap();
        ctx.app_config("group_def.app_1").unwrap();
        assert_eq!(ctx.active_app().unwrap().key().to_string(), "group_1.app_1");

        ctx.set_active_app("group_def.app_1").unwrap();
        assert_eq!(ctx.active_app().unwrap().key().to_string(), "group_def.app_1");
    }

    #[test]
    fn test_resolution_is_memoized_until_reset() {
        let (dir, ctx) = context_with(APPS);
        let first = ctx.resolved_config().unwrap();
        let second = ctx.resolved_config().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        fs::write(
            dir.path().join("conf").join("app_config.toml"),
            "[apps.other.app_9]\ntype = \"streamlit\"",
        )
        .unwrap();
        assert!(ctx.app_config("app_9").is_err());

        ctx.reset();
        assert!(ctx.cached_app_keys().is_empty());
        assert!(ctx.active_app().is_none());
        assert_eq!(ctx.app_config("app_9").unwrap().type_name(), "streamlit");
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let (_dir, ctx) = context_with(APPS);
        assert!(matches!(ctx.app_config(""), Err(ConfigError::EmptyKey)));
    }
}
