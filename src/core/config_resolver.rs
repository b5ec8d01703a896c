// src/core/config_resolver.rs

use crate::constants::{CONF_DIR_ENV, DEFAULT_CONF_DIR, DEFAULT_CONF_FILE, DEFAULT_MARKER};
use crate::core::config_loader::{self, LoadedConfig};
use crate::core::paths::{self, PathError};
use crate::core::source::{self, ConfigSource};
use crate::models::{ConfigTree, ConfigTreeExt, ConfigType, QualifiedKey, SectionLookup};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The configuration shipped with the library. Always parseable, never empty.
const BUNDLED_CONFIG: &str = include_str!("../../conf/app_config.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Error parsing TOML in '{path}': {source}")]
    ConfigFormat {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("No configuration found. Tried: {}", .tried.join(", "))]
    ConfigNotFound { tried: Vec<String> },
    #[error("Required section '[{section}]' is missing from the configuration.")]
    MissingSection { section: String },
    #[error("Key '{key}' not found in section '[{section}]'.")]
    KeyNotFound { section: String, key: String },
    #[error("Could not read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Key '{key}' declares type '{found}', expected {expected}.")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },
    #[error("An empty configuration key was given.")]
    EmptyKey,
    #[error(transparent)]
    Path(#[from] PathError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Where the merged tree was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    Directory(PathBuf),
    Bundled,
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::Directory(p) => write!(f, "{}", p.display()),
            ConfigOrigin::Bundled => f.write_str("<bundled>"),
        }
    }
}

/// The outcome of [`bootstrap`].
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute root the configuration is anchored to.
    pub root_path: PathBuf,
    pub origin: ConfigOrigin,
    pub tree: ConfigTree,
    pub sources: Vec<ConfigSource>,
    /// Order-independent hash over every contributing file.
    pub fingerprint: String,
}

impl ResolvedConfig {
    /// Returns a top-level section, or `MissingSection` if the tree lacks it.
    pub fn section(&self, section: ConfigType) -> ConfigResult<&ConfigTree> {
        section_of(&self.tree, section.as_str())
    }
}

/// Inputs to [`bootstrap`]. Unset directories fall back to the process
/// working directory and the user's home.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub custom_dir: Option<PathBuf>,
    pub custom_file: Option<String>,
    pub cwd: Option<PathBuf>,
    pub home: Option<PathBuf>,
    /// Replaces the bundled configuration text (tests only need this).
    pub bundled: Option<String>,
}

impl BootstrapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`BootstrapOptions::new`], but takes the custom directory from
    /// `SNOWFLAKE_AI_CONF_DIR` when it is set.
    pub fn from_env() -> Self {
        let custom_dir = env::var(CONF_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            custom_dir,
            ..Self::default()
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.custom_dir = Some(dir.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.custom_file = Some(file.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_bundled(mut self, content: impl Into<String>) -> Self {
        self.bundled = Some(content.into());
        self
    }
}

// --- PUBLIC API ---

/// Locates and merges the configuration, trying in order:
///
/// 1. the custom directory (or `./snowflake_ai/conf`) under the working directory,
/// 2. `snowflake_ai/conf` under the home directory,
/// 3. the working directory itself,
/// 4. the home directory itself,
/// 5. the configuration bundled with the library.
///
/// The first step producing a non-empty tree wins.
///
/// # Errors
/// * `ConfigFormat` if any candidate file is malformed (this aborts the search).
/// * `ConfigNotFound` if no step yields an existing root directory.
pub fn bootstrap(options: &BootstrapOptions) -> ConfigResult<ResolvedConfig> {
    let cwd = match &options.cwd {
        Some(p) => p.clone(),
        None => paths::current_dir()?,
    };
    let home = match &options.home {
        Some(p) => Some(p.clone()),
        None => paths::home_dir().ok(),
    };
    let file = options.custom_file.as_deref();

    let mut candidates: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(4);
    match &options.custom_dir {
        Some(dir) => {
            let dir = paths::expand_path(&dir.to_string_lossy())?;
            let dir = cwd.join(dir);
            candidates.push((dir.clone(), dir));
        }
        None => candidates.push((cwd.clone(), cwd.join(DEFAULT_CONF_DIR))),
    }
    if let Some(home) = &home {
        candidates.push((home.clone(), home.join(DEFAULT_CONF_DIR)));
    }
    candidates.push((cwd.clone(), cwd.clone()));
    if let Some(home) = &home {
        candidates.push((home.clone(), home.clone()));
    }

    let mut tried = Vec::with_capacity(candidates.len() + 1);
    let mut last_root: Option<PathBuf> = None;
    for (step, (root, dir)) in candidates.into_iter().enumerate() {
        log::debug!(
            "Bootstrap step {}: root='{}', dir='{}'",
            step + 1,
            root.display(),
            dir.display()
        );
        tried.push(dir.display().to_string());
        let LoadedConfig { tree, sources } = config_loader::load_toml_files(&dir, file)?;
        if !tree.is_empty() {
            let origin = ConfigOrigin::Directory(paths::absolutize(&dir, &cwd));
            return finish(root, origin, tree, sources, &cwd, tried);
        }
        last_root = Some(root);
    }

    log::info!("No configuration found on disk, using the bundled configuration.");
    tried.push(format!("<bundled {}>", DEFAULT_CONF_FILE));
    let content = options.bundled.as_deref().unwrap_or(BUNDLED_CONFIG);
    let tree = config_loader::parse_str(DEFAULT_CONF_FILE, content)?;
    let root = last_root.unwrap_or(cwd.clone());
    finish(root, ConfigOrigin::Bundled, tree, Vec::new(), &cwd, tried)
}

fn finish(
    root: PathBuf,
    origin: ConfigOrigin,
    tree: ConfigTree,
    sources: Vec<ConfigSource>,
    cwd: &Path,
    tried: Vec<String>,
) -> ConfigResult<ResolvedConfig> {
    let root_path = paths::absolutize(&root, cwd);
    if tree.is_empty() || !root_path.is_dir() {
        log::error!("Configuration root '{}' doesn't exist.", root_path.display());
        return Err(ConfigError::ConfigNotFound { tried });
    }
    let fingerprint = source::fingerprint(&sources);
    log::info!(
        "Configuration resolved: root='{}', origin='{}', sections={:?}",
        root_path.display(),
        origin,
        tree.keys().collect::<Vec<_>>()
    );
    Ok(ResolvedConfig {
        root_path,
        origin,
        tree,
        sources,
        fingerprint,
    })
}

/// Splits `group.item` on the first dot. Further dots are ignored, so
/// `a.b.c` yields `("a", "b")`. Without a dot, the whole key is the item.
pub fn split_group_key(key: &str) -> QualifiedKey {
    let key = key.trim().to_lowercase();
    let mut parts = key.split('.');
    match (parts.next(), parts.next()) {
        (Some(group), Some(item)) => QualifiedKey::new(group.trim(), item.trim()),
        (Some(item), None) => QualifiedKey::new("", item.trim()),
        _ => QualifiedKey::default(),
    }
}

/// Returns the scalar entries of `[section.group]`, dropping its per-item children.
/// Empty if the section or group is absent.
pub fn filter_group_section(group: &str, section: &str, tree: &ConfigTree) -> ConfigTree {
    tree.get_table(section)
        .and_then(|s| s.get_table(group))
        .map(ConfigTreeExt::scalars_only)
        .unwrap_or_default()
}

/// Looks for `item` in every group of `section`, in sorted group order.
/// A group whose name contains `default` wins over any other match.
pub fn search_by_item_across_groups(item: &str, section: &str, tree: &ConfigTree) -> SectionLookup {
    let Some(groups) = tree.get_table(section) else {
        return SectionLookup::default();
    };

    let mut names: Vec<&String> = groups.keys().collect();
    names.sort();

    let mut first_match: Option<SectionLookup> = None;
    for name in names {
        let Some(found) = groups.get_table(name).and_then(|g| g.get(item)) else {
            continue;
        };
        // A scalar entry still qualifies the key; only tables carry a subtree.
        let config = found.as_table().cloned().unwrap_or_default();
        let hit = SectionLookup::new(QualifiedKey::new(name.as_str(), item).to_string(), config);
        if name.contains(DEFAULT_MARKER) {
            log::debug!("Item '{}' found in default group '{}'.", item, name);
            return hit;
        }
        if first_match.is_none() {
            first_match = Some(hit);
        }
    }
    first_match.unwrap_or_default()
}

/// Resolves a possibly partial key against `section`:
///
/// * `item` alone: search across groups,
/// * `group.` alone: the group's scalar defaults,
/// * `group.item`: direct lookup,
/// * empty: an empty result.
///
/// # Errors
/// Returns `MissingSection` if the section is absent from the tree.
pub fn get_group_item_config(key: &str, section: &str, tree: &ConfigTree) -> ConfigResult<SectionLookup> {
    let groups = section_of(tree, section)?;
    let QualifiedKey { group, item } = split_group_key(key);

    let lookup = match (group.is_empty(), item.is_empty()) {
        (true, true) => SectionLookup::default(),
        (true, false) => search_by_item_across_groups(&item, section, tree),
        (false, true) => SectionLookup::new(format!("{}.", group), filter_group_section(&group, section, tree)),
        (false, false) => {
            let config = groups
                .get_table(&group)
                .and_then(|g| g.get_table(&item))
                .cloned()
                .unwrap_or_default();
            SectionLookup::new(QualifiedKey::new(group, item).to_string(), config)
        }
    };

    log::debug!(
        "Lookup '{}' in [{}] => '{}' ({} keys)",
        key,
        section,
        lookup.key,
        lookup.config.len()
    );
    Ok(lookup)
}

/// Resolves `key` to its fully qualified form within a known section.
/// An explicitly named group is kept when that group exists; otherwise the
/// group found by searching for the item is used.
///
/// # Errors
/// * `EmptyKey` if the key has no item part.
/// * `MissingSection` if the section is absent from the tree.
/// * `KeyNotFound` if no group contains the item.
pub fn get_qualified_key(section: ConfigType, key: &str, tree: &ConfigTree) -> ConfigResult<QualifiedKey> {
    let groups = section_of(tree, section.as_str())?;
    let QualifiedKey { group, item } = split_group_key(key);
    if item.is_empty() {
        return Err(ConfigError::EmptyKey);
    }

    let found = search_by_item_across_groups(&item, section.as_str(), tree);
    if found.key.is_empty() {
        return Err(ConfigError::KeyNotFound {
            section: section.to_string(),
            key: key.to_string(),
        });
    }

    if !group.is_empty() && groups.get_table(&group).is_some() {
        return Ok(QualifiedKey::new(group, item));
    }
    Ok(split_group_key(&found.key))
}

fn section_of<'a>(tree: &'a ConfigTree, section: &str) -> ConfigResult<&'a ConfigTree> {
    tree.get_table(section).ok_or_else(|| ConfigError::MissingSection {
        section: section.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree(text: &str) -> ConfigTree {
        config_loader::parse_str("test", text).unwrap()
    }

    fn sample() -> ConfigTree {
        tree(
            r#"
            [apps]
            root_path = "."

            [apps.group_a]
            shared = "a"
            [apps.group_a.app1]
            type = "console"

            [apps.group_b]
            [apps.group_b.app1]
            type = "notebook"

            [apps.z_default]
            owner = "me"
            [apps.z_default.app1]
            type = "default"
            [apps.z_default.app2]
            type = "streamlit"
            "#,
        )
    }

    #[test]
    fn test_split_group_key() {
        assert_eq!(split_group_key("a.b"), QualifiedKey::new("a", "b"));
        assert_eq!(split_group_key("a"), QualifiedKey::new("", "a"));
        assert_eq!(split_group_key(""), QualifiedKey::new("", ""));
        assert_eq!(split_group_key(" Grp.App.Extra "), QualifiedKey::new("grp", "app"));
        assert_eq!(split_group_key("grp."), QualifiedKey::new("grp", ""));
    }

    #[test]
    fn test_search_prefers_default_group_over_lexical_order() {
        let found = search_by_item_across_groups("app1", "apps", &sample());
        assert_eq!(found.key, "z_default.app1");
        assert_eq!(found.config.get_str("type"), Some("default"));
    }

    #[test]
    fn test_search_falls_back_to_first_sorted_group() {
        let t = tree(
            r#"
            [apps.beta.x]
            type = "notebook"
            [apps.alpha.x]
            type = "console"
            "#,
        );
        let found = search_by_item_across_groups("x", "apps", &t);
        assert_eq!(found.key, "alpha.x");
    }

    #[test]
    fn test_search_miss_is_empty() {
        let found = search_by_item_across_groups("nope", "apps", &sample());
        assert!(found.key.is_empty());
        assert!(found.is_empty());
    }

    #[test]
    fn test_search_matches_scalar_entries_too() {
        let found = search_by_item_across_groups("owner", "apps", &sample());
        assert_eq!(found.key, "z_default.owner");
        assert!(found.config.is_empty());
        assert_eq!(
            get_qualified_key(ConfigType::Apps, "shared", &sample()).unwrap(),
            QualifiedKey::new("group_a", "shared")
        );
    }

    #[test]
    fn test_filter_keeps_only_scalars() {
        let filtered = filter_group_section("group_a", "apps", &sample());
        assert_eq!(filtered.get_str("shared"), Some("a"));
        assert!(!filtered.contains_key("app1"));
        assert!(filter_group_section("missing", "apps", &sample()).is_empty());
    }

    #[test]
    fn test_get_group_item_config_dispatch() {
        let t = sample();

        let direct = get_group_item_config("group_b.app1", "apps", &t).unwrap();
        assert_eq!(direct.key, "group_b.app1");
        assert_eq!(direct.config.get_str("type"), Some("notebook"));

        let searched = get_group_item_config("APP2", "apps", &t).unwrap();
        assert_eq!(searched.key, "z_default.app2");

        let filtered = get_group_item_config("z_default.", "apps", &t).unwrap();
        assert_eq!(filtered.key, "z_default.");
        assert_ne!(filtered.key, direct.key);
        assert_eq!(filtered.config.get_str("owner"), Some("me"));

        let empty = get_group_item_config("", "apps", &t).unwrap();
        assert!(empty.key.is_empty() && empty.is_empty());

        let missing_item = get_group_item_config("group_a.ghost", "apps", &t).unwrap();
        assert_eq!(missing_item.key, "group_a.ghost");
        assert!(missing_item.is_empty());
    }

    #[test]
    fn test_missing_section_is_an_error() {
        let err = get_group_item_config("a.b", "ml_ops", &sample()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { section } if section == "ml_ops"));
    }

    #[test]
    fn test_qualified_key_prefers_explicit_group() {
        let t = sample();
        assert_eq!(
            get_qualified_key(ConfigType::Apps, "group_a.app1", &t).unwrap(),
            QualifiedKey::new("group_a", "app1")
        );
        assert_eq!(
            get_qualified_key(ConfigType::Apps, "app1", &t).unwrap(),
            QualifiedKey::new("z_default", "app1")
        );
        assert!(matches!(
            get_qualified_key(ConfigType::Apps, "ghost", &t),
            Err(ConfigError::KeyNotFound { .. })
        ));
        assert!(matches!(
            get_qualified_key(ConfigType::Apps, "group_a.", &t),
            Err(ConfigError::EmptyKey)
        ));
    }

    #[test]
    fn test_bootstrap_prefers_custom_directory() {
        // --- Setup ---
        let cwd = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let custom = cwd.path().join("my_conf");
        fs::create_dir_all(&custom).unwrap();
        fs::write(custom.join("app_config.toml"), "[apps.g.a]\ntype = \"console\"").unwrap();

        let home_conf = home.path().join(DEFAULT_CONF_DIR);
        fs::create_dir_all(&home_conf).unwrap();
        fs::write(home_conf.join("app_config.toml"), "[apps.g.b]\ntype = \"notebook\"").unwrap();

        // --- Execute ---
        let options = BootstrapOptions::new()
            .with_dir("my_conf")
            .with_cwd(cwd.path())
            .with_home(home.path());
        let resolved = bootstrap(&options).unwrap();

        // --- Assert ---
        assert!(resolved.root_path.is_absolute());
        assert!(resolved.root_path.ends_with("my_conf"));
        assert_eq!(resolved.sources.len(), 1);
        let lookup = get_group_item_config("g.a", "apps", &resolved.tree).unwrap();
        assert_eq!(lookup.config.get_str("type"), Some("console"));
    }

    #[test]
    fn test_bootstrap_falls_back_to_home_conf_dir() {
        let cwd = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let home_conf = home.path().join(DEFAULT_CONF_DIR);
        fs::create_dir_all(&home_conf).unwrap();
        fs::write(home_conf.join("x.toml"), "[apps.g.b]\ntype = \"notebook\"").unwrap();

        let options = BootstrapOptions::new().with_cwd(cwd.path()).with_home(home.path());
        let resolved = bootstrap(&options).unwrap();

        assert_eq!(resolved.root_path, dunce::canonicalize(home.path()).unwrap());
        assert!(matches!(resolved.origin, ConfigOrigin::Directory(_)));
    }

    #[test]
    fn test_bootstrap_uses_bundled_config_last() {
        let cwd = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();

        let options = BootstrapOptions::new().with_cwd(cwd.path()).with_home(home.path());
        let resolved = bootstrap(&options).unwrap();

        assert_eq!(resolved.origin, ConfigOrigin::Bundled);
        assert!(resolved.section(ConfigType::Apps).is_ok());
        assert!(resolved.section(ConfigType::AppConnects).is_ok());
    }

    #[test]
    fn test_bootstrap_without_any_root_fails() {
        let options = BootstrapOptions::new()
            .with_cwd("/definitely/not/a/dir")
            .with_home("/also/not/a/dir");
        let err = bootstrap(&options).unwrap_err();
        match err {
            ConfigError::ConfigNotFound { tried } => assert_eq!(tried.len(), 5),
            other => panic!("Expected ConfigNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_bootstrap_malformed_file_is_fatal() {
        let cwd = TempDir::new().unwrap();
        let conf = cwd.path().join(DEFAULT_CONF_DIR);
        fs::create_dir_all(&conf).unwrap();
        fs::write(conf.join("bad.toml"), "[apps").unwrap();

        let options = BootstrapOptions::new().with_cwd(cwd.path()).with_home(cwd.path());
        assert!(matches!(
            bootstrap(&options),
            Err(ConfigError::ConfigFormat { .. })
        ));
    }
}
