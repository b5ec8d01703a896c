//! # Config Loader
//!
//! Reads TOML files from a single directory and merges them into one
//! [`ConfigTree`]. Files are parsed in parallel with `rayon`, then applied in
//! increasing modification-time order so the most recently edited file wins
//! any top-level key it defines. The merge is shallow: a top-level key's value
//! is replaced wholesale, never deep-merged.
use crate::{
    constants::TOML_EXTENSION,
    core::{
        config_resolver::{ConfigError, ConfigResult},
        source::{self, ConfigSource},
    },
    models::ConfigTree,
};
use log;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use toml::Value;
use walkdir::WalkDir;

/// The merged tree of one directory plus the files it came from.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub tree: ConfigTree,
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Loads configuration from `dir`.
///
/// * With `file` set, only that file is parsed.
/// * Without it, every `*.toml` file directly inside `dir` is parsed and merged
///   by increasing modification time.
///
/// A missing directory (or a missing explicit file) is not an error: a warning
/// is logged and an empty result is returned so the caller can fall back.
///
/// # Errors
/// Returns `ConfigError::ConfigFormat` naming the offending file if any file is
/// not valid TOML, or `ConfigError::Io` if a file cannot be read.
pub fn load_toml_files(dir: &Path, file: Option<&str>) -> ConfigResult<LoadedConfig> {
    if !dir.is_dir() {
        log::warn!(
            "Configuration directory '{}' doesn't exist.",
            dir.display()
        );
        return Ok(LoadedConfig::default());
    }

    if let Some(file_name) = file.map(str::trim).filter(|f| !f.is_empty()) {
        let path = dir.join(file_name);
        if !path.is_file() {
            log::warn!("Configuration file '{}' doesn't exist.", path.display());
            return Ok(LoadedConfig::default());
        }
        let (source, tree) = parse_file(&path)?;
        log::debug!(
            "Loaded {} top-level keys from '{}'.",
            tree.len(),
            path.display()
        );
        return Ok(LoadedConfig {
            tree,
            sources: vec![source],
        });
    }

    let files = list_toml_files(dir);
    let mut parsed = files
        .par_iter()
        .map(|path| parse_file(path))
        .collect::<ConfigResult<Vec<_>>>()?;

    // Oldest first, so newer files override. Equal timestamps fall back to path
    // order to keep the result deterministic.
    parsed.sort_by(|(a, _), (b, _)| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

    let mut merged = ConfigTree::new();
    let mut sources = Vec::with_capacity(parsed.len());
    for (source, tree) in parsed {
        for (key, value) in tree {
            if merged.contains_key(&key) {
                log::debug!(
                    "Top-level key '{}' overridden by more recent file '{}'.",
                    key,
                    source.path.display()
                );
            }
            merged.insert(key, value);
        }
        sources.push(source);
    }

    log::debug!(
        "Merged {} files from '{}' into {} top-level keys.",
        sources.len(),
        dir.display(),
        merged.len()
    );
    Ok(LoadedConfig {
        tree: merged,
        sources,
    })
}

/// Parses a configuration document held in memory (used for the bundled default).
///
/// # Errors
/// Returns `ConfigError::ConfigFormat` labelled with `origin` if the text is not valid TOML.
pub fn parse_str(origin: &str, content: &str) -> ConfigResult<ConfigTree> {
    let tree: ConfigTree = toml::from_str(content).map_err(|e| ConfigError::ConfigFormat {
        path: origin.to_string(),
        source: e,
    })?;
    Ok(normalize_keys(tree))
}

/// Lower-cases and trims every table key, recursively.
pub fn normalize_keys(tree: ConfigTree) -> ConfigTree {
    tree.into_iter()
        .map(|(k, v)| (k.trim().to_lowercase(), normalize_value(v)))
        .collect()
}

fn normalize_value(value: Value) -> Value {
    match value {
        Value::Table(t) => Value::Table(normalize_keys(t)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        other => other,
    }
}

fn parse_file(path: &Path) -> ConfigResult<(ConfigSource, ConfigTree)> {
    let (source, content) = source::read_source(path)?;
    let tree = parse_str(&path.display().to_string(), &content)?;
    Ok((source, tree))
}

fn list_toml_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                log::warn!("Skipping unreadable entry in '{}': {}", dir.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(TOML_EXTENSION))
        })
        .collect()
}
