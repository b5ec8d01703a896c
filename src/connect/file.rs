// src/connect/file.rs

use crate::connect::{ConnectError, ConnectResult};
use crate::core::config_resolver::ConfigError;
use crate::core::paths;
use crate::models::{ConfigTree, ConfigTreeExt, QualifiedKey};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a file connect's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Local,
    AzureAdls,
    AzureBlob,
}

impl StorageType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "local" => Some(StorageType::Local),
            "azure_adls" => Some(StorageType::AzureAdls),
            "azure_blob" => Some(StorageType::AzureBlob),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "local",
            StorageType::AzureAdls => "azure_adls",
            StorageType::AzureBlob => "azure_blob",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SUPPORTED_FORMATS: &[&str] = &["csv"];

/// Resolves a file connect to an existing local path.
///
/// `dir_path` is expanded and made absolute against `root`; `file_name`, when
/// set, is joined onto it. An empty `file_name` makes the directory itself the
/// handle.
///
/// # Errors
/// * `Unsupported` for remote storage types and formats other than CSV.
/// * `TypeMismatch` for an unknown `storage_type`.
/// * `MissingPath` if the resolved path does not exist.
pub fn resolve_file_path(key: &QualifiedKey, params: &ConfigTree, root: &Path) -> ConnectResult<PathBuf> {
    let raw_storage = params.get_str("storage_type").unwrap_or_default();
    let storage = StorageType::from_name(raw_storage).ok_or_else(|| ConnectError::TypeMismatch {
        key: key.to_string(),
        expected: "one of local, azure_adls, azure_blob".to_string(),
        found: raw_storage.to_string(),
    })?;
    if storage != StorageType::Local {
        return Err(ConnectError::Unsupported {
            family: "file".to_string(),
            auth: storage.to_string(),
        });
    }

    let format = params.get_str("format").unwrap_or("csv").trim().to_lowercase();
    if !SUPPORTED_FORMATS.contains(&format.as_str()) {
        return Err(ConnectError::Unsupported {
            family: "file".to_string(),
            auth: format!("format '{}'", format),
        });
    }

    let dir = params.get_str("dir_path").unwrap_or(".");
    let dir = paths::resolve_config_path(dir, root).map_err(ConfigError::from)?;
    let path = match params.get_str("file_name").map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => dir.join(name),
        None => dir,
    };

    if !path.exists() {
        return Err(ConnectError::MissingPath {
            key: key.to_string(),
            path: path.display().to_string(),
        });
    }
    log::debug!("File connect '{}' resolved to '{}'.", key, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn params(text: &str) -> ConfigTree {
        toml::from_str(text).unwrap()
    }

    fn key() -> QualifiedKey {
        QualifiedKey::new("data_connects", "file_0")
    }

    #[test]
    fn test_relative_dir_resolves_against_root() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("data")).unwrap();
        fs::write(root.path().join("data/train.csv"), "a,b\n1,2\n").unwrap();

        let path = resolve_file_path(
            &key(),
            &params("storage_type = \"local\"\nformat = \"csv\"\ndir_path = \"./data\"\nfile_name = \"train.csv\""),
            root.path(),
        )
        .unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("data/train.csv"));

        let dir = resolve_file_path(&key(), &params("dir_path = \"data\""), root.path()).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let root = TempDir::new().unwrap();
        let err = resolve_file_path(&key(), &params("file_name = \"nope.csv\""), root.path()).unwrap_err();
        assert!(matches!(err, ConnectError::MissingPath { .. }));
    }

    #[test]
    fn test_remote_storage_and_other_formats_are_unsupported() {
        let root = TempDir::new().unwrap();
        for text in [
            "storage_type = \"azure_adls\"",
            "storage_type = \"azure_blob\"",
            "format = \"parquet\"",
        ] {
            assert!(matches!(
                resolve_file_path(&key(), &params(text), root.path()),
                Err(ConnectError::Unsupported { .. })
            ));
        }
        assert!(matches!(
            resolve_file_path(&key(), &params("storage_type = \"ftp\""), root.path()),
            Err(ConnectError::TypeMismatch { .. })
        ));
    }
}
