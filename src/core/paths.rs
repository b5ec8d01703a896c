// src/core/paths.rs

use lazy_static::lazy_static;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

lazy_static! {
    static ref HOME_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find the user's home directory.")]
    HomeDirNotFound,
    #[error("Could not read the current working directory: {source}")]
    CurrentDir {
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to expand path '{template}': {reason}")]
    Expansion { template: String, reason: String },
}

/// Returns the user's home directory.
///
/// Memoized: the first call asks the OS, later calls return the cached value.
pub fn home_dir() -> Result<PathBuf, PathError> {
    let mut cached = HOME_DIR.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(path) = &*cached {
        return Ok(path.clone());
    }
    let path = dirs::home_dir().ok_or(PathError::HomeDirNotFound)?;
    *cached = Some(path.clone());
    Ok(path)
}

pub fn current_dir() -> Result<PathBuf, PathError> {
    env::current_dir().map_err(|source| PathError::CurrentDir { source })
}

/// Expands `~` and environment variables (`$VAR`, `${VAR}`) in a path read
/// from configuration.
///
/// # Errors
/// Returns `PathError::Expansion` if a referenced variable is not set.
pub fn expand_path(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template.trim()).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Makes `path` absolute against `base`. Existing paths are canonicalized
/// (without UNC prefixes on Windows); others are joined lexically.
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    dunce::canonicalize(&joined).unwrap_or(joined)
}

/// Expands and absolutizes a configured path value.
///
/// # Errors
/// Returns `PathError::Expansion` if expansion fails.
pub fn resolve_config_path(value: &str, base: &Path) -> Result<PathBuf, PathError> {
    let expanded = expand_path(value)?;
    Ok(absolutize(&expanded, base))
}
