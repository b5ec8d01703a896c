// src/core/source.rs

use crate::core::config_resolver::{ConfigError, ConfigResult};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

const HASH_TRUNCATE_LENGTH: usize = 16; // 16 bytes = 32 hex characters

/// Describes one TOML file that contributed to a merged configuration tree.
/// The modification time decides merge precedence; the hash identifies the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub file_size: u64,
    pub content_hash: String,
}

/// Reads a configuration file and describes it.
///
/// Returns the source metadata together with the file's text so callers
/// only touch the disk once per file.
///
/// # Errors
/// Returns `ConfigError::Io` if the file or its metadata cannot be read.
pub fn read_source(path: &Path) -> ConfigResult<(ConfigSource, String)> {
    debug!("Reading configuration source '{}'", path.display());

    let io_err = |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };

    let metadata = fs::metadata(path).map_err(io_err)?;
    let modified = metadata.modified().map_err(io_err)?;
    let file_size = metadata.len();

    let content = fs::read_to_string(path).map_err(io_err)?;
    let content_hash = hash_content(content.as_bytes());

    debug!(
        "Source '{}': size={}, hash={}",
        path.display(),
        file_size,
        content_hash
    );

    Ok((
        ConfigSource {
            path: path.to_path_buf(),
            modified,
            file_size,
            content_hash,
        },
        content,
    ))
}

/// Truncated blake3 digest of some configuration content, hex encoded.
pub fn hash_content(content: &[u8]) -> String {
    let hash = blake3::hash(content);
    hex::encode(&hash.as_bytes()[..HASH_TRUNCATE_LENGTH])
}

/// A stable fingerprint over a set of sources, independent of their order.
pub fn fingerprint(sources: &[ConfigSource]) -> String {
    let mut hashes: Vec<&str> = sources.iter().map(|s| s.content_hash.as_str()).collect();
    hashes.sort_unstable();
    hash_content(hashes.join(":").as_bytes())
}
