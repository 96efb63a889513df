//! Persistent storage
//!
//! Resolves where model files and settings live on disk, and hosts the
//! download and settings submodules.

pub mod download;
pub mod settings;

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use thiserror::Error;

/// Environment variable overriding the models directory.
pub const MODELS_DIR_ENV: &str = "MODELHOST_MODELS_DIR";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No application data directory available")]
    NoDataDir,
}

/// Per-application data directory (settings, default models location).
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("", "", "modelhost")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}

/// Directory holding model files.
///
/// Honors the `MODELHOST_MODELS_DIR` override (tilde-expanded) and falls
/// back to `<data dir>/models`. Resolution is pure; the directory is only
/// created when a download first needs it.
pub fn models_dir() -> PathBuf {
    resolve_models_dir_with(|key| std::env::var(key).ok())
}

/// Resolution with an injectable environment lookup, so tests can substitute
/// values without mutating the process environment.
pub fn resolve_models_dir_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(value) = env(MODELS_DIR_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }
    get_data_dir()
        .map(|d| d.join("models"))
        .unwrap_or_else(|_| PathBuf::from("./models"))
}

/// Expand a leading `~` or `~/` to the user home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(base) = BaseDirs::new() {
            let home = base.home_dir();
            return if path == "~" {
                home.to_path_buf()
            } else {
                home.join(&path[2..])
            };
        }
    }
    PathBuf::from(path)
}
