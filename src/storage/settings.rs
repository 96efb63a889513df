//! Settings storage
//!
//! Persistence of user preferences consumed by the session manager.
//! Values are clamped to safe ranges on load and on save.

use crate::catalog;
use crate::storage::{expand_tilde, get_data_dir, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Model activated by `generate` when none is loaded
    pub default_model_id: String,
    /// Forward chunks as they arrive instead of buffering the full response
    pub streaming_enabled: bool,
    /// Seconds of inactivity before the active model is unloaded (30-300)
    pub idle_timeout_secs: f64,
    /// Maximum tokens per generation (64-1024)
    pub max_tokens: u32,
    /// Sampling temperature (0.0-1.5)
    pub temperature: f64,
    /// Nucleus sampling parameter (0.1-1.0)
    pub top_p: f64,
    /// Layers offloaded to the GPU (0-64)
    pub gpu_layers: u32,
    /// Explicit engine binary path, empty = auto-discover
    pub engine_binary_path: String,
    /// Prefer the server sibling binary when one is installed. Stored for
    /// the preferences surface; generation always runs the CLI binary, so
    /// this flag is not consulted by the session manager.
    #[serde(default = "default_use_server")]
    pub use_engine_server: bool,
}

fn default_use_server() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_model_id: catalog::default_model_id().to_string(),
            streaming_enabled: true,
            idle_timeout_secs: 90.0,
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            gpu_layers: 24,
            engine_binary_path: String::new(),
            use_engine_server: true,
        }
    }
}

impl AppSettings {
    /// Clamp every field to its accepted range and normalize paths.
    ///
    /// An unknown model id falls back to the first catalog entry.
    pub fn validate(&mut self) {
        if catalog::find(&self.default_model_id).is_none() {
            tracing::warn!(
                "Unknown default model '{}', falling back to '{}'",
                self.default_model_id,
                catalog::default_model_id()
            );
            self.default_model_id = catalog::default_model_id().to_string();
        }

        self.idle_timeout_secs = self.idle_timeout_secs.clamp(30.0, 300.0);
        self.max_tokens = self.max_tokens.clamp(64, 1024);
        self.temperature = self.temperature.clamp(0.0, 1.5);
        self.top_p = self.top_p.clamp(0.1, 1.0);
        self.gpu_layers = self.gpu_layers.min(64);

        let trimmed = self.engine_binary_path.trim();
        self.engine_binary_path = if trimmed.is_empty() {
            String::new()
        } else {
            expand_tilde(trimmed).to_string_lossy().into_owned()
        };
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns defaults if the file doesn't exist or is corrupted.
pub fn load_settings() -> AppSettings {
    match load_settings_internal() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    }
}

fn load_settings_internal() -> Result<AppSettings, StorageError> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(AppSettings::default());
    }

    let json = fs::read_to_string(&path)?;
    let mut settings: AppSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from disk");
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<(), StorageError> {
    let path = get_settings_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to disk");
    Ok(())
}
