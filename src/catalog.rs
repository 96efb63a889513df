//! Model catalog
//!
//! Static registry of known models and the validity rule for their
//! local files. Descriptors are defined once at startup and never mutated.

use once_cell::sync::Lazy;
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage;

/// Inference backend a model runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBackend {
    LlamaCpp,
    Rwkv,
}

/// Immutable description of one downloadable model.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    /// Unique identifier, stable across releases
    pub id: String,
    /// Display name
    pub name: String,
    /// Backend the model file targets
    pub backend: ModelBackend,
    /// Remote location of the model file
    pub download_url: String,
    /// File name inside the models directory
    pub file_name: String,
    /// A local file smaller than this is treated as a failed download
    pub minimum_bytes: u64,
}

impl ModelDescriptor {
    /// Path of the model file inside `dir`. Pure, no I/O.
    pub fn local_path_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.file_name)
    }

    /// Path of the model file inside the resolved models directory.
    pub fn local_path(&self) -> PathBuf {
        self.local_path_in(&storage::models_dir())
    }

    /// Whether the local copy in `dir` exists and meets the size threshold.
    /// A file of exactly `minimum_bytes` is valid.
    pub fn is_valid_in(&self, dir: &Path) -> bool {
        match fs::metadata(self.local_path_in(dir)) {
            Ok(meta) => meta.is_file() && meta.len() >= self.minimum_bytes,
            Err(_) => false,
        }
    }

    /// Whether the local copy in the resolved models directory is valid.
    pub fn is_valid(&self) -> bool {
        self.is_valid_in(&storage::models_dir())
    }
}

/// Known models, in presentation order.
static CATALOG: Lazy<Vec<ModelDescriptor>> = Lazy::new(|| {
    vec![
        ModelDescriptor {
            id: "phi-1.5-q4".to_string(),
            name: "Phi-1.5 Q4".to_string(),
            backend: ModelBackend::LlamaCpp,
            download_url:
                "https://huggingface.co/TheBloke/phi-1_5-GGUF/resolve/main/phi-1_5.Q4_K_M.gguf"
                    .to_string(),
            file_name: "phi-1_5.Q4_K_M.gguf".to_string(),
            minimum_bytes: 100_000_000,
        },
        ModelDescriptor {
            id: "rwkv-430m".to_string(),
            name: "RWKV 430M".to_string(),
            backend: ModelBackend::Rwkv,
            download_url:
                "https://huggingface.co/RWKV/rwkv-4-pile-430m/resolve/main/RWKV-4-Pile-430M-20220808-8066.pth"
                    .to_string(),
            file_name: "RWKV-4-Pile-430M-20220808-8066.pth".to_string(),
            minimum_bytes: 100_000_000,
        },
    ]
});

/// All known models, in presentation order.
pub fn available() -> &'static [ModelDescriptor] {
    &CATALOG
}

/// Look up a catalog entry by id.
pub fn find(id: &str) -> Option<&'static ModelDescriptor> {
    CATALOG.iter().find(|m| m.id == id)
}

/// Default model id (first catalog entry).
pub fn default_model_id() -> &'static str {
    &CATALOG[0].id
}

/// Catalog entries whose local file in `dir` is absent or too small.
pub fn missing_in(dir: &Path) -> Vec<&'static ModelDescriptor> {
    CATALOG.iter().filter(|m| !m.is_valid_in(dir)).collect()
}
