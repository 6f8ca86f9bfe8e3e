// src/config.rs

use serde::Deserialize;
use std::{fs, io, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub share: ShareConfig,
    pub extraction: ExtractionConfig,
    pub storage: StorageConfig,
    pub images: ImagesConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

/// Where the OS share sheet posts, and where it lands afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    pub endpoint: String,
    pub landing: String,
    pub cache_name: String,
    /// Store PDFs and images in separate slots; otherwise every file goes
    /// to the generic slot.
    pub split_by_kind: bool,
    pub max_upload_bytes: usize,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            endpoint: "/upload".to_string(),
            landing: "/dropshipper".to_string(),
            cache_name: "shared-files".to_string(),
            split_by_kind: true,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_pages: usize,
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_pages: 20,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "resilink-data/resilink.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    Dir,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub backend: ImageBackend,
    /// Local directory used by the `dir` backend.
    pub dir: String,
    /// Prefix of the URLs handed back to callers.
    pub public_base: String,
    /// Upload endpoint of the `http` backend.
    pub endpoint: String,
    pub bucket: String,
    pub api_key_env: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            backend: ImageBackend::Dir,
            dir: "resilink-data/media".to_string(),
            public_base: "http://127.0.0.1:8787/media".to_string(),
            endpoint: String::new(),
            bucket: "order-images".to_string(),
            api_key_env: "RESILINK_STORAGE_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub retention_days: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(&path) {
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Share endpoint with any trailing slash removed.
    pub fn share_endpoint(&self) -> &str {
        let endpoint = self.share.endpoint.as_str();
        match endpoint.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => trimmed,
            _ => endpoint,
        }
    }
}
