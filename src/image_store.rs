// src/image_store.rs

//! Durable storage for order attachments: product photos and label PDFs.
//!
//! Objects are named after the SHA-256 of their content, so storing the same
//! file twice yields the same URL.

use crate::config::{ImageBackend, ImagesConfig};
use crate::record_store::PersistenceError;
use crate::share_cache::compute_digest;
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use tracing::{info, warn};

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store `bytes` and return a URL that stays valid.
    async fn store(&self, bytes: Vec<u8>, mime_hint: &str) -> Result<String, PersistenceError>;
}

pub fn extension_for(mime_hint: &str) -> &'static str {
    let essence = mime_hint
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "application/pdf" => "pdf",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "bin",
    }
}

pub fn object_name(bytes: &[u8], mime_hint: &str) -> String {
    format!("{}.{}", compute_digest(bytes), extension_for(mime_hint))
}

fn check_not_empty(bytes: &[u8]) -> Result<(), PersistenceError> {
    if bytes.is_empty() {
        return Err(PersistenceError::Rejected("refusing to store an empty file".into()));
    }
    Ok(())
}

/// Writes objects into a local directory served under `public_base`.
pub struct DirImageStore {
    dir: PathBuf,
    public_base: String,
}

impl DirImageStore {
    pub fn new(dir: impl Into<PathBuf>, public_base: &str) -> Self {
        Self {
            dir: dir.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageStore for DirImageStore {
    async fn store(&self, bytes: Vec<u8>, mime_hint: &str) -> Result<String, PersistenceError> {
        check_not_empty(&bytes)?;
        let name = object_name(&bytes, mime_hint);
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &bytes).await?;
        info!(path = %path.display(), bytes = bytes.len(), "Object written");
        Ok(format!("{}/{name}", self.public_base))
    }
}

/// Uploads objects to a bucket-style storage API:
/// `POST {endpoint}/storage/v1/object/{bucket}/{name}` with a bearer key,
/// served back from `{endpoint}/storage/v1/object/public/{bucket}/{name}`.
pub struct HttpImageStore {
    client: Client,
    endpoint: String,
    bucket: String,
    api_key: String,
}

impl HttpImageStore {
    pub fn new(endpoint: &str, bucket: &str, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_key,
        }
    }

    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{name}",
            self.endpoint, self.bucket
        )
    }
}

#[async_trait]
impl ImageStore for HttpImageStore {
    async fn store(&self, bytes: Vec<u8>, mime_hint: &str) -> Result<String, PersistenceError> {
        check_not_empty(&bytes)?;
        let name = object_name(&bytes, mime_hint);
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.endpoint,
            self.bucket,
            urlencoding::encode(&name)
        );
        let size = bytes.len();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", mime_hint)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        if let Some(err) = response.error_for_status_ref().err() {
            let body = response.text().await.unwrap_or_default();
            warn!(error = %err, body = %body, bucket = %self.bucket, "Object upload refused");
            return Err(err.into());
        }

        info!(bucket = %self.bucket, name = %name, bytes = size, "Object uploaded");
        Ok(self.public_url(&name))
    }
}

/// Build the configured backend. The HTTP backend reads its key from the
/// environment variable named in the config.
pub fn from_config(cfg: &ImagesConfig) -> Result<Box<dyn ImageStore>, PersistenceError> {
    match cfg.backend {
        ImageBackend::Dir => {
            info!(dir = %cfg.dir, "Using local directory image store");
            Ok(Box::new(DirImageStore::new(&cfg.dir, &cfg.public_base)))
        }
        ImageBackend::Http => {
            if cfg.endpoint.is_empty() {
                return Err(PersistenceError::Rejected(
                    "images.endpoint is required for the http backend".into(),
                ));
            }
            let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
                PersistenceError::Rejected(format!(
                    "{} env var required for the http image backend",
                    cfg.api_key_env
                ))
            })?;
            info!(endpoint = %cfg.endpoint, bucket = %cfg.bucket, "Using HTTP image store");
            Ok(Box::new(HttpImageStore::new(&cfg.endpoint, &cfg.bucket, api_key)))
        }
    }
}
