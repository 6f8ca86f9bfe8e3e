// src/share_cache.rs

//! Ephemeral inbox for files handed over by the OS share sheet.
//!
//! Each slot holds at most one payload. Writing a slot replaces whatever was
//! there; `take` reads and deletes in one step so a payload is claimed once.

use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

#[derive(Error, Debug)]
pub enum ShareCacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("share cache lock poisoned")]
    Poisoned,
}

/// Well-known slot names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareSlot {
    Pdf,
    Image,
    File,
}

impl ShareSlot {
    /// Probe order used when claiming.
    pub const ALL: [ShareSlot; 3] = [ShareSlot::Pdf, ShareSlot::Image, ShareSlot::File];

    pub fn key(self) -> &'static str {
        match self {
            ShareSlot::Pdf => "/shared-pdf",
            ShareSlot::Image => "/shared-image",
            ShareSlot::File => "/shared-file",
        }
    }

    /// Slot a payload of `mime_type` belongs in, or `None` if it is not kept.
    pub fn for_mime(mime_type: &str, split_by_kind: bool) -> Option<ShareSlot> {
        if !split_by_kind {
            return Some(ShareSlot::File);
        }
        match mime_kind(mime_type) {
            MimeKind::Pdf => Some(ShareSlot::Pdf),
            MimeKind::Image => Some(ShareSlot::Image),
            MimeKind::Other => None,
        }
    }

    pub fn default_file_name(self) -> &'static str {
        match self {
            ShareSlot::Pdf => "shared-label.pdf",
            ShareSlot::Image => "shared-image",
            ShareSlot::File => "shared-file",
        }
    }
}

impl fmt::Display for ShareSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeKind {
    Pdf,
    Image,
    Other,
}

/// Classify a MIME type, ignoring parameters and letter case.
pub fn mime_kind(mime_type: &str) -> MimeKind {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence == "application/pdf" {
        MimeKind::Pdf
    } else if essence.starts_with("image/") {
        MimeKind::Image
    } else {
        MimeKind::Other
    }
}

/// A shared file waiting to be claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
    /// SHA-256 of `bytes`, hex encoded.
    pub digest: String,
    /// Unix seconds.
    pub stored_at: i64,
}

impl SharedPayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, file_name: Option<String>) -> Self {
        let digest = compute_digest(&bytes);
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name,
            digest,
            stored_at: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

pub fn compute_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub trait ShareCache: Send + Sync {
    /// Store `payload` in `slot`, replacing any pending payload.
    fn put(&self, slot: ShareSlot, payload: &SharedPayload) -> Result<(), ShareCacheError>;

    /// Read and delete the payload in `slot`.
    fn take(&self, slot: ShareSlot) -> Result<Option<SharedPayload>, ShareCacheError>;

    /// Read the payload in `slot` without consuming it.
    fn peek(&self, slot: ShareSlot) -> Result<Option<SharedPayload>, ShareCacheError>;
}

/// Durable share inbox backed by SQLite. Survives restarts of the service,
/// so a share captured while nothing was looking can still be claimed.
pub struct SqliteShareCache {
    conn: Mutex<Connection>,
    name: String,
}

impl SqliteShareCache {
    pub fn open<P: AsRef<Path>>(db_path: P, name: &str) -> Result<Self, ShareCacheError> {
        Self::init(Connection::open(db_path)?, name)
    }

    #[cfg(test)]
    pub fn open_in_memory(name: &str) -> Result<Self, ShareCacheError> {
        Self::init(Connection::open_in_memory()?, name)
    }

    fn init(conn: Connection, name: &str) -> Result<Self, ShareCacheError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS share_cache (
                cache_name TEXT NOT NULL,
                slot TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                file_name TEXT,
                digest TEXT NOT NULL,
                data BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (cache_name, slot)
            )",
            [],
        )?;
        info!(cache = %name, "Share cache initialized");
        Ok(Self {
            conn: Mutex::new(conn),
            name: name.to_string(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ShareCacheError> {
        self.conn.lock().map_err(|_| ShareCacheError::Poisoned)
    }

    fn read(conn: &Connection, name: &str, slot: ShareSlot) -> rusqlite::Result<Option<SharedPayload>> {
        conn.query_row(
            "SELECT data, mime_type, file_name, digest, stored_at
             FROM share_cache
             WHERE cache_name = ?1 AND slot = ?2",
            params![name, slot.key()],
            |row| {
                Ok(SharedPayload {
                    bytes: row.get(0)?,
                    mime_type: row.get(1)?,
                    file_name: row.get(2)?,
                    digest: row.get(3)?,
                    stored_at: row.get(4)?,
                })
            },
        )
        .optional()
    }
}

impl ShareCache for SqliteShareCache {
    fn put(&self, slot: ShareSlot, payload: &SharedPayload) -> Result<(), ShareCacheError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO share_cache
                (cache_name, slot, mime_type, file_name, digest, data, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.name,
                slot.key(),
                payload.mime_type,
                payload.file_name,
                payload.digest,
                payload.bytes,
                payload.stored_at,
            ],
        )?;
        info!(slot = %slot, bytes = payload.bytes.len(), digest = %payload.digest, "Shared file stored");
        Ok(())
    }

    fn take(&self, slot: ShareSlot) -> Result<Option<SharedPayload>, ShareCacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let payload = Self::read(&tx, &self.name, slot)?;
        if payload.is_some() {
            tx.execute(
                "DELETE FROM share_cache WHERE cache_name = ?1 AND slot = ?2",
                params![self.name, slot.key()],
            )?;
        }
        tx.commit()?;
        if let Some(ref p) = payload {
            info!(slot = %slot, digest = %p.digest, "Shared file claimed");
        }
        Ok(payload)
    }

    fn peek(&self, slot: ShareSlot) -> Result<Option<SharedPayload>, ShareCacheError> {
        let conn = self.lock()?;
        Ok(Self::read(&conn, &self.name, slot)?)
    }
}

/// In-process share inbox; gone when the process exits.
#[derive(Default)]
pub struct MemoryShareCache {
    entries: Mutex<HashMap<ShareSlot, SharedPayload>>,
}

impl MemoryShareCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ShareSlot, SharedPayload>>, ShareCacheError> {
        self.entries.lock().map_err(|_| ShareCacheError::Poisoned)
    }
}

impl ShareCache for MemoryShareCache {
    fn put(&self, slot: ShareSlot, payload: &SharedPayload) -> Result<(), ShareCacheError> {
        self.lock()?.insert(slot, payload.clone());
        Ok(())
    }

    fn take(&self, slot: ShareSlot) -> Result<Option<SharedPayload>, ShareCacheError> {
        Ok(self.lock()?.remove(&slot))
    }

    fn peek(&self, slot: ShareSlot) -> Result<Option<SharedPayload>, ShareCacheError> {
        Ok(self.lock()?.get(&slot).cloned())
    }
}

/// A cache whose every operation fails, for exercising degraded paths.
#[cfg(test)]
pub(crate) struct BrokenShareCache;

#[cfg(test)]
impl ShareCache for BrokenShareCache {
    fn put(&self, _slot: ShareSlot, _payload: &SharedPayload) -> Result<(), ShareCacheError> {
        Err(ShareCacheError::Poisoned)
    }

    fn take(&self, _slot: ShareSlot) -> Result<Option<SharedPayload>, ShareCacheError> {
        Err(ShareCacheError::Poisoned)
    }

    fn peek(&self, _slot: ShareSlot) -> Result<Option<SharedPayload>, ShareCacheError> {
        Err(ShareCacheError::Poisoned)
    }
}
