// src/record_store.rs

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

/// Failure of an external collaborator (record store or image store).
/// Shown to the user with its message; the caller may simply resubmit.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{collection} record {id} not found")]
    NotFound { collection: Collection, id: String },
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("record store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Products,
    Orders,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Orders => "orders",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored JSON document. `id` and `created_at` are owned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    /// Unix seconds.
    pub created_at: i64,
    pub body: Value,
}

impl Record {
    /// Deserialize the body with `id` and `created_at` folded in.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PersistenceError> {
        let mut body = match &self.body {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        body.insert("id".into(), Value::String(self.id.clone()));
        body.insert("created_at".into(), Value::from(self.created_at));
        Ok(serde_json::from_value(Value::Object(body))?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub created_after: Option<i64>,
    pub equals: Vec<(String, Value)>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Keep records created at or after `ts`.
    pub fn created_after(mut self, ts: i64) -> Self {
        self.created_after = Some(ts);
        self
    }

    pub fn field_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.equals.push((field.to_string(), value.into()));
        self
    }

    fn matches(&self, body: &Value) -> bool {
        self.equals
            .iter()
            .all(|(field, value)| body.get(field) == Some(value))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Newest first.
    async fn list(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, PersistenceError>;

    async fn insert(&self, collection: Collection, body: Value) -> Result<Record, PersistenceError>;

    /// Merge the top-level keys of `patch` into the stored body.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<(), PersistenceError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), PersistenceError>;
}

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    seq: AtomicU64,
}

impl SqliteRecordStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        Self::init(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(collection, created_at)",
            [],
        )?;

        info!("Record store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
            seq: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    fn generate_id(&self, collection: Collection, created_at: i64) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let mut hasher = Sha256::new();
        hasher.update(collection.name().as_bytes());
        hasher.update(created_at.to_be_bytes());
        hasher.update(nanos.to_be_bytes());
        hasher.update(seq.to_be_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    /// Insert with an explicit creation time.
    pub fn insert_at(
        &self,
        collection: Collection,
        body: Value,
        created_at: i64,
    ) -> Result<Record, PersistenceError> {
        let Value::Object(mut map) = body else {
            return Err(PersistenceError::Rejected(format!(
                "{collection} record must be a JSON object"
            )));
        };
        map.remove("id");
        map.remove("created_at");
        let body = Value::Object(map);

        let id = self.generate_id(collection, created_at);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO records (collection, id, created_at, body) VALUES (?1, ?2, ?3, ?4)",
            params![collection.name(), id, created_at, serde_json::to_string(&body)?],
        )?;
        info!(collection = %collection, id = %id, "Record inserted");
        Ok(Record {
            id,
            created_at,
            body,
        })
    }

    /// Delete every record in `collection` created strictly before `cutoff`.
    pub fn purge_created_before(
        &self,
        collection: Collection,
        cutoff: i64,
    ) -> Result<usize, PersistenceError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND created_at < ?2",
            params![collection.name(), cutoff],
        )?;
        info!(collection = %collection, cutoff, deleted, "Old records purged");
        Ok(deleted)
    }

    pub fn count(&self, collection: Collection) -> Result<usize, PersistenceError> {
        let conn = self.lock()?;
        let n: usize = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![collection.name()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn list(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>, PersistenceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, body
             FROM records
             WHERE collection = ?1 AND created_at >= ?2
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let since = filter.created_after.unwrap_or(i64::MIN);
        let rows = stmt
            .query_map(params![collection.name(), since], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, created_at, body) in rows {
            let body: Value = serde_json::from_str(&body)?;
            if filter.matches(&body) {
                records.push(Record {
                    id,
                    created_at,
                    body,
                });
            }
        }
        Ok(records)
    }

    async fn insert(&self, collection: Collection, body: Value) -> Result<Record, PersistenceError> {
        self.insert_at(collection, body, OffsetDateTime::now_utc().unix_timestamp())
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<(), PersistenceError> {
        let Value::Object(patch) = patch else {
            return Err(PersistenceError::Rejected("patch must be a JSON object".into()));
        };

        let conn = self.lock()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.name(), id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Err(PersistenceError::NotFound {
                collection,
                id: id.to_string(),
            });
        };

        let mut body = match serde_json::from_str::<Value>(&stored)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            if key != "id" && key != "created_at" {
                body.insert(key, value);
            }
        }

        conn.execute(
            "UPDATE records SET body = ?1 WHERE collection = ?2 AND id = ?3",
            params![serde_json::to_string(&body)?, collection.name(), id],
        )?;
        info!(collection = %collection, id = %id, "Record updated");
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection.name(), id],
        )?;
        if deleted == 0 {
            return Err(PersistenceError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        info!(collection = %collection, id = %id, "Record deleted");
        Ok(())
    }
}
