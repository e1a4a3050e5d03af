//! Core Store implementation: SQLite index + JSONL append log

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::lock::StoreLock;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
}

/// Per-collection statistics
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub collection: String,
    pub record_count: u64,
}

/// The record store.
///
/// `Connection` is not `Sync`, so callers that share a `Store` across
/// threads wrap it in a mutex; all operations are short.
pub struct Store {
    base_path: PathBuf,
    conn: Connection,
}

impl Store {
    /// Open or create a store at the given directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(base_path.join("log"))?;
        fs::create_dir_all(base_path.join("blobs"))?;
        fs::create_dir_all(base_path.join("locks"))?;

        let conn = Connection::open(base_path.join("index.db"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                 collection TEXT NOT NULL,
                 id         TEXT NOT NULL,
                 status     TEXT,
                 updated_at TEXT NOT NULL,
                 body       TEXT NOT NULL,
                 PRIMARY KEY (collection, id)
             );
             CREATE INDEX IF NOT EXISTS idx_records_status
                 ON records (collection, status);
             CREATE TABLE IF NOT EXISTS events (
                 task_id TEXT NOT NULL,
                 seq     INTEGER NOT NULL,
                 body    TEXT NOT NULL,
                 PRIMARY KEY (task_id, seq)
             );
             CREATE TABLE IF NOT EXISTS checkpoints (
                 task_id TEXT NOT NULL,
                 idx     INTEGER NOT NULL,
                 blob    BLOB NOT NULL,
                 PRIMARY KEY (task_id, idx)
             );",
        )?;

        debug!(path = %base_path.display(), "Opened audit store");
        Ok(Self { base_path, conn })
    }

    /// Insert or replace a record and append it to the collection log.
    pub fn put(&self, collection: &str, id: &str, status: Option<&str>, body: &Value) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let body_text = serde_json::to_string(body)?;

        self.conn.execute(
            "INSERT INTO records (collection, id, status, updated_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (collection, id) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at,
                 body = excluded.body",
            params![collection, id, status, now, body_text],
        )?;

        self.append_log(collection, id, &now, body)?;
        Ok(())
    }

    /// Fetch a record by collection and id.
    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// List records in a collection, optionally filtered by status.
    pub fn list(&self, collection: &str, status: Option<&str>) -> Result<Vec<Value>, StoreError> {
        let mut out = Vec::new();

        match status {
            Some(s) => {
                let mut stmt = self.conn.prepare(
                    "SELECT body FROM records WHERE collection = ?1 AND status = ?2 ORDER BY updated_at",
                )?;
                let rows = stmt.query_map(params![collection, s], |row| row.get::<_, String>(0))?;
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY updated_at")?;
                let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
            }
        }

        Ok(out)
    }

    /// Delete a record from the index (the JSONL log keeps history).
    pub fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let n = self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(n > 0)
    }

    // === Events ===

    /// Append a batch of events for a task. Sequence numbers are assigned
    /// by the producer; replays of the same (task, seq) overwrite.
    pub fn append_events(&self, task_id: &str, events: &[(u64, Value)]) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare("INSERT OR REPLACE INTO events (task_id, seq, body) VALUES (?1, ?2, ?3)")?;
        for (seq, body) in events {
            stmt.execute(params![task_id, *seq as i64, serde_json::to_string(body)?])?;
        }
        Ok(())
    }

    /// All events for a task, ordered by sequence.
    pub fn list_events(&self, task_id: &str) -> Result<Vec<Value>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM events WHERE task_id = ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // === Checkpoints ===

    /// Store a checkpoint blob under a monotonic index.
    pub fn put_checkpoint(&self, task_id: &str, index: u64, blob: &[u8]) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO checkpoints (task_id, idx, blob) VALUES (?1, ?2, ?3)",
            params![task_id, index as i64, blob],
        )?;
        Ok(())
    }

    /// The highest-indexed checkpoint for a task, if any.
    pub fn latest_checkpoint(&self, task_id: &str) -> Result<Option<(u64, Vec<u8>)>, StoreError> {
        let row: Option<(i64, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT idx, blob FROM checkpoints WHERE task_id = ?1 ORDER BY idx DESC LIMIT 1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(idx, blob)| (idx as u64, blob)))
    }

    /// Drop all but the most recent `keep` checkpoints for a task.
    pub fn prune_checkpoints(&self, task_id: &str, keep: u64) -> Result<u64, StoreError> {
        let n = self.conn.execute(
            "DELETE FROM checkpoints WHERE task_id = ?1 AND idx NOT IN (
                 SELECT idx FROM checkpoints WHERE task_id = ?1 ORDER BY idx DESC LIMIT ?2
             )",
            params![task_id, keep as i64],
        )?;
        Ok(n as u64)
    }

    // === Blobs ===

    /// Store a large artifact under a key.
    pub fn put_blob(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    /// Fetch a blob by key.
    pub fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.blob_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob by key.
    pub fn delete_blob(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // === Locks ===

    /// Try to take the advisory lock for a task.
    pub fn try_lock(&self, name: &str) -> Result<Option<StoreLock>, StoreError> {
        Ok(StoreLock::try_acquire(&self.base_path.join("locks"), name)?)
    }

    /// Statistics per collection.
    pub fn stats(&self) -> Result<Vec<CollectionStats>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT collection, COUNT(*) FROM records GROUP BY collection ORDER BY collection")?;
        let rows = stmt.query_map([], |row| {
            Ok(CollectionStats {
                collection: row.get(0)?,
                record_count: row.get::<_, i64>(1)? as u64,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        // Keys are opaque; keep them filesystem-safe
        let safe: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.base_path.join("blobs").join(safe)
    }

    fn append_log(&self, collection: &str, id: &str, ts: &str, body: &Value) -> Result<(), StoreError> {
        let log_path = self.base_path.join("log").join(format!("{}.jsonl", collection));
        let mut file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        let line = serde_json::json!({ "ts": ts, "id": id, "body": body });
        writeln!(file, "{}", serde_json::to_string(&line)?)?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("base_path", &self.base_path).finish()
    }
}
