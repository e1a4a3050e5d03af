//! External state ports
//!
//! The engine depends only on these narrow capabilities. In-memory
//! implementations back the test suite; `auditstore`-backed
//! implementations back the binary.

mod memory;
mod persist;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Finding, Task, TaskStatus};
use crate::events::AuditEvent;

pub use memory::{MemoryStores, SystemClock};
pub use persist::PersistentStores;

/// Errors from any port implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Advisory lease on a task row; released on drop
pub trait TaskLease: Send {}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Task>, StoreError>;
    async fn save(&self, task: &Task) -> Result<(), StoreError>;
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;
    /// `None` means another worker holds the lock; skip the task.
    async fn acquire_lock(&self, id: &str) -> Result<Option<Box<dyn TaskLease>>, StoreError>;
}

/// Outcome of a fingerprint upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[async_trait]
pub trait FindingStore: Send + Sync {
    async fn upsert_by_fingerprint(&self, finding: &Finding) -> Result<UpsertOutcome, StoreError>;
    async fn list_for_task(&self, task_id: &str) -> Result<Vec<Finding>, StoreError>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_batch(&self, task_id: &str, events: &[AuditEvent]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, task_id: &str, index: u64, blob: &[u8]) -> Result<(), StoreError>;
    async fn get_latest(&self, task_id: &str) -> Result<Option<(u64, Vec<u8>)>, StoreError>;
    async fn prune(&self, task_id: &str, keep: u64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Key-value cache for memoized LLM completions
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;
}

/// Wall-clock port, kept narrow so tests can run under tokio's paused
/// clock without touching the system time.
pub trait Clock: Send + Sync {
    fn now(&self) -> tokio::time::Instant;
    fn utc_now(&self) -> chrono::DateTime<chrono::Utc>;
}
