//! Port implementations backed by the `auditstore` crate

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use auditstore::{Store, StoreLock};

use crate::domain::{Finding, Task, TaskStatus};
use crate::events::AuditEvent;

use super::{
    BlobStore, CheckpointStore, EventStore, FindingStore, KvCache, StoreError, TaskLease, TaskStore, UpsertOutcome,
};

const CACHE: &str = "llm_cache";

/// All persistent ports behind one handle.
///
/// `auditstore::Store` holds a SQLite connection (`Send` but not
/// `Sync`), so access is serialized through a std mutex; every
/// operation is short.
#[derive(Clone)]
pub struct PersistentStores {
    store: Arc<StdMutex<Store>>,
}

impl PersistentStores {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Store::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            store: Arc::new(StdMutex::new(store)),
        })
    }

    fn with<T>(&self, f: impl FnOnce(&Store) -> Result<T, auditstore::StoreError>) -> Result<T, StoreError> {
        let store = self
            .store
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))?;
        f(&store).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

struct PersistentLease {
    _lock: StoreLock,
}

impl TaskLease for PersistentLease {}

#[async_trait]
impl TaskStore for PersistentStores {
    async fn load(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let value = self.with(|s| s.get(auditstore::TASKS, id))?;
        value.map(serde_json::from_value).transpose().map_err(Into::into)
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let body = serde_json::to_value(task)?;
        self.with(|s| s.put(auditstore::TASKS, &task.id, Some(task.status.as_str()), &body))
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let values = self.with(|s| s.list(auditstore::TASKS, Some(status.as_str())))?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }

    async fn acquire_lock(&self, id: &str) -> Result<Option<Box<dyn TaskLease>>, StoreError> {
        let lock = self.with(|s| s.try_lock(id))?;
        Ok(lock.map(|l| Box::new(PersistentLease { _lock: l }) as Box<dyn TaskLease>))
    }
}

#[async_trait]
impl FindingStore for PersistentStores {
    async fn upsert_by_fingerprint(&self, finding: &Finding) -> Result<UpsertOutcome, StoreError> {
        // The fingerprint is the record id, so an upsert is a plain put
        let existed = self.with(|s| s.get(auditstore::FINDINGS, &finding.fingerprint))?.is_some();
        let body = serde_json::to_value(finding)?;
        self.with(|s| s.put(auditstore::FINDINGS, &finding.fingerprint, Some(&finding.task_id), &body))?;
        Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Created })
    }

    async fn list_for_task(&self, task_id: &str) -> Result<Vec<Finding>, StoreError> {
        let values = self.with(|s| s.list(auditstore::FINDINGS, Some(task_id)))?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl EventStore for PersistentStores {
    async fn append_batch(&self, task_id: &str, events: &[AuditEvent]) -> Result<(), StoreError> {
        let rows: Vec<(u64, serde_json::Value)> = events
            .iter()
            .map(|e| Ok((e.sequence, serde_json::to_value(e)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        self.with(|s| s.append_events(task_id, &rows))
    }
}

#[async_trait]
impl CheckpointStore for PersistentStores {
    async fn put(&self, task_id: &str, index: u64, blob: &[u8]) -> Result<(), StoreError> {
        self.with(|s| s.put_checkpoint(task_id, index, blob))
    }

    async fn get_latest(&self, task_id: &str) -> Result<Option<(u64, Vec<u8>)>, StoreError> {
        self.with(|s| s.latest_checkpoint(task_id))
    }

    async fn prune(&self, task_id: &str, keep: u64) -> Result<(), StoreError> {
        self.with(|s| s.prune_checkpoints(task_id, keep).map(|_| ()))
    }
}

#[async_trait]
impl BlobStore for PersistentStores {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.with(|s| s.put_blob(key, data))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with(|s| s.get_blob(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with(|s| s.delete_blob(key))
    }
}

#[async_trait]
impl KvCache for PersistentStores {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.with(|s| s.get(CACHE, key))?;
        let Some(value) = value else { return Ok(None) };

        let expires = value.get("expires_at").and_then(|v| v.as_i64()).unwrap_or(0);
        if expires < chrono::Utc::now().timestamp() {
            return Ok(None);
        }
        Ok(value.get("value").and_then(|v| v.as_str()).map(String::from))
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let body = serde_json::json!({
            "value": value,
            "expires_at": chrono::Utc::now().timestamp() + ttl_seconds as i64,
        });
        self.with(|s| s.put(CACHE, key, None, &body))
    }
}
