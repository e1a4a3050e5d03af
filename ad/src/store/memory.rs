//! In-memory port implementations (tests and single-process runs)

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Finding, Task, TaskStatus};
use crate::events::AuditEvent;

use super::{
    BlobStore, CheckpointStore, Clock, EventStore, FindingStore, KvCache, StoreError, TaskLease, TaskStore,
    UpsertOutcome,
};

/// All in-memory ports behind one handle; cloning shares state
#[derive(Clone, Default)]
pub struct MemoryStores {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
    locked: Arc<StdMutex<HashSet<String>>>,
    findings: Arc<Mutex<HashMap<String, Vec<Finding>>>>,
    events: Arc<Mutex<HashMap<String, Vec<AuditEvent>>>>,
    checkpoints: Arc<Mutex<HashMap<String, Vec<(u64, Vec<u8>)>>>>,
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    cache: Arc<Mutex<HashMap<String, (String, tokio::time::Instant)>>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded for a task, in persistence order
    pub async fn events_for(&self, task_id: &str) -> Vec<AuditEvent> {
        self.events.lock().await.get(task_id).cloned().unwrap_or_default()
    }

    /// Insert a task directly (test setup)
    pub async fn seed_task(&self, task: Task) {
        self.tasks.lock().await.insert(task.id.clone(), task);
    }
}

struct MemoryLease {
    id: String,
    locked: Arc<StdMutex<HashSet<String>>>,
}

impl TaskLease for MemoryLease {}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        if let Ok(mut locked) = self.locked.lock() {
            locked.remove(&self.id);
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStores {
    async fn load(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.lock().await.get(id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.lock().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .lock()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn acquire_lock(&self, id: &str) -> Result<Option<Box<dyn TaskLease>>, StoreError> {
        let mut locked = self
            .locked
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        if locked.contains(id) {
            return Ok(None);
        }
        locked.insert(id.to_string());
        Ok(Some(Box::new(MemoryLease {
            id: id.to_string(),
            locked: self.locked.clone(),
        })))
    }
}

#[async_trait]
impl FindingStore for MemoryStores {
    async fn upsert_by_fingerprint(&self, finding: &Finding) -> Result<UpsertOutcome, StoreError> {
        let mut findings = self.findings.lock().await;
        let list = findings.entry(finding.task_id.clone()).or_default();
        match list.iter_mut().find(|f| f.fingerprint == finding.fingerprint) {
            Some(existing) => {
                *existing = finding.clone();
                Ok(UpsertOutcome::Updated)
            }
            None => {
                list.push(finding.clone());
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn list_for_task(&self, task_id: &str) -> Result<Vec<Finding>, StoreError> {
        Ok(self.findings.lock().await.get(task_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl EventStore for MemoryStores {
    async fn append_batch(&self, task_id: &str, events: &[AuditEvent]) -> Result<(), StoreError> {
        self.events
            .lock()
            .await
            .entry(task_id.to_string())
            .or_default()
            .extend_from_slice(events);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStores {
    async fn put(&self, task_id: &str, index: u64, blob: &[u8]) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.lock().await;
        let list = checkpoints.entry(task_id.to_string()).or_default();
        list.retain(|(i, _)| *i != index);
        list.push((index, blob.to_vec()));
        list.sort_by_key(|(i, _)| *i);
        Ok(())
    }

    async fn get_latest(&self, task_id: &str) -> Result<Option<(u64, Vec<u8>)>, StoreError> {
        Ok(self
            .checkpoints
            .lock()
            .await
            .get(task_id)
            .and_then(|list| list.last().cloned()))
    }

    async fn prune(&self, task_id: &str, keep: u64) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.lock().await;
        if let Some(list) = checkpoints.get_mut(task_id) {
            let excess = list.len().saturating_sub(keep as usize);
            list.drain(..excess);
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStores {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.blobs.lock().await.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blobs.lock().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl KvCache for MemoryStores {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let cache = self.cache.lock().await;
        Ok(cache
            .get(key)
            .filter(|(_, expires)| *expires > tokio::time::Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let expires = tokio::time::Instant::now() + tokio::time::Duration::from_secs(ttl_seconds);
        self.cache
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }
}

/// Real wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn utc_now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, Severity};
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_task_lock_excludes_second_worker() {
        let stores = MemoryStores::new();

        let lease = stores.acquire_lock("t1").await.unwrap();
        assert!(lease.is_some());
        assert!(stores.acquire_lock("t1").await.unwrap().is_none());

        drop(lease);
        assert!(stores.acquire_lock("t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_finding_upsert_by_fingerprint() {
        let stores = MemoryStores::new();

        let mut finding = Finding::new("t1", "sql_injection", Severity::High, "SQLi", Location::default());
        finding.fingerprint = "abc".to_string();

        assert_eq!(
            stores.upsert_by_fingerprint(&finding).await.unwrap(),
            UpsertOutcome::Created
        );

        finding.severity = Severity::Critical;
        assert_eq!(
            stores.upsert_by_fingerprint(&finding).await.unwrap(),
            UpsertOutcome::Updated
        );

        let list = stores.list_for_task("t1").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_checkpoint_prune_keeps_recent() {
        let stores = MemoryStores::new();
        for i in 1..=5 {
            CheckpointStore::put(&stores, "t1", i, &[i as u8]).await.unwrap();
        }
        stores.prune("t1", 2).await.unwrap();

        let (latest, _) = stores.get_latest("t1").await.unwrap().unwrap();
        assert_eq!(latest, 5);
    }

    #[tokio::test]
    async fn test_event_append() {
        let stores = MemoryStores::new();
        let events = vec![
            AuditEvent::new("t1", 1, EventKind::Heartbeat),
            AuditEvent::new("t1", 2, EventKind::Heartbeat),
        ];
        stores.append_batch("t1", &events).await.unwrap();
        assert_eq!(stores.events_for("t1").await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_expiry() {
        let stores = MemoryStores::new();
        KvCache::put(&stores, "k", "v", 10).await.unwrap();
        assert_eq!(KvCache::get(&stores, "k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(tokio::time::Duration::from_secs(11)).await;
        assert!(KvCache::get(&stores, "k").await.unwrap().is_none());
    }
}
