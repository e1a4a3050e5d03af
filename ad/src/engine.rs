//! Engine: the process-wide dependency-injection root
//!
//! Constructed once at startup; nothing below it reads globals. Each
//! worker invocation picks up one task, takes its advisory lock, wires
//! a per-task event bus plus orchestrator, and drives the audit to a
//! terminal status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::domain::{Task, TaskStatus};
use crate::events::{EventBus, run_heartbeat, run_persistence};
use crate::limits::{BreakerRegistry, RateLimiter};
use crate::llm::LlmClient;
use crate::llm::pool::LlmPool;
use crate::orchestrator::{Orchestrator, OrchestratorDeps};
use crate::store::{
    BlobStore, CheckpointStore, Clock, EventStore, FindingStore, KvCache, MemoryStores, PersistentStores, StoreError,
    SystemClock, TaskStore,
};
use crate::tools::ToolExecutor;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task is locked by another worker: {0}")]
    Busy(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// The port bundle the engine runs against
#[derive(Clone)]
pub struct EngineStores {
    pub tasks: Arc<dyn TaskStore>,
    pub findings: Arc<dyn FindingStore>,
    pub events: Arc<dyn EventStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub cache: Arc<dyn KvCache>,
}

impl EngineStores {
    /// All ports backed by in-memory state (tests, dry runs)
    pub fn memory() -> (Self, MemoryStores) {
        let stores = MemoryStores::new();
        (
            Self {
                tasks: Arc::new(stores.clone()),
                findings: Arc::new(stores.clone()),
                events: Arc::new(stores.clone()),
                checkpoints: Arc::new(stores.clone()),
                blobs: Arc::new(stores.clone()),
                cache: Arc::new(stores.clone()),
            },
            stores,
        )
    }

    /// All ports backed by an auditstore directory
    pub fn persistent(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let stores = PersistentStores::open(path)?;
        Ok(Self {
            tasks: Arc::new(stores.clone()),
            findings: Arc::new(stores.clone()),
            events: Arc::new(stores.clone()),
            checkpoints: Arc::new(stores.clone()),
            blobs: Arc::new(stores.clone()),
            cache: Arc::new(stores),
        })
    }
}

pub struct Engine {
    config: Config,
    stores: EngineStores,
    llm_client: Arc<dyn LlmClient>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    clock: Arc<dyn Clock>,
    cancels: Mutex<HashMap<String, CancelToken>>,
}

impl Engine {
    pub fn new(config: Config, stores: EngineStores, llm_client: Arc<dyn LlmClient>) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(config.circuit.clone()));
        Self {
            config,
            stores,
            llm_client,
            limiter: Arc::new(RateLimiter::new()),
            breakers,
            clock: Arc::new(SystemClock),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Swap the wall-clock source (tests)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create and persist a pending task for a local project path.
    ///
    /// `project_id` doubles as the project root path for local audits.
    pub async fn create_task(
        &self,
        project_path: &str,
        overrides: serde_json::Value,
    ) -> Result<Task, EngineError> {
        let mut task = Task::new(project_path);
        task.created_at = self.clock.utc_now();
        task.config_overrides = overrides;
        self.stores.tasks.save(&task).await?;
        info!(task_id = %task.id, project = project_path, "Task created");
        Ok(task)
    }

    /// Process one task to a terminal status.
    ///
    /// Skips with `Busy` when another worker holds the advisory lock.
    pub async fn run_task(&self, task_id: &str) -> Result<Task, EngineError> {
        let task = self
            .stores
            .tasks
            .load(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(task_id.to_string()))?;

        let Some(lease) = self.stores.tasks.acquire_lock(task_id).await? else {
            debug!(task_id, "Task locked by another worker, skipping");
            return Err(EngineError::Busy(task_id.to_string()));
        };

        let snapshot = self
            .config
            .snapshot_for_task(&task.config_overrides)
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let cancel = CancelToken::new();
        self.cancels.lock().await.insert(task_id.to_string(), cancel.clone());

        let bus = EventBus::new(task_id, snapshot.event.queue_max_size);
        let batcher = tokio::spawn(run_persistence(
            bus.clone(),
            self.stores.events.clone(),
            snapshot.event.batch_size,
        ));
        let heartbeat_stop = CancelToken::new();
        let heartbeat = tokio::spawn(run_heartbeat(
            bus.clone(),
            Duration::from_secs(snapshot.event.sse_heartbeat_interval_seconds),
            heartbeat_stop.clone(),
        ));

        let pool = Arc::new(LlmPool::new(
            self.llm_client.clone(),
            snapshot.llm.clone(),
            self.limiter.clone(),
            self.stores.cache.clone(),
        ));
        let executor = Arc::new(
            ToolExecutor::standard(
                snapshot.tool.clone(),
                snapshot.resource.clone(),
                self.limiter.clone(),
                self.breakers.clone(),
            )
            .with_emitter(bus.emitter()),
        );

        let project_root = PathBuf::from(&task.project_id);
        let orchestrator = Orchestrator::new(
            snapshot,
            OrchestratorDeps {
                tasks: self.stores.tasks.clone(),
                findings: self.stores.findings.clone(),
                checkpoints: self.stores.checkpoints.clone(),
                blobs: self.stores.blobs.clone(),
            },
            pool,
            executor,
            bus.emitter(),
            cancel.clone(),
            project_root,
        );

        let mut task = orchestrator.run(task).await;

        // Surface queue pressure on the task record, then shut the
        // event pipeline down cleanly
        task.dropped_events = bus.dropped_count().await;
        if let Err(e) = self.stores.tasks.save(&task).await {
            warn!(task_id, error = %e, "Failed to persist final task state");
        }

        bus.close().await;
        heartbeat_stop.cancel();
        if let Err(e) = batcher.await {
            warn!(task_id, error = %e, "Event batcher panicked");
        }
        let _ = heartbeat.await;

        self.cancels.lock().await.remove(task_id);
        drop(lease);

        Ok(task)
    }

    /// Trip a running task's cancellation token
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        match self.cancels.lock().await.get(task_id) {
            Some(cancel) => {
                info!(task_id, "Cancellation requested");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Worker sweep: process every pending task once, skipping locked
    /// ones. Returns how many tasks reached a terminal status.
    pub async fn run_pending(&self) -> Result<usize, EngineError> {
        let pending = self.stores.tasks.list_by_status(TaskStatus::Pending).await?;
        let mut completed = 0usize;

        for task in pending {
            match self.run_task(&task.id).await {
                Ok(done) if done.status.is_terminal() => completed += 1,
                Ok(_) => {}
                Err(EngineError::Busy(_)) => continue,
                Err(e) => warn!(task_id = %task.id, error = %e, "Task processing failed"),
            }
        }

        Ok(completed)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
