//! Checkpoint trigger policy, writes, pruning, and recovery

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CheckpointConfig;
use crate::domain::AuditState;
use crate::store::CheckpointStore;

use super::codec::{CheckpointError, decode_state, encode_state};

/// What prompted a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTrigger {
    Iteration,
    PhaseBoundary,
    ToolComplete,
    Manual,
}

/// Per-task checkpoint manager. Owns the monotonic index; the task
/// advisory lock guarantees a single writer.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    config: CheckpointConfig,
    task_id: String,
    next_index: u64,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, config: CheckpointConfig, task_id: impl Into<String>) -> Self {
        Self {
            store,
            config,
            task_id: task_id.into(),
            next_index: 1,
        }
    }

    /// Continue the index sequence after restoring checkpoint `index`
    pub fn resume_after(&mut self, index: u64) {
        self.next_index = index + 1;
    }

    /// Whether policy calls for a checkpoint at this trigger
    pub fn should_checkpoint(&self, trigger: CheckpointTrigger, iteration: u32) -> bool {
        if !self.config.enabled {
            return false;
        }
        match trigger {
            CheckpointTrigger::Iteration => {
                self.config.interval_iterations > 0 && iteration > 0 && iteration % self.config.interval_iterations == 0
            }
            CheckpointTrigger::PhaseBoundary => self.config.on_phase_complete,
            CheckpointTrigger::ToolComplete => self.config.on_tool_complete,
            CheckpointTrigger::Manual => true,
        }
    }

    /// Write a checkpoint. Best-effort: failures are logged and the
    /// audit continues without one.
    pub async fn write(&mut self, state: &AuditState) -> Option<u64> {
        if !self.config.enabled {
            return None;
        }

        let blob = match encode_state(state) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "Failed to encode checkpoint");
                return None;
            }
        };

        let index = self.next_index;
        if let Err(e) = self.store.put(&self.task_id, index, &blob).await {
            warn!(task_id = %self.task_id, index, error = %e, "Failed to write checkpoint");
            return None;
        }
        self.next_index += 1;

        if let Err(e) = self.store.prune(&self.task_id, self.config.max_per_task).await {
            debug!(task_id = %self.task_id, error = %e, "Checkpoint prune failed");
        }

        info!(task_id = %self.task_id, index, "Checkpoint written");
        Some(index)
    }

    /// Load the highest-indexed checkpoint for a task.
    ///
    /// Returns `Ok(None)` when there is nothing to restore. A decode
    /// failure is an error: the caller logs it, discards the
    /// checkpoint, and restarts from scratch.
    pub async fn restore(
        store: &Arc<dyn CheckpointStore>,
        task_id: &str,
    ) -> Result<Option<(u64, AuditState)>, CheckpointError> {
        let latest = store
            .get_latest(task_id)
            .await
            .map_err(|e| CheckpointError::Store(e.to_string()))?;

        let Some((index, blob)) = latest else {
            return Ok(None);
        };

        let state = decode_state(&blob)?;
        info!(task_id, index, phase = state.phase.as_str(), "Restored checkpoint");
        Ok(Some((index, state)))
    }
}
