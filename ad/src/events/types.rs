//! Event types: the wire contract consumers depend on

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{SeverityCounts, generate_id};

/// Kind-specific payload. Serialized with a `kind` tag in kebab-case,
/// matching the external contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventKind {
    /// Orchestrator begins a task
    TaskStart { config_digest: String },
    /// A phase was entered
    PhaseStart { phase: String },
    /// A phase exited
    PhaseComplete {
        phase: String,
        outcome: String,
        duration_ms: u64,
    },
    /// The LLM returned one step of agent reasoning
    AgentStep {
        phase: String,
        message: String,
        tokens: u64,
    },
    /// A tool invocation finished
    ToolCall {
        name: String,
        input: serde_json::Value,
        output: serde_json::Value,
        duration_ms: u64,
        outcome: String,
        #[serde(default)]
        truncated: bool,
    },
    /// A finding was committed
    FindingNew {
        finding_id: String,
        title: String,
        severity: String,
    },
    /// Verification changed a finding's status
    FindingUpdated { finding_id: String, status: String },
    /// A checkpoint was written
    Checkpoint { index: u64 },
    /// Idle keepalive
    Heartbeat,
    /// Terminal success
    TaskComplete {
        finding_counts: SeverityCounts,
        overall_score: u8,
        duration_ms: u64,
    },
    /// Terminal failure
    TaskError { error_kind: String, message: String },
    /// Queue overflow marker
    EventsDropped { count: u64 },
}

impl EventKind {
    pub fn kind_str(&self) -> &'static str {
        match self {
            EventKind::TaskStart { .. } => "task-start",
            EventKind::PhaseStart { .. } => "phase-start",
            EventKind::PhaseComplete { .. } => "phase-complete",
            EventKind::AgentStep { .. } => "agent-step",
            EventKind::ToolCall { .. } => "tool-call",
            EventKind::FindingNew { .. } => "finding-new",
            EventKind::FindingUpdated { .. } => "finding-updated",
            EventKind::Checkpoint { .. } => "checkpoint",
            EventKind::Heartbeat => "heartbeat",
            EventKind::TaskComplete { .. } => "task-complete",
            EventKind::TaskError { .. } => "task-error",
            EventKind::EventsDropped { .. } => "events-dropped",
        }
    }

    /// Critical events use the reserved slot and are never dropped
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            EventKind::PhaseComplete { .. } | EventKind::TaskComplete { .. } | EventKind::TaskError { .. }
        )
    }
}

/// One domain-progress record. Sequence numbers are per-task and
/// strictly increasing; events are append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub task_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(task_id: impl Into<String>, sequence: u64, kind: EventKind) -> Self {
        Self {
            id: generate_id("event", kind.kind_str()),
            task_id: task_id.into(),
            sequence,
            timestamp: Utc::now(),
            kind,
            metadata: serde_json::Value::Null,
        }
    }
}
