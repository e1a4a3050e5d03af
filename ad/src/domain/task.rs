//! Task records: the unit of work picked up by a worker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::finding::Severity;
use super::id::generate_id;

/// Task lifecycle status.
///
/// Transitions are total: pending→running→{succeeded, failed, cancelled};
/// running↔paused. Terminal statuses are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Whether a transition from `self` to `to` is legal
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        match (self, to) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Running, TaskStatus::Succeeded)
            | (TaskStatus::Running, TaskStatus::Failed)
            | (TaskStatus::Running, TaskStatus::Cancelled)
            | (TaskStatus::Running, TaskStatus::Paused) => true,
            (TaskStatus::Paused, TaskStatus::Running) => true,
            (TaskStatus::Paused, TaskStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// Cumulative token usage on a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenTotals {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Finding counts by severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

/// The unit of work: one audit over one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    /// Per-task config overrides merged into the snapshot at pickup
    #[serde(default)]
    pub config_overrides: serde_json::Value,
    #[serde(default)]
    pub total_files: u32,
    #[serde(default)]
    pub indexed_files: u32,
    #[serde(default)]
    pub analyzed_files: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub token_usage: TokenTotals,
    #[serde(default)]
    pub finding_counts: SeverityCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_score: Option<u8>,
    /// Events dropped under queue pressure, surfaced for observability
    #[serde(default)]
    pub dropped_events: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        Self {
            id: generate_id("task", &project_id),
            project_id,
            config_overrides: serde_json::Value::Null,
            total_files: 0,
            indexed_files: 0,
            analyzed_files: 0,
            current_phase: None,
            current_step: None,
            token_usage: TokenTotals::default(),
            finding_counts: SeverityCounts::default(),
            overall_score: None,
            security_score: None,
            dropped_events: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: TaskStatus::Pending,
        }
    }

    /// Apply a status transition, rejecting illegal ones
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition(to) {
            return Err(format!("Illegal task transition: {} -> {}", self.status.as_str(), to.as_str()));
        }
        match to {
            TaskStatus::Running if self.started_at.is_none() => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new("proj-1");
        assert_eq!(task.status, TaskStatus::Pending);

        task.transition(TaskStatus::Running).unwrap();
        assert!(task.started_at.is_some());

        task.transition(TaskStatus::Succeeded).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.status.is_terminal());
    }

    #[test]
    fn test_pause_resume() {
        let mut task = Task::new("proj-1");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Paused).unwrap();
        task.transition(TaskStatus::Running).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn test_terminal_is_absorbing() {
        let mut task = Task::new("proj-1");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Failed).unwrap();

        assert!(task.transition(TaskStatus::Running).is_err());
        assert!(task.transition(TaskStatus::Succeeded).is_err());
    }

    #[test]
    fn test_pending_cannot_skip_to_terminal() {
        let mut task = Task::new("proj-1");
        assert!(task.transition(TaskStatus::Succeeded).is_err());
        assert!(task.transition(TaskStatus::Paused).is_err());
    }

    #[test]
    fn test_severity_counts() {
        let mut counts = SeverityCounts::default();
        counts.record(Severity::High);
        counts.record(Severity::High);
        counts.record(Severity::Info);

        assert_eq!(counts.high, 2);
        assert_eq!(counts.info, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_task_serialization() {
        let task = Task::new("proj-1");
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"status\":\"pending\""));

        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, task.id);
    }
}
