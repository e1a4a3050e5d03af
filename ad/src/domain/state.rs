//! AuditState: the orchestrator's in-memory state, and the diffs
//! sub-agents return against it

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::finding::{Finding, VerificationStatus};

/// A node in the fixed phase graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Init,
    Recon,
    Analysis,
    Verification,
    Report,
    Done,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Recon => "recon",
            Phase::Analysis => "analysis",
            Phase::Verification => "verification",
            Phase::Report => "report",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

/// A recognized application entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub path: String,
    /// e.g. "http-handler", "cli", "main", "worker"
    pub kind: String,
}

/// Map a file path to its language tag for tech-stack recognition
pub fn language_for_path(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "c" | "cc" | "cpp" | "h" | "hh" | "hpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "kt" => "kotlin",
        "swift" => "swift",
        _ => "text",
    }
}

/// The orchestrator's working state for one task.
///
/// Owned exclusively by one orchestrator instance; sub-agents never
/// mutate it directly — they return a [`StateDiff`] the orchestrator
/// applies between phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditState {
    pub project_root: PathBuf,
    /// language → fraction of indexed files
    pub tech_stack: BTreeMap<String, f64>,
    pub entry_points: Vec<EntryPoint>,
    pub high_risk_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_summary: Option<String>,
    pub open_findings: Vec<Finding>,
    pub verified_findings: Vec<Finding>,
    pub false_positives: Vec<Finding>,
    pub phase: Phase,
    pub iteration: u32,
    pub max_iterations: u32,
    pub continue_analysis: bool,
    /// Bounded trail of recent agent messages (oldest evicted)
    pub recent_messages: VecDeque<String>,
    /// Highest event sequence number observed when last checkpointed
    pub event_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl AuditState {
    pub fn new(project_root: PathBuf, max_iterations: u32) -> Self {
        Self {
            project_root,
            tech_stack: BTreeMap::new(),
            entry_points: Vec::new(),
            high_risk_paths: Vec::new(),
            dependency_summary: None,
            open_findings: Vec::new(),
            verified_findings: Vec::new(),
            false_positives: Vec::new(),
            phase: Phase::Init,
            iteration: 0,
            max_iterations,
            continue_analysis: false,
            recent_messages: VecDeque::new(),
            event_seq: 0,
            summary: None,
            security_score: None,
            last_error: None,
        }
    }

    /// Total findings across all partitions
    pub fn finding_count(&self) -> usize {
        self.open_findings.len() + self.verified_findings.len() + self.false_positives.len()
    }

    /// Append a message, evicting the oldest beyond `cap`
    pub fn push_message(&mut self, message: impl Into<String>, cap: usize) {
        while self.recent_messages.len() >= cap.max(1) {
            self.recent_messages.pop_front();
        }
        self.recent_messages.push_back(message.into());
    }

    /// Move verified/rejected findings out of the open partition based
    /// on their verification status
    pub fn repartition_findings(&mut self) {
        let open = std::mem::take(&mut self.open_findings);
        for finding in open {
            match finding.verification_status {
                VerificationStatus::Confirmed => self.verified_findings.push(finding),
                VerificationStatus::Rejected => self.false_positives.push(finding),
                _ => self.open_findings.push(finding),
            }
        }
    }
}

/// What a sub-agent hands back to the orchestrator.
///
/// Every field is additive; `None`/empty means "no change".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDiff {
    #[serde(default)]
    pub tech_stack: BTreeMap<String, f64>,
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
    #[serde(default)]
    pub high_risk_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_summary: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// fingerprint → verdict, produced by the verification agent
    #[serde(default)]
    pub verdicts: Vec<(String, VerificationStatus)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_analysis: Option<bool>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.tech_stack.is_empty()
            && self.entry_points.is_empty()
            && self.high_risk_paths.is_empty()
            && self.dependency_summary.is_none()
            && self.findings.is_empty()
            && self.verdicts.is_empty()
            && self.continue_analysis.is_none()
            && self.messages.is_empty()
            && self.summary.is_none()
    }
}
