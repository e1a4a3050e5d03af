//! Finding records: the unit of audit output

use serde::{Deserialize, Serialize};

use super::id::generate_id;

/// Severity of a finding.
///
/// Variants are declared in ascending order so `Ord` agrees with the
/// aggregation weight: critical(4) > high(3) > medium(2) > low(1) > info(0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric weight used for ordering and score deductions
    pub fn weight(&self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
            Severity::Info => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Parse a severity tag, tolerating scanner-style uppercase labels
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" | "error" => Some(Severity::High),
            "medium" | "warning" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" | "note" => Some(Severity::Info),
            _ => None,
        }
    }
}

/// Verification status of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    New,
    Confirmed,
    Rejected,
    NeedsReview,
}

impl VerificationStatus {
    /// Merge precedence: confirmed > needs-review > new > rejected
    pub fn precedence(&self) -> u8 {
        match self {
            VerificationStatus::Confirmed => 3,
            VerificationStatus::NeedsReview => 2,
            VerificationStatus::New => 1,
            VerificationStatus::Rejected => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::New => "new",
            VerificationStatus::Confirmed => "confirmed",
            VerificationStatus::Rejected => "rejected",
            VerificationStatus::NeedsReview => "needs-review",
        }
    }
}

/// Source location of a finding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

/// Dataflow evidence: where tainted data enters and where it lands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataflowTrace {
    pub source: String,
    pub sink: String,
    #[serde(default)]
    pub path: Vec<String>,
}

/// A reported potential vulnerability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub task_id: String,
    pub vuln_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location: Location,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataflow: Option<DataflowTrace>,
    pub verification_status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_vector: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Stable content hash used as the deduplication key (see findings::fingerprint)
    #[serde(default)]
    pub fingerprint: String,
}

impl Finding {
    /// Create a new finding with a fresh id and `New` verification status.
    /// The fingerprint is assigned when the finding enters a `FindingSet`.
    pub fn new(task_id: impl Into<String>, vuln_type: impl Into<String>, severity: Severity, title: impl Into<String>, location: Location) -> Self {
        let title = title.into();
        Self {
            id: generate_id("finding", &title),
            task_id: task_id.into(),
            vuln_type: vuln_type.into(),
            severity,
            title,
            description: String::new(),
            location,
            snippet: String::new(),
            dataflow: None,
            verification_status: VerificationStatus::New,
            poc: None,
            fix_suggestion: None,
            explanation: None,
            cvss_score: None,
            cvss_vector: None,
            tags: Vec::new(),
            fingerprint: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_dataflow(mut self, dataflow: DataflowTrace) -> Self {
        self.dataflow = Some(dataflow);
        self
    }
}
