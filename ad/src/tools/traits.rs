//! Tool trait and result types

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::ToolContext;
use super::error::ToolError;

/// A capability the agent loop can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the LLM tool_use name and the config key)
    fn name(&self) -> &'static str;

    /// Human-readable description shown to the model
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// External tools wrap subprocesses or network calls and get the
    /// default scanner rate limit
    fn external(&self) -> bool {
        false
    }

    /// Run the tool. The returned value is the tool-specific `data`
    /// payload; the executor wraps it in the status envelope.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Outcome classification on the tool call record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolOutcome {
    Ok,
    RateLimited,
    Timeout,
    ToolError,
    CircuitOpen,
}

impl ToolOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolOutcome::Ok => "ok",
            ToolOutcome::RateLimited => "rate-limited",
            ToolOutcome::Timeout => "timeout",
            ToolOutcome::ToolError => "tool-error",
            ToolOutcome::CircuitOpen => "circuit-open",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutcome::Ok)
    }
}

/// Result of one tool invocation through the executor.
///
/// `output` always carries the envelope
/// `{"status": "ok"|"error", "data"|"error_kind"+"error_message", ...}`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub outcome: ToolOutcome,
    pub output: Value,
    pub duration: Duration,
    pub truncated: bool,
    pub attempts: u32,
    pub fallback_used: Option<String>,
    pub tokens_charged: u64,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        !self.outcome.is_ok()
    }

    /// The tool-specific payload when the call succeeded
    pub fn data(&self) -> Option<&Value> {
        self.output.get("data")
    }

    /// Serialized form appended to the agent conversation
    pub fn content_for_llm(&self) -> String {
        serde_json::to_string(&self.output).unwrap_or_else(|_| "{\"status\":\"error\"}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings() {
        assert_eq!(ToolOutcome::Ok.as_str(), "ok");
        assert_eq!(ToolOutcome::CircuitOpen.as_str(), "circuit-open");
        assert_eq!(ToolOutcome::RateLimited.as_str(), "rate-limited");
    }

    #[test]
    fn test_result_accessors() {
        let result = ToolResult {
            outcome: ToolOutcome::Ok,
            output: serde_json::json!({"status": "ok", "data": {"files": ["a.py"]}}),
            duration: Duration::from_millis(3),
            truncated: false,
            attempts: 1,
            fallback_used: None,
            tokens_charged: 0,
        };

        assert!(!result.is_error());
        assert_eq!(result.data().unwrap()["files"][0], "a.py");
        assert!(result.content_for_llm().contains("\"status\":\"ok\""));
    }
}
