//! Tool error types and retry classification

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// Errors that can occur during tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path {path} violates sandbox: {reason}")]
    SandboxViolation { path: PathBuf, reason: String },

    #[error("Tool is disabled: {name}")]
    Disabled { name: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tool timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("External tool failed: {message}")]
    External { message: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Cancelled")]
    Cancelled,
}

impl ToolError {
    /// Transient failures worth a backoff-retry inside the executor
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::External { .. } => true,
            ToolError::Timeout { .. } => true,
            ToolError::Llm(e) => e.is_retryable(),
            ToolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Stable kind tag surfaced in tool output bags and task errors
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::SandboxViolation { .. } => "ValidationError",
            ToolError::Disabled { .. } => "ToolError",
            ToolError::UnknownTool { .. } => "ToolError",
            ToolError::InvalidArgument(_) => "ValidationError",
            ToolError::Io(_) => "ToolError",
            ToolError::Timeout { .. } => "Timeout",
            ToolError::External { .. } => "ToolError",
            ToolError::Llm(LlmError::RateLimited { .. }) => "RateLimitError",
            ToolError::Llm(_) => "ProviderError",
            ToolError::Cancelled => "Cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(
            ToolError::External {
                message: "scanner crashed".to_string()
            }
            .is_retryable()
        );
        assert!(
            ToolError::Timeout {
                timeout: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(!ToolError::InvalidArgument("bad".to_string()).is_retryable());
        assert!(
            !ToolError::Disabled {
                name: "semgrep_scan".to_string()
            }
            .is_retryable()
        );
        assert!(!ToolError::Cancelled.is_retryable());
    }

    #[test]
    fn test_llm_errors_delegate_classification() {
        let retryable = ToolError::Llm(LlmError::Timeout(Duration::from_secs(1)));
        assert!(retryable.is_retryable());

        let permanent = ToolError::Llm(LlmError::InvalidResponse("garbage".to_string()));
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            ToolError::SandboxViolation {
                path: PathBuf::from("/etc/passwd"),
                reason: "outside root".to_string()
            }
            .kind(),
            "ValidationError"
        );
        assert_eq!(
            ToolError::Llm(LlmError::RateLimited {
                retry_after: Duration::from_secs(1)
            })
            .kind(),
            "RateLimitError"
        );
        assert_eq!(ToolError::Cancelled.kind(), "Cancelled");
    }
}
