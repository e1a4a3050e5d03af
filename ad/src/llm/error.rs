//! LLM error taxonomy and retry classification

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Provider '{provider}' error {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Remote 429 and 5xx plus transport faults are retryable; other
    /// 4xx and malformed responses are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::Provider { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
            LlmError::Cancelled => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        let err = LlmError::RateLimited {
            retry_after: Duration::from_secs(60),
        };
        assert!(err.is_rate_limit());
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_provider_status_classification() {
        let server = LlmError::Provider {
            provider: "anthropic".to_string(),
            status: 503,
            message: "overloaded".to_string(),
        };
        assert!(server.is_retryable());

        let client = LlmError::Provider {
            provider: "anthropic".to_string(),
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(!client.is_retryable());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!LlmError::InvalidResponse("garbage".to_string()).is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
        assert!(LlmError::Timeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn test_error_message_preserves_provider() {
        let err = LlmError::Provider {
            provider: "anthropic".to_string(),
            status: 500,
            message: "boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("anthropic"));
        assert!(msg.contains("500"));
    }
}
