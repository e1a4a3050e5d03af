//! Resource governance: token-bucket rate limiting and circuit breaking
//!
//! Both structures are shared across all tasks and keyed by resource
//! name (tool name for scanners, provider name for LLMs, plus a global
//! `llm` key). Ordering contract: the rate limiter is consulted before
//! the breaker, and an open breaker never consumes tokens.

mod breaker;
mod rate;

pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use rate::{RateLimitError, RateLimiter};
