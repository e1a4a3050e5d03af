//! Failure-isolation circuit breakers, one per resource key

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitConfig;

/// Breaker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; consecutive failures are counted
    Closed,
    /// Failing fast; calls are rejected until the recovery timeout
    Open,
    /// Probing recovery with a bounded number of concurrent calls
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// One breaker around one resource.
///
/// Callers must pair every admitted call with exactly one
/// `record_success` or `record_failure`.
pub struct CircuitBreaker {
    key: String,
    config: CircuitConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        }
    }

    /// Ask to pass one call through. Open circuits admit nothing until
    /// the recovery timeout, then up to `half_open_max_calls` probes run
    /// concurrently.
    pub async fn try_admit(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed_enough = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.recovery_timeout())
                    .unwrap_or(true);
                if elapsed_enough {
                    info!(key = %self.key, "circuit breaker transitioning Open -> HalfOpen");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                info!(key = %self.key, "circuit breaker transitioning HalfOpen -> Closed");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.half_open_in_flight = 0;
                inner.opened_at = None;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        key = %self.key,
                        failures = inner.consecutive_failures,
                        "circuit breaker transitioning Closed -> Open"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(key = %self.key, "circuit breaker transitioning HalfOpen -> Open (probe failed)");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_in_flight = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Shared registry: one breaker per resource key, created lazily
pub struct BreakerRegistry {
    config: CircuitConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn breaker_for(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn config(threshold: u32, recovery_secs: f64, half_open: u32) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: threshold,
            recovery_timeout_seconds: recovery_secs,
            half_open_max_calls: half_open,
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("semgrep_scan", config(3, 30.0, 2));

        for _ in 0..2 {
            assert!(breaker.try_admit().await);
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);

        assert!(breaker.try_admit().await);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.try_admit().await);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new("k", config(3, 30.0, 2));

        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;

        // Streak never reached 3 consecutively
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_timeout() {
        let breaker = CircuitBreaker::new("k", config(1, 5.0, 2));

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.try_admit().await);

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(breaker.try_admit().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admission_is_bounded() {
        let breaker = CircuitBreaker::new("k", config(1, 1.0, 2));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(breaker.try_admit().await); // probe 1 (transition)
        assert!(breaker.try_admit().await); // probe 2
        assert!(!breaker.try_admit().await); // over the cap
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new("k", config(1, 1.0, 3));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(breaker.try_admit().await);
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("k", config(1, 1.0, 3));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(breaker.try_admit().await);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.try_admit().await);
    }

    #[tokio::test]
    async fn test_registry_returns_same_instance() {
        let registry = BreakerRegistry::new(config(5, 30.0, 3));

        let a = registry.breaker_for("semgrep_scan").await;
        let b = registry.breaker_for("semgrep_scan").await;
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.breaker_for("bandit_scan").await;
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
