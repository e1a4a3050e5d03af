//! Per-key token buckets with deadline-bounded acquisition

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::debug;

use crate::cancel::CancelToken;

/// Why an acquire did not hand out a token
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Deadline exceeded waiting for rate limiter key '{key}'")]
    DeadlineExceeded { key: String },

    #[error("Cancelled while waiting for rate limiter key '{key}'")]
    Cancelled { key: String },
}

/// One token bucket: capacity = burst, refill = rate per second
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_sec: f64, burst: u32) -> Self {
        let capacity = f64::from(burst).max(1.0);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: rate_per_sec.max(f64::MIN_POSITIVE),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Registry of token buckets, shared across all tasks
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire one token for `key`, parking until refill, deadline, or
    /// cancellation — whichever comes first. The bucket is created on
    /// first use with the supplied rate and burst.
    pub async fn acquire(
        &self,
        key: &str,
        rate_per_sec: f64,
        burst: u32,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<(), RateLimitError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled { key: key.to_string() });
            }

            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(key.to_string())
                    .or_insert_with(|| TokenBucket::new(rate_per_sec, burst));
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            let wake_at = Instant::now() + wait;
            if wake_at > deadline {
                debug!(key, ?wait, "Rate limiter wait would exceed deadline");
                return Err(RateLimitError::DeadlineExceeded { key: key.to_string() });
            }

            tokio::select! {
                _ = sleep_until(wake_at) => {}
                _ = cancel.cancelled() => {
                    return Err(RateLimitError::Cancelled { key: key.to_string() });
                }
            }
        }
    }

    /// Non-blocking probe used by tests and telemetry
    pub async fn try_acquire(&self, key: &str, rate_per_sec: f64, burst: u32) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(rate_per_sec, burst));
        bucket.try_take(Instant::now()).is_ok()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3_600)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_park() {
        let limiter = RateLimiter::new();
        let cancel = CancelToken::new();

        // Burst of 2 goes through immediately
        assert!(limiter.try_acquire("k", 1.0, 2).await);
        assert!(limiter.try_acquire("k", 1.0, 2).await);
        assert!(!limiter.try_acquire("k", 1.0, 2).await);

        // Third token arrives after ~1s of refill
        let start = Instant::now();
        limiter.acquire("k", 1.0, 2, far_deadline(), &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let limiter = RateLimiter::new();
        let cancel = CancelToken::new();

        // Drain the single burst token
        limiter.acquire("k", 0.1, 1, far_deadline(), &cancel).await.unwrap();

        // Next token needs ~10s; a 1s deadline must fail fast
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = limiter.acquire("k", 0.1, 1, deadline, &cancel).await.unwrap_err();
        assert!(matches!(err, RateLimitError::DeadlineExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_parked() {
        let limiter = std::sync::Arc::new(RateLimiter::new());
        let cancel = CancelToken::new();

        limiter.acquire("k", 0.5, 1, far_deadline(), &cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire("k", 0.5, 1, far_deadline(), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, RateLimitError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_rate_bounded_by_window() {
        // Fairness: over window W at rate r with burst b, issued ≤ r·W + b
        let limiter = RateLimiter::new();
        let cancel = CancelToken::new();

        let window = Duration::from_secs(5);
        let end = Instant::now() + window;
        let mut issued = 0u32;
        while Instant::now() < end {
            match limiter.acquire("k", 2.0, 3, end, &cancel).await {
                Ok(()) => issued += 1,
                Err(_) => break,
            }
        }

        // r·W + b = 2*5 + 3 = 13
        assert!(issued <= 13, "issued {} tokens, expected ≤ 13", issued);
        assert!(issued >= 10, "issued {} tokens, expected ≥ 10", issued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new();

        assert!(limiter.try_acquire("a", 1.0, 1).await);
        assert!(!limiter.try_acquire("a", 1.0, 1).await);
        // Different key, fresh bucket
        assert!(limiter.try_acquire("b", 1.0, 1).await);
    }
}
