//! LLM client pool: bounded concurrency, rate limiting, retries,
//! response caching, and cost accounting around a provider client

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::LlmConfig;
use crate::limits::{RateLimitError, RateLimiter};
use crate::store::KvCache;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StreamChunk};

/// Global bucket key shared by every provider
const GLOBAL_LLM_KEY: &str = "llm";

/// A completion plus its accounting
#[derive(Debug, Clone)]
pub struct PooledResponse {
    pub response: CompletionResponse,
    pub cost_usd: f64,
    pub cached: bool,
}

/// Per-provider pool. Cheap to clone via Arc; shared across agents.
pub struct LlmPool {
    client: Arc<dyn LlmClient>,
    config: LlmConfig,
    semaphore: Arc<Semaphore>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn KvCache>,
}

impl LlmPool {
    pub fn new(
        client: Arc<dyn LlmClient>,
        config: LlmConfig,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn KvCache>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            client,
            config,
            semaphore,
            limiter,
            cache,
        }
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn count_tokens(&self, text: &str) -> u64 {
        self.client.count_tokens(text)
    }

    /// Non-streaming completion with memoization.
    ///
    /// Identical canonicalized requests within the cache TTL return the
    /// stored response without touching the provider.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<PooledResponse, LlmError> {
        let cache_key = self.cache_key(&request);

        if let Ok(Some(cached)) = self.cache.get(&cache_key).await
            && let Ok(response) = serde_json::from_str::<CompletionResponse>(&cached)
        {
            debug!(provider = %self.provider(), "LLM cache hit");
            return Ok(PooledResponse {
                cost_usd: 0.0,
                cached: true,
                response,
            });
        }

        let response = self.call_with_retries(&request, deadline, cancel).await?;

        if let Ok(serialized) = serde_json::to_string(&response) {
            if let Err(e) = self.cache.put(&cache_key, &serialized, self.config.cache_ttl_seconds).await {
                debug!(error = %e, "LLM cache write failed");
            }
        }

        let cost_usd = response.usage.cost_usd(self.model());
        Ok(PooledResponse {
            response,
            cost_usd,
            cached: false,
        })
    }

    /// Streaming completion. Always bypasses the cache; restartable
    /// only from scratch.
    pub async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<PooledResponse, LlmError> {
        self.acquire_rate(deadline, cancel).await?;
        let _permit = self.acquire_slot(cancel).await?;

        let remaining = remaining_budget(deadline, self.config.timeout())?;
        let response = tokio::select! {
            result = timeout(remaining, self.client.stream(request, chunk_tx)) => {
                result.map_err(|_| LlmError::Timeout(remaining))??
            }
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        };

        let cost_usd = response.usage.cost_usd(self.model());
        Ok(PooledResponse {
            response,
            cost_usd,
            cached: false,
        })
    }

    async fn call_with_retries(
        &self,
        request: &CompletionRequest,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse, LlmError> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            self.acquire_rate(deadline, cancel).await?;
            let permit = self.acquire_slot(cancel).await?;

            let remaining = remaining_budget(deadline, self.config.timeout())?;
            let outcome = tokio::select! {
                result = timeout(remaining, self.client.complete(request.clone())) => {
                    result.map_err(|_| LlmError::Timeout(remaining)).and_then(|r| r)
                }
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
            };
            drop(permit);

            let error = match outcome {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= self.config.max_retries {
                return Err(error);
            }

            let delay = match error.retry_after() {
                Some(after) => after,
                None => backoff_delay(
                    attempt,
                    Duration::from_millis(self.config.retry_base_delay_ms),
                    Duration::from_millis(self.config.retry_max_delay_ms),
                ),
            };

            if Instant::now() + delay > deadline {
                return Err(LlmError::Timeout(delay));
            }

            warn!(
                provider = %self.provider(),
                attempt,
                ?delay,
                error = %error,
                "LLM call failed, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            }
            attempt += 1;
        }
    }

    async fn acquire_rate(&self, deadline: Instant, cancel: &CancelToken) -> Result<(), LlmError> {
        let rate = f64::from(self.config.rate_per_minute) / 60.0;
        let burst = (self.config.rate_per_minute / 60).max(1);

        for key in [GLOBAL_LLM_KEY.to_string(), format!("llm:{}", self.provider())] {
            self.limiter
                .acquire(&key, rate, burst, deadline, cancel)
                .await
                .map_err(|e| match e {
                    RateLimitError::DeadlineExceeded { .. } => LlmError::Timeout(Duration::ZERO),
                    RateLimitError::Cancelled { .. } => LlmError::Cancelled,
                })?;
        }
        Ok(())
    }

    async fn acquire_slot(&self, cancel: &CancelToken) -> Result<tokio::sync::OwnedSemaphorePermit, LlmError> {
        tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| LlmError::InvalidResponse("pool closed".to_string()))
            }
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
        }
    }

    /// Memoization key over the canonicalized request. Temperature and
    /// sampling parameters are part of the key, so intentional
    /// non-determinism never collides with deterministic calls.
    fn cache_key(&self, request: &CompletionRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.model().as_bytes());
        hasher.update(b"\0");
        hasher.update(canonicalize(&request.system_prompt).as_bytes());
        hasher.update(b"\0");
        for message in &request.messages {
            if let Ok(json) = serde_json::to_string(message) {
                hasher.update(json.as_bytes());
                hasher.update(b"\0");
            }
        }
        hasher.update(format!("{:?}|{}|{:?}", request.temperature, request.max_tokens, request.top_p).as_bytes());
        format!("llm:{}", hex::encode(hasher.finalize()))
    }
}

/// Whitespace-normalize prompt text before hashing
fn canonicalize(text: &str) -> String {
    text.lines().map(str::trim_end).collect::<Vec<_>>().join("\n").trim().to_string()
}

fn remaining_budget(deadline: Instant, call_timeout: Duration) -> Result<Duration, LlmError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(LlmError::Timeout(Duration::ZERO));
    }
    Ok(remaining.min(call_timeout))
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    use rand::Rng;
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let capped = exp.min(max);
    let jitter = Duration::from_millis(rand::rng().random_range(0..250));
    (capped + jitter).min(max)
}
