//! ToolExecutor: registry plus the uniform execution pipeline
//!
//! Pipeline per call: disabled check → deadline resolution → rate
//! limiter → circuit breaker (with one-hop fallback) → invocation with
//! timeout and cancellation grace → retry classification → output
//! truncation → tool-call event.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, warn};

use crate::cancel::CANCEL_GRACE;
use crate::config::{ResourceConfig, ToolConfig};
use crate::events::EventEmitter;
use crate::limits::{BreakerRegistry, RateLimitError, RateLimiter};
use crate::llm::ToolDefinition;

use super::builtin::standard_tools;
use super::context::ToolContext;
use super::error::ToolError;
use super::traits::{Tool, ToolOutcome, ToolResult};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Manages tool execution for agents
pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    tool_cfg: ToolConfig,
    resource: ResourceConfig,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    emitter: Option<EventEmitter>,
}

impl ToolExecutor {
    /// Create an executor with an empty registry
    pub fn new(
        tool_cfg: ToolConfig,
        resource: ResourceConfig,
        limiter: Arc<RateLimiter>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            tools: HashMap::new(),
            tool_cfg,
            resource,
            limiter,
            breakers,
            emitter: None,
        }
    }

    /// Create an executor with the standard tool set registered
    pub fn standard(
        tool_cfg: ToolConfig,
        resource: ResourceConfig,
        limiter: Arc<RateLimiter>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        let mut executor = Self::new(tool_cfg, resource, limiter, breakers);
        for tool in standard_tools() {
            executor.add_tool(tool);
        }
        executor
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for a subset of tools, in the given order
    pub fn definitions_for(&self, tool_names: &[String]) -> Vec<ToolDefinition> {
        tool_names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect()
    }

    /// Single entry point: run a tool with the full governance pipeline
    pub async fn run_tool(&self, name: &str, input: Value, ctx: &ToolContext) -> ToolResult {
        let result = self.attempt(name, input.clone(), ctx).await;

        // Circuit open: dispatch to the configured fallback, one hop only
        if result.outcome == ToolOutcome::CircuitOpen {
            let external = self.tools.get(name).map(|t| t.external()).unwrap_or(false);
            if let Some(fallback) = self.tool_cfg.settings_for(name, external).fallback_tool
                && self.tools.contains_key(&fallback)
            {
                debug!(tool = name, fallback = %fallback, "Circuit open, dispatching fallback");
                let mut fb_result = self.attempt(&fallback, input, ctx).await;
                fb_result.fallback_used = Some(fallback);
                return fb_result;
            }
        }

        result
    }

    /// One governed invocation of one tool (no fallback handling)
    async fn attempt(&self, name: &str, input: Value, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();

        let Some(tool) = self.tools.get(name) else {
            let result = self.error_result(ToolError::UnknownTool { name: name.to_string() }, started, 0);
            self.emit(name, &input, &result).await;
            return result;
        };

        let settings = self.tool_cfg.settings_for(name, tool.external());

        // Disabled tools are a pure error: no limiter, breaker, or event traffic
        if !settings.enabled {
            return self.error_result(ToolError::Disabled { name: name.to_string() }, started, 0);
        }

        let deadline = ctx.deadline.min(Instant::now() + settings.timeout);

        // Rate limiter runs before the breaker so an open breaker never
        // consumes tokens
        if let Some((rate, burst)) = settings.rate {
            match self.limiter.acquire(name, rate, burst, deadline, &ctx.cancel).await {
                Ok(()) => {}
                Err(RateLimitError::DeadlineExceeded { .. }) => {
                    let result = ToolResult {
                        outcome: ToolOutcome::RateLimited,
                        output: json!({
                            "status": "error",
                            "error_kind": "RateLimitError",
                            "error_message": format!("Rate limit wait exceeded deadline for '{}'", name),
                        }),
                        duration: started.elapsed().into(),
                        truncated: false,
                        attempts: 0,
                        fallback_used: None,
                        tokens_charged: 0,
                    };
                    self.emit(name, &input, &result).await;
                    return result;
                }
                Err(RateLimitError::Cancelled { .. }) => {
                    let result = self.error_result(ToolError::Cancelled, started, 0);
                    self.emit(name, &input, &result).await;
                    return result;
                }
            }
        }

        let breaker = self.breakers.breaker_for(name).await;
        if !breaker.try_admit().await {
            let result = ToolResult {
                outcome: ToolOutcome::CircuitOpen,
                output: json!({
                    "status": "error",
                    "error_kind": "CircuitBreakerOpen",
                    "error_message": format!("Circuit open for '{}'", name),
                }),
                duration: started.elapsed().into(),
                truncated: false,
                attempts: 0,
                fallback_used: None,
                tokens_charged: 0,
            };
            self.emit(name, &input, &result).await;
            return result;
        }

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let error = if remaining.is_zero() {
                ToolError::Timeout { timeout: settings.timeout }
            } else {
                match self.invoke(tool.as_ref(), input.clone(), ctx, remaining).await {
                    Ok(data) => {
                        breaker.record_success().await;
                        let result = self.ok_result(data, started, attempts);
                        self.emit(name, &input, &result).await;
                        return result;
                    }
                    Err(e) => e,
                }
            };

            breaker.record_failure().await;

            let retryable = error.is_retryable() && !matches!(error, ToolError::Cancelled);
            if retryable && attempts <= settings.max_retries {
                let delay = retry_delay(attempts);
                if Instant::now() + delay < deadline {
                    warn!(tool = name, attempts, ?delay, error = %error, "Tool failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = ctx.cancel.cancelled() => {}
                    }
                }
            }

            let result = self.error_result(error, started, attempts);
            self.emit(name, &input, &result).await;
            return result;
        }
    }

    /// Invoke with deadline and cancellation grace: a cancelled call
    /// gets `CANCEL_GRACE` to finish before being abandoned.
    async fn invoke(
        &self,
        tool: &dyn Tool,
        input: Value,
        ctx: &ToolContext,
        remaining: Duration,
    ) -> Result<Value, ToolError> {
        let exec = tool.execute(input, ctx);
        tokio::pin!(exec);

        tokio::select! {
            result = &mut exec => result,
            _ = tokio::time::sleep(remaining) => Err(ToolError::Timeout { timeout: remaining }),
            _ = ctx.cancel.cancelled() => {
                let grace = CANCEL_GRACE.min(remaining);
                match timeout(grace, &mut exec).await {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Cancelled),
                }
            }
        }
    }

    fn ok_result(&self, data: Value, started: Instant, attempts: u32) -> ToolResult {
        let tokens_charged = data.get("tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        let (data, truncated) = self.truncate(data);
        ToolResult {
            outcome: ToolOutcome::Ok,
            output: json!({"status": "ok", "data": data}),
            duration: started.elapsed().into(),
            truncated,
            attempts,
            fallback_used: None,
            tokens_charged,
        }
    }

    fn error_result(&self, error: ToolError, started: Instant, attempts: u32) -> ToolResult {
        let outcome = match &error {
            ToolError::Timeout { .. } => ToolOutcome::Timeout,
            ToolError::Llm(e) if e.is_rate_limit() => ToolOutcome::RateLimited,
            _ => ToolOutcome::ToolError,
        };
        ToolResult {
            outcome,
            output: json!({
                "status": "error",
                "error_kind": error.kind(),
                "error_message": error.to_string(),
            }),
            duration: started.elapsed().into(),
            truncated: false,
            attempts,
            fallback_used: None,
            tokens_charged: 0,
        }
    }

    /// Bound the serialized data payload, preserving a marker
    fn truncate(&self, data: Value) -> (Value, bool) {
        let max = self.resource.max_tool_output_length;
        let serialized = data.to_string();
        if serialized.len() <= max {
            return (data, false);
        }

        let mut end = max;
        while end > 0 && !serialized.is_char_boundary(end) {
            end -= 1;
        }
        let truncated = format!("{}... [output truncated at {} bytes]", &serialized[..end], max);
        (Value::String(truncated), true)
    }

    async fn emit(&self, name: &str, input: &Value, result: &ToolResult) {
        if let Some(emitter) = &self.emitter {
            emitter
                .tool_call(
                    name,
                    input.clone(),
                    result.output.clone(),
                    result.duration.as_millis() as u64,
                    result.outcome.as_str(),
                    result.truncated,
                )
                .await;
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    use rand::Rng;
    let exp = RETRY_BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter = Duration::from_millis(rand::rng().random_range(0..100));
    (exp + jitter).min(RETRY_MAX_DELAY)
}
