//! LLM-backed tools: think, reflect, chat
//!
//! All three route through the provider pool, so they inherit its rate
//! limiting, retries, caching, and cost accounting. Token counts ride
//! back in the data payload for the executor to charge.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::llm::{CompletionRequest, Message};
use crate::tools::{Tool, ToolContext, ToolError};

const THINK_SYSTEM: &str = "You are the reasoning faculty of a security audit agent. \
     Think step by step about the question and answer concisely. Do not call tools.";

const REFLECT_SYSTEM: &str = "You are reviewing an audit agent's recent work. \
     Point out gaps, likely false positives, and the most valuable next action. Be brief.";

const CHAT_SYSTEM: &str = "You are a security analysis assistant. Answer the question directly.";

async fn run_completion(system: &str, prompt: &str, ctx: &ToolContext) -> Result<Value, ToolError> {
    let pool = ctx.llm()?;

    let mut request = CompletionRequest::new(system, 2_048);
    request.messages.push(Message::user(prompt));

    let pooled = pool.complete(request, ctx.deadline, &ctx.cancel).await?;
    let text = pooled.response.content.unwrap_or_default();

    Ok(json!({
        "text": text,
        "tokens": pooled.response.usage.total(),
        "cost_usd": pooled.cost_usd,
        "cached": pooled.cached,
    }))
}

/// Structured thinking step
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &'static str {
        "think"
    }

    fn description(&self) -> &'static str {
        "Reason about the current problem without side effects. Input: thought prompt."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "What to think about"
                }
            },
            "required": ["thought"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let thought = input
            .get("thought")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgument("thought is required".to_string()))?;
        run_completion(THINK_SYSTEM, thought, ctx).await
    }
}

/// Self-review of recent work
pub struct ReflectTool;

#[async_trait]
impl Tool for ReflectTool {
    fn name(&self) -> &'static str {
        "reflect"
    }

    fn description(&self) -> &'static str {
        "Review recent findings and steps for gaps and false positives. Input: summary of recent work."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Summary of work to review"
                }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let summary = input
            .get("summary")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgument("summary is required".to_string()))?;
        run_completion(REFLECT_SYSTEM, summary, ctx).await
    }
}

/// Free-form question to the model
pub struct ChatTool;

#[async_trait]
impl Tool for ChatTool {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn description(&self) -> &'static str {
        "Ask the model a direct question. Input: message."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Question or instruction"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgument("message is required".to_string()))?;
        run_completion(CHAT_SYSTEM, message, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config::LlmConfig;
    use crate::limits::RateLimiter;
    use crate::llm::client::mock::{MockLlmClient, text_response};
    use crate::llm::pool::LlmPool;
    use crate::store::MemoryStores;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn ctx_with_llm(responses: Vec<&str>) -> ToolContext {
        let client = MockLlmClient::new(responses.into_iter().map(|r| Ok(text_response(r))).collect());
        let pool = LlmPool::new(
            Arc::new(client),
            LlmConfig {
                rate_per_minute: 6_000,
                ..Default::default()
            },
            Arc::new(RateLimiter::new()),
            Arc::new(MemoryStores::new()),
        );
        ToolContext::new(PathBuf::from("/tmp"), "t1")
            .with_llm(Arc::new(pool))
            .with_cancel(CancelToken::new())
    }

    #[tokio::test]
    async fn test_think_returns_text_and_tokens() {
        let ctx = ctx_with_llm(vec!["The entry point is app.py"]);
        let data = ThinkTool
            .execute(json!({"thought": "where is the entry point?"}), &ctx)
            .await
            .unwrap();

        assert_eq!(data["text"], "The entry point is app.py");
        assert!(data["tokens"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_think_requires_thought() {
        let ctx = ctx_with_llm(vec![]);
        let err = ThinkTool.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_chat_without_pool_fails() {
        let ctx = ToolContext::new(PathBuf::from("/tmp"), "t1");
        let err = ChatTool.execute(json!({"message": "hi"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_reflect_roundtrip() {
        let ctx = ctx_with_llm(vec!["Verification looks thin"]);
        let data = ReflectTool
            .execute(json!({"summary": "found 3 findings"}), &ctx)
            .await
            .unwrap();
        assert!(data["text"].as_str().unwrap().contains("thin"));
    }
}
