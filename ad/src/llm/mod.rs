//! LLM clients and the pooled wrapper
//!
//! The trait and types are provider-agnostic; the Anthropic adapter is
//! the shipped implementation. All engine code calls through
//! [`pool::LlmPool`], which adds concurrency bounds, rate limiting,
//! retries, caching, and cost accounting.

mod anthropic;
pub mod client;
mod error;
pub mod pool;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use error::LlmError;
pub use pool::{LlmPool, PooledResponse};
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, Role, StopReason, StreamChunk,
    TokenUsage, ToolCall, ToolDefinition,
};
