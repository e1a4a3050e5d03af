//! AuditDaemon - LLM-agent security audit orchestration engine
//!
//! AuditDaemon drives automated security and quality audits over source
//! repositories by orchestrating LLM-backed agents that read, search,
//! and analyze code, then verify and deduplicate their findings.
//!
//! # Core concepts
//!
//! - **Fixed phase graph**: init → recon → analysis ↔ verification →
//!   report. Edge conditions are pure functions of the audit state.
//! - **Diffs, not shared state**: sub-agents return a diff; only the
//!   orchestrator mutates AuditState.
//! - **Governed tools**: every external capability goes through one
//!   executor with rate limits, circuit breakers, timeouts, and
//!   fallback.
//! - **At-least-once findings**: commits are deduplicated by a stable
//!   content fingerprint, so crash recovery and agent overlap never
//!   produce duplicates.
//!
//! # Modules
//!
//! - [`config`] - configuration registry and per-task snapshots
//! - [`domain`] - tasks, findings, audit state
//! - [`limits`] - token buckets and circuit breakers
//! - [`tools`] - tool registry, sandbox, and executor
//! - [`llm`] - provider clients and the pooled wrapper
//! - [`agent`] - the per-agent tool-use loop
//! - [`orchestrator`] - the phase graph walker
//! - [`events`] - the per-task event bus
//! - [`checkpoint`] - state snapshots and recovery
//! - [`findings`] - fingerprinting, dedup, scoring
//! - [`store`] - external state ports
//! - [`engine`] - the dependency-injection root

pub mod agent;
pub mod cancel;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod events;
pub mod findings;
pub mod limits;
pub mod llm;
pub mod orchestrator;
pub mod store;
pub mod tools;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::Config;
pub use domain::{AuditState, Finding, Phase, Severity, Task, TaskStatus, VerificationStatus};
pub use engine::{Engine, EngineError, EngineStores};
pub use events::{AuditEvent, EventBus, EventKind};
pub use findings::{FindingSet, fingerprint};
pub use llm::{AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError};
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use tools::{Tool, ToolContext, ToolError, ToolExecutor, ToolOutcome, ToolResult};
