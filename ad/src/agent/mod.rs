//! Agent loop: the ReAct-style think → call tool → observe cycle one
//! sub-agent runs for a phase goal

mod context;
mod engine;

pub use context::ConversationContext;
pub use engine::{AgentConfig, AgentLoop, AgentOutcome, AgentRunResult, partial_finding};
