//! Orchestration tools: dispatch_agent and finish
//!
//! Both are intercepted by name in the loops that own them — these
//! implementations exist so the registry can advertise schemas to the
//! model and reject out-of-place calls.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};

/// Start a sub-agent. Only meaningful inside the orchestrator loop,
/// which intercepts the call before it reaches the executor.
pub struct DispatchAgentTool;

#[async_trait]
impl Tool for DispatchAgentTool {
    fn name(&self) -> &'static str {
        "dispatch_agent"
    }

    fn description(&self) -> &'static str {
        "Dispatch a sub-agent for a phase goal. Available to the orchestrator only."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Agent kind: recon, analysis, or verification"
                },
                "goal": {
                    "type": "string",
                    "description": "What the sub-agent should accomplish"
                }
            },
            "required": ["agent"]
        })
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::InvalidArgument(
            "dispatch_agent is only available to the orchestrator".to_string(),
        ))
    }
}

/// Terminate the current agent loop with a payload. The loop intercepts
/// this call; the echo here keeps the executor path harmless.
pub struct FinishTool;

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &'static str {
        "finish"
    }

    fn description(&self) -> &'static str {
        "Finish the current phase and return results. Input: the phase result payload."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "findings": {
                    "type": "array",
                    "description": "Finding records produced this phase"
                },
                "tech_stack": {
                    "type": "object",
                    "description": "language → fraction map (recon)"
                },
                "entry_points": {
                    "type": "array",
                    "description": "Recognized entry points (recon)"
                },
                "high_risk_paths": {
                    "type": "array",
                    "description": "Paths needing analysis (recon)"
                },
                "verdicts": {
                    "type": "array",
                    "description": "[fingerprint, status] pairs (verification)"
                },
                "continue_analysis": {
                    "type": "boolean",
                    "description": "Request another analysis round (verification)"
                },
                "summary": {
                    "type": "string",
                    "description": "Phase summary"
                }
            }
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(input)
    }
}
