//! Verification tools: sandbox_execute and validate_vulnerability

use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use tokio::process::Command;

use crate::llm::{CompletionRequest, Message};
use crate::tools::{Tool, ToolContext, ToolError};

const VALIDATE_SYSTEM: &str = "You are a vulnerability verification specialist. Given a finding and \
     optional execution evidence, decide whether it is a real vulnerability. Respond with JSON only: \
     {\"verdict\": \"confirmed\"|\"rejected\"|\"needs-review\", \"reasoning\": \"...\"}";

/// Run a proof-of-concept command inside the project root.
///
/// Captured stdout/stderr become an evidence bag for the finding. The
/// filesystem sandbox still applies; there is no further OS isolation.
pub struct SandboxExecuteTool;

#[async_trait]
impl Tool for SandboxExecuteTool {
    fn name(&self) -> &'static str {
        "sandbox_execute"
    }

    fn description(&self) -> &'static str {
        "Execute a command in the project directory and capture its output as verification evidence."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Program and arguments, e.g. [\"python3\", \"poc.py\"]"
                }
            },
            "required": ["command"]
        })
    }

    fn external(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let argv: Vec<String> = input
            .get("command")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let Some((program, args)) = argv.split_first() else {
            return Err(ToolError::InvalidArgument("command must be a non-empty array".to_string()));
        };

        let output = Command::new(program)
            .args(args)
            .current_dir(&ctx.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ToolError::Io)?;

        Ok(json!({
            "exit_code": output.status.code(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}

/// LLM-backed verdict on a finding, optionally with execution evidence
pub struct ValidateVulnerabilityTool;

#[async_trait]
impl Tool for ValidateVulnerabilityTool {
    fn name(&self) -> &'static str {
        "validate_vulnerability"
    }

    fn description(&self) -> &'static str {
        "Assess whether a finding is a real vulnerability. Input: the finding record and optional evidence."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "finding": {
                    "type": "object",
                    "description": "The finding record to validate"
                },
                "evidence": {
                    "type": "object",
                    "description": "Optional sandbox_execute output"
                }
            },
            "required": ["finding"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let finding = input
            .get("finding")
            .ok_or_else(|| ToolError::InvalidArgument("finding is required".to_string()))?;

        let mut prompt = format!("Finding:\n{}\n", finding);
        if let Some(evidence) = input.get("evidence") {
            prompt.push_str(&format!("\nEvidence:\n{}\n", evidence));
        }

        let pool = ctx.llm()?;
        let mut request = CompletionRequest::new(VALIDATE_SYSTEM, 1_024);
        request.messages.push(Message::user(prompt));

        let pooled = pool.complete(request, ctx.deadline, &ctx.cancel).await?;
        let text = pooled.response.content.unwrap_or_default();

        let (verdict, reasoning) = parse_verdict(&text);
        Ok(json!({
            "verdict": verdict,
            "reasoning": reasoning,
            "tokens": pooled.response.usage.total(),
        }))
    }
}

/// Extract the verdict from the model's reply, tolerating prose around
/// the JSON
fn parse_verdict(text: &str) -> (String, String) {
    if let Some(start) = text.find('{')
        && let Some(end) = text.rfind('}')
        && let Ok(parsed) = serde_json::from_str::<Value>(&text[start..=end])
    {
        let verdict = parsed["verdict"].as_str().unwrap_or("needs-review").to_string();
        let reasoning = parsed["reasoning"].as_str().unwrap_or("").to_string();
        let verdict = match verdict.as_str() {
            "confirmed" | "rejected" | "needs-review" => verdict,
            _ => "needs-review".to_string(),
        };
        return (verdict, reasoning);
    }
    ("needs-review".to_string(), text.chars().take(500).collect())
}
