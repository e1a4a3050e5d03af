//! AgentLoop - one sub-agent's iterative tool-use loop
//!
//! Loop-top guards check the iteration budget, token budget, deadline,
//! and cancellation. Each step sends the bounded context to the LLM,
//! runs the returned tool calls (independent calls in parallel, bounded
//! at 4), and feeds results back into the context. `finish` terminates
//! with the phase payload; the first termination wins.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::domain::{
    DataflowTrace, EntryPoint, Finding, Location, Phase, Severity, StateDiff, VerificationStatus,
};
use crate::events::EventEmitter;
use crate::llm::pool::LlmPool;
use crate::llm::{CompletionRequest, ContentBlock, LlmError, Message, TokenUsage, ToolCall};
use crate::tools::{ToolContext, ToolExecutor, ToolOutcome, ToolResult};

/// Parallelism bound for independent tool calls in one step
const PARALLEL_TOOL_CALLS: usize = 4;

/// Configuration for one agent invocation
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub phase: Phase,
    pub agent_name: String,
    pub system_prompt: String,
    /// Tool names this agent may call
    pub tools: Vec<String>,
    pub max_iterations: u32,
    pub token_budget: Option<u64>,
    pub max_context_messages: usize,
    pub max_findings: usize,
    pub continue_on_tool_failure: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// How the loop terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Success,
    IterationLimit,
    BudgetExhausted,
    Timeout,
    Cancelled,
    ToolFailure(String),
}

impl AgentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentOutcome::Success => "success",
            AgentOutcome::IterationLimit => "iteration-limit",
            AgentOutcome::BudgetExhausted => "budget-exhausted",
            AgentOutcome::Timeout => "timeout",
            AgentOutcome::Cancelled => "cancelled",
            AgentOutcome::ToolFailure(_) => "tool-error",
        }
    }

    /// Partial results: the orchestrator may continue with what was
    /// produced when `continue_on_partial_results` is set
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            AgentOutcome::IterationLimit | AgentOutcome::BudgetExhausted | AgentOutcome::Timeout
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentOutcome::ToolFailure(_))
    }
}

/// What an agent run produced
#[derive(Debug)]
pub struct AgentRunResult {
    pub outcome: AgentOutcome,
    pub diff: StateDiff,
    pub usage: TokenUsage,
    pub iterations: u32,
}

/// One agent invocation. Construct, then `run` exactly once.
pub struct AgentLoop {
    config: AgentConfig,
    llm: Arc<LlmPool>,
    executor: Arc<ToolExecutor>,
    emitter: EventEmitter,
    deadline: Instant,
    cancel: CancelToken,
    checkpoint_requests: Option<mpsc::UnboundedSender<u32>>,
}

impl AgentLoop {
    pub fn new(
        config: AgentConfig,
        llm: Arc<LlmPool>,
        executor: Arc<ToolExecutor>,
        emitter: EventEmitter,
        deadline: Instant,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            llm,
            executor,
            emitter,
            deadline,
            cancel,
            checkpoint_requests: None,
        }
    }

    /// Iterations are reported on this channel so the orchestrator can
    /// apply its interval checkpoint policy while the agent runs.
    pub fn with_checkpoint_requests(mut self, tx: mpsc::UnboundedSender<u32>) -> Self {
        self.checkpoint_requests = Some(tx);
        self
    }

    /// Run the loop to termination
    pub async fn run(mut self, ctx: &ToolContext, initial_prompt: &str) -> AgentRunResult {
        let mut conversation = super::ConversationContext::new(self.config.max_context_messages);
        conversation.push(Message::user(initial_prompt));

        let mut diff = StateDiff::default();
        let mut usage = TokenUsage::default();
        let mut findings_count = 0usize;
        let mut iteration = 0u32;

        info!(
            agent = %self.config.agent_name,
            phase = self.config.phase.as_str(),
            max_iterations = self.config.max_iterations,
            "Agent loop starting"
        );

        let outcome = loop {
            // Loop-top guards; the first tripped guard wins
            if iteration >= self.config.max_iterations {
                break AgentOutcome::IterationLimit;
            }
            if let Some(budget) = self.config.token_budget
                && usage.total() >= budget
            {
                break AgentOutcome::BudgetExhausted;
            }
            if Instant::now() >= self.deadline {
                break AgentOutcome::Timeout;
            }
            if self.cancel.is_cancelled() {
                break AgentOutcome::Cancelled;
            }
            if findings_count >= self.config.max_findings {
                debug!(agent = %self.config.agent_name, findings_count, "Finding cap reached");
                break AgentOutcome::Success;
            }

            let mut request = CompletionRequest::new(&self.config.system_prompt, self.config.max_tokens);
            request.temperature = Some(self.config.temperature);
            request.messages = conversation.messages();
            request.tools = self.executor.definitions_for(&self.config.tools);

            let pooled = match self.llm.complete(request, self.deadline, &self.cancel).await {
                Ok(p) => p,
                Err(LlmError::Cancelled) => break AgentOutcome::Cancelled,
                Err(LlmError::Timeout(_)) => break AgentOutcome::Timeout,
                Err(e) => {
                    warn!(agent = %self.config.agent_name, error = %e, "LLM call failed");
                    break AgentOutcome::ToolFailure(e.to_string());
                }
            };
            usage.add(&pooled.response.usage);

            let step_message = pooled.response.content.clone().unwrap_or_default();
            self.emitter
                .agent_step(
                    self.config.phase.as_str(),
                    preview(&step_message, 300),
                    pooled.response.usage.total(),
                )
                .await;
            if !step_message.is_empty() {
                diff.messages.push(step_message.clone());
            }

            conversation.push(assistant_message(&pooled.response.content, &pooled.response.tool_calls));

            if pooled.response.tool_calls.is_empty() {
                // Model ended its turn without calling finish; accept
                // the text as the phase result
                break AgentOutcome::Success;
            }

            // finish terminates before any other tool in the same step runs
            if let Some(call) = pooled.response.tool_calls.iter().find(|c| c.name == "finish") {
                findings_count += apply_finish_payload(
                    &mut diff,
                    &call.input,
                    &ctx.task_id,
                    self.config.max_findings.saturating_sub(findings_count),
                );
                break AgentOutcome::Success;
            }

            let results = self.run_tool_calls(&pooled.response.tool_calls, ctx).await;

            let mut failure: Option<AgentOutcome> = None;
            let mut blocks = Vec::with_capacity(results.len());
            for (call, result) in &results {
                if result.tokens_charged > 0 {
                    usage.output_tokens += result.tokens_charged;
                }

                match result.outcome {
                    ToolOutcome::Ok => {
                        findings_count += harvest_findings(
                            &mut diff,
                            result,
                            &ctx.task_id,
                            self.config.max_findings.saturating_sub(findings_count),
                        );
                    }
                    ToolOutcome::CircuitOpen | ToolOutcome::Timeout | ToolOutcome::RateLimited => {
                        if !self.config.continue_on_tool_failure {
                            failure = Some(AgentOutcome::ToolFailure(format!(
                                "{} degraded: {}",
                                call.name,
                                result.outcome.as_str()
                            )));
                        }
                        // Degraded result stays in context either way
                    }
                    ToolOutcome::ToolError => {
                        let kind = result.output["error_kind"].as_str().unwrap_or("");
                        if kind == "Cancelled" {
                            failure = Some(AgentOutcome::Cancelled);
                        } else {
                            failure = Some(AgentOutcome::ToolFailure(
                                result.output["error_message"].as_str().unwrap_or("tool error").to_string(),
                            ));
                        }
                    }
                }

                blocks.push(ContentBlock::tool_result(
                    call.id.clone(),
                    result.content_for_llm(),
                    result.is_error(),
                ));
            }
            conversation.push(Message::user_blocks(blocks));

            if let Some(outcome) = failure {
                break outcome;
            }

            iteration += 1;
            if let Some(tx) = &self.checkpoint_requests {
                let _ = tx.send(iteration);
            }
        };

        info!(
            agent = %self.config.agent_name,
            outcome = outcome.as_str(),
            iterations = iteration,
            findings = diff.findings.len(),
            tokens = usage.total(),
            "Agent loop terminated"
        );

        AgentRunResult {
            outcome,
            diff,
            usage,
            iterations: iteration,
        }
    }

    /// Execute one step's tool calls with bounded parallelism,
    /// preserving the call order in the returned pairs.
    async fn run_tool_calls<'a>(
        &self,
        calls: &'a [ToolCall],
        ctx: &ToolContext,
    ) -> Vec<(&'a ToolCall, ToolResult)> {
        let mut by_id: HashMap<String, ToolResult> = stream::iter(calls)
            .map(|call| async move {
                let result = self.executor.run_tool(&call.name, call.input.clone(), ctx).await;
                (call.id.clone(), result)
            })
            .buffer_unordered(PARALLEL_TOOL_CALLS)
            .collect()
            .await;

        calls
            .iter()
            .filter_map(|call| by_id.remove(&call.id).map(|result| (call, result)))
            .collect()
    }
}

fn assistant_message(content: &Option<String>, tool_calls: &[ToolCall]) -> Message {
    let mut blocks = Vec::new();
    if let Some(text) = content {
        blocks.push(ContentBlock::text(text));
    }
    for call in tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });
    }
    Message::assistant_blocks(blocks)
}

fn preview(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Pull partial findings out of a successful tool result
fn harvest_findings(diff: &mut StateDiff, result: &ToolResult, task_id: &str, room: usize) -> usize {
    let Some(items) = result.data().and_then(|d| d.get("findings")).and_then(|f| f.as_array()) else {
        return 0;
    };
    let mut added = 0usize;
    for item in items {
        if added >= room {
            break;
        }
        if let Some(finding) = partial_finding(task_id, item) {
            diff.findings.push(finding);
            added += 1;
        }
    }
    added
}

/// Fold a finish payload into the diff. Returns how many findings it
/// contributed (bounded by `room`).
fn apply_finish_payload(diff: &mut StateDiff, payload: &Value, task_id: &str, room: usize) -> usize {
    if let Some(stack) = payload.get("tech_stack").and_then(|v| v.as_object()) {
        let mut map = BTreeMap::new();
        for (lang, fraction) in stack {
            if let Some(f) = fraction.as_f64() {
                map.insert(lang.clone(), f);
            }
        }
        diff.tech_stack = map;
    }

    if let Some(entries) = payload.get("entry_points").and_then(|v| v.as_array()) {
        for entry in entries {
            if let Some(path) = entry.get("path").and_then(|v| v.as_str()) {
                diff.entry_points.push(EntryPoint {
                    path: path.to_string(),
                    kind: entry.get("kind").and_then(|v| v.as_str()).unwrap_or("unknown").to_string(),
                });
            }
        }
    }

    if let Some(paths) = payload.get("high_risk_paths").and_then(|v| v.as_array()) {
        diff.high_risk_paths
            .extend(paths.iter().filter_map(|p| p.as_str().map(String::from)));
    }

    if let Some(summary) = payload.get("dependency_summary").and_then(|v| v.as_str()) {
        diff.dependency_summary = Some(summary.to_string());
    }

    if let Some(summary) = payload.get("summary").and_then(|v| v.as_str()) {
        diff.summary = Some(summary.to_string());
    }

    if let Some(flag) = payload.get("continue_analysis").and_then(|v| v.as_bool()) {
        diff.continue_analysis = Some(flag);
    }

    if let Some(verdicts) = payload.get("verdicts").and_then(|v| v.as_array()) {
        for pair in verdicts {
            let (Some(fp), Some(status)) = (
                pair.get(0).and_then(|v| v.as_str()),
                pair.get(1).and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            let status = match status {
                "confirmed" => VerificationStatus::Confirmed,
                "rejected" => VerificationStatus::Rejected,
                "needs-review" => VerificationStatus::NeedsReview,
                _ => VerificationStatus::New,
            };
            diff.verdicts.push((fp.to_string(), status));
        }
    }

    let mut added = 0usize;
    if let Some(items) = payload.get("findings").and_then(|v| v.as_array()) {
        for item in items {
            if added >= room {
                break;
            }
            if let Some(finding) = partial_finding(task_id, item) {
                diff.findings.push(finding);
                added += 1;
            }
        }
    }
    added
}

/// Parse a partial finding record (scanner output or finish payload)
pub fn partial_finding(task_id: &str, value: &Value) -> Option<Finding> {
    let vuln_type = value.get("vuln_type").and_then(|v| v.as_str())?;
    let file_path = value.get("file_path").and_then(|v| v.as_str()).unwrap_or("");
    let severity = value
        .get("severity")
        .and_then(|v| v.as_str())
        .and_then(Severity::parse)
        .unwrap_or(Severity::Medium);
    let title = value
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or(vuln_type)
        .to_string();

    let location = Location {
        file_path: file_path.to_string(),
        line_start: value.get("line_start").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        line_end: value.get("line_end").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        column_start: value.get("column_start").and_then(|v| v.as_u64()).map(|c| c as u32),
        column_end: value.get("column_end").and_then(|v| v.as_u64()).map(|c| c as u32),
        function: value.get("function").and_then(|v| v.as_str()).map(String::from),
        class: value.get("class").and_then(|v| v.as_str()).map(String::from),
    };

    let mut finding = Finding::new(task_id, vuln_type, severity, title, location);
    if let Some(description) = value.get("description").and_then(|v| v.as_str()) {
        finding.description = description.to_string();
    }
    if let Some(snippet) = value.get("snippet").and_then(|v| v.as_str()) {
        finding.snippet = snippet.to_string();
    }
    if let Some(fix) = value.get("fix_suggestion").and_then(|v| v.as_str()) {
        finding.fix_suggestion = Some(fix.to_string());
    }
    if let Some(flow) = value.get("dataflow") {
        let source = flow.get("source").and_then(|v| v.as_str()).unwrap_or("");
        let sink = flow.get("sink").and_then(|v| v.as_str()).unwrap_or("");
        if !source.is_empty() || !sink.is_empty() {
            finding.dataflow = Some(DataflowTrace {
                source: source.to_string(),
                sink: sink.to_string(),
                path: flow
                    .get("path")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|p| p.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
            });
        }
    }
    Some(finding)
}
