//! Orchestrator: walks the phase graph for one task
//!
//! One orchestrator instance owns one task's AuditState for the
//! duration of processing (the advisory lock guarantees exclusivity).
//! Sub-agents never touch the state; they return diffs which are
//! applied between phases. Findings are committed as they arrive, so a
//! cancelled or crashed run keeps everything already committed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{AgentConfig, AgentLoop, AgentOutcome, AgentRunResult};
use crate::cancel::CancelToken;
use crate::checkpoint::{CheckpointManager, CheckpointTrigger};
use crate::config::Config;
use crate::domain::{AuditState, Phase, StateDiff, Task, TaskStatus, VerificationStatus, language_for_path};
use crate::events::EventEmitter;
use crate::findings::{fingerprint, merge_findings, severity_counts};
use crate::llm::pool::LlmPool;
use crate::store::{BlobStore, CheckpointStore, FindingStore, TaskStore};
use crate::tools::{ToolContext, ToolExecutor};

use super::phase::next_phase;
use super::prompts;
use super::report::build_report;

/// Stores the orchestrator writes through
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub tasks: Arc<dyn TaskStore>,
    pub findings: Arc<dyn FindingStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub blobs: Arc<dyn BlobStore>,
}

/// How one phase ended, aggregated over its agents
enum PhaseResult {
    Success,
    /// Partial results accepted under `continue_on_partial_results`
    Partial(String),
    Fatal(String),
    Cancelled,
}

pub struct Orchestrator {
    config: Config,
    deps: OrchestratorDeps,
    llm: Arc<LlmPool>,
    executor: Arc<ToolExecutor>,
    emitter: EventEmitter,
    cancel: CancelToken,
    project_root: PathBuf,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        deps: OrchestratorDeps,
        llm: Arc<LlmPool>,
        executor: Arc<ToolExecutor>,
        emitter: EventEmitter,
        cancel: CancelToken,
        project_root: PathBuf,
    ) -> Self {
        Self {
            config,
            deps,
            llm,
            executor,
            emitter,
            cancel,
            project_root,
        }
    }

    /// Drive the task to a terminal status. Always returns the task
    /// with its final state persisted.
    pub async fn run(self, mut task: Task) -> Task {
        let run_started = Instant::now();

        if task.status.is_terminal() {
            debug!(task_id = %task.id, "Task already terminal, nothing to do");
            return task;
        }

        self.emitter.task_start(self.config_digest()).await;

        if matches!(task.status, TaskStatus::Pending | TaskStatus::Paused)
            && let Err(e) = task.transition(TaskStatus::Running)
        {
            return self.finish_failed(task, "ValidationError", e).await;
        }
        self.save_task(&task).await;

        // --- init phase ---
        let init_started = Instant::now();
        self.emitter.phase_start(Phase::Init.as_str()).await;

        if !self.project_root.exists() {
            self.emitter
                .phase_complete(Phase::Init.as_str(), "error", ms_since(init_started))
                .await;
            return self
                .finish_failed(
                    task,
                    "ValidationError",
                    format!("Project root does not exist: {}", self.project_root.display()),
                )
                .await;
        }

        let mut ckpt = CheckpointManager::new(self.deps.checkpoints.clone(), self.config.checkpoint.clone(), &task.id);
        let mut state = match CheckpointManager::restore(&self.deps.checkpoints, &task.id).await {
            Ok(Some((index, state))) => {
                info!(task_id = %task.id, index, "Resuming from checkpoint");
                ckpt.resume_after(index);
                state
            }
            Ok(None) => AuditState::new(self.project_root.clone(), self.config.agent.orchestrator_max_iterations),
            Err(e) => {
                // Recovery failure: discard and restart from scratch
                warn!(task_id = %task.id, error = %e, "Checkpoint recovery failed, starting fresh");
                AuditState::new(self.project_root.clone(), self.config.agent.orchestrator_max_iterations)
            }
        };

        self.emitter
            .phase_complete(Phase::Init.as_str(), "success", ms_since(init_started))
            .await;

        // --- phase graph walk ---
        loop {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(task).await;
            }

            let mut phase = next_phase(&state);
            if phase.is_terminal() {
                state.phase = phase;
                break;
            }

            // The token budget is cumulative across the task: once it
            // is spent, no further LLM-backed phase runs. What was
            // produced so far is partial results.
            if matches!(phase, Phase::Recon | Phase::Analysis | Phase::Verification)
                && self.remaining_token_budget(&task) == 0
            {
                if self.config.fallback.continue_on_partial_results {
                    warn!(
                        task_id = %task.id,
                        tokens_used = task.token_usage.total(),
                        "Task token budget exhausted, skipping to report"
                    );
                    state.continue_analysis = false;
                    phase = Phase::Report;
                } else {
                    state.phase = Phase::Error;
                    state.last_error = Some(format!(
                        "Task token budget exhausted ({} tokens used)",
                        task.token_usage.total()
                    ));
                    break;
                }
            }

            state.iteration += 1;
            if state.iteration > state.max_iterations {
                state.phase = Phase::Error;
                state.last_error = Some("Orchestrator iteration limit exceeded".to_string());
                break;
            }
            state.phase = phase;

            task.current_phase = Some(phase.as_str().to_string());
            self.save_task(&task).await;

            let phase_started = Instant::now();
            self.emitter.phase_start(phase.as_str()).await;

            let result = match phase {
                Phase::Recon => self.phase_recon(&mut state, &mut task, &mut ckpt).await,
                Phase::Analysis => self.phase_analysis(&mut state, &mut task, &mut ckpt).await,
                Phase::Verification => self.phase_verification(&mut state, &mut task, &mut ckpt).await,
                Phase::Report => self.phase_report(&mut state, &mut task).await,
                _ => PhaseResult::Success,
            };

            let outcome_str = match &result {
                PhaseResult::Success => "success",
                PhaseResult::Partial(_) => "partial",
                PhaseResult::Fatal(_) => "error",
                PhaseResult::Cancelled => "cancelled",
            };
            self.emitter
                .phase_complete(phase.as_str(), outcome_str, ms_since(phase_started))
                .await;

            if ckpt.should_checkpoint(CheckpointTrigger::PhaseBoundary, state.iteration) {
                self.write_checkpoint(&mut ckpt, &mut state).await;
            }

            match result {
                PhaseResult::Success => {}
                PhaseResult::Partial(reason) => {
                    info!(task_id = %task.id, phase = phase.as_str(), %reason, "Phase completed with warnings");
                }
                PhaseResult::Fatal(message) => {
                    state.phase = Phase::Error;
                    state.last_error = Some(message);
                    break;
                }
                PhaseResult::Cancelled => return self.finish_cancelled(task).await,
            }
        }

        if state.phase == Phase::Error {
            let message = state.last_error.clone().unwrap_or_else(|| "audit failed".to_string());
            return self.finish_failed(task, "ToolError", message).await;
        }

        // Terminal success
        let counts = severity_counts(state.open_findings.iter().chain(state.verified_findings.iter()));
        task.finding_counts = counts;
        if let Err(e) = task.transition(TaskStatus::Succeeded) {
            return self.finish_failed(task, "ValidationError", e).await;
        }
        self.emitter
            .task_complete(counts, task.overall_score.unwrap_or(100), ms_since(run_started))
            .await;
        self.save_task(&task).await;
        info!(task_id = %task.id, findings = counts.total(), "Audit succeeded");
        task
    }

    // === Phases ===

    async fn phase_recon(
        &self,
        state: &mut AuditState,
        task: &mut Task,
        ckpt: &mut CheckpointManager,
    ) -> PhaseResult {
        // Deterministic index pass: file counts and tech-stack fractions
        // hold even if the agent contributes nothing
        let ctx = self.tool_ctx("recon", Phase::Recon, &task.id);
        let listing = self.executor.run_tool("list_files", json!({}), &ctx).await;
        if let Some(files) = listing.data().and_then(|d| d.get("files")).and_then(|f| f.as_array()) {
            let mut by_language: BTreeMap<String, u64> = BTreeMap::new();
            for file in files {
                if let Some(path) = file.get("path").and_then(|p| p.as_str()) {
                    *by_language.entry(language_for_path(path).to_string()).or_insert(0) += 1;
                }
            }
            let total: u64 = by_language.values().sum();
            if total > 0 {
                state.tech_stack = by_language
                    .into_iter()
                    .map(|(lang, count)| (lang, count as f64 / total as f64))
                    .collect();
            }
            task.total_files = total as u32;
            task.indexed_files = total as u32;
        }

        let result = self
            .dispatch_agent(
                "recon",
                Phase::Recon,
                prompts::RECON_SYSTEM,
                recon_tools(),
                prompts::recon_prompt(state),
                self.remaining_token_budget(task),
                &task.id,
                state,
                ckpt,
            )
            .await;
        task.token_usage.input_tokens += result.usage.input_tokens;
        task.token_usage.output_tokens += result.usage.output_tokens;

        match result.outcome {
            AgentOutcome::Cancelled => PhaseResult::Cancelled,
            AgentOutcome::Success => {
                self.apply_diff(state, task, result.diff).await;
                PhaseResult::Success
            }
            outcome if outcome.is_partial() => {
                self.apply_diff(state, task, result.diff).await;
                if self.config.fallback.continue_on_partial_results {
                    PhaseResult::Partial(format!("recon: {}", outcome.as_str()))
                } else {
                    PhaseResult::Fatal(format!("Recon terminated: {}", outcome.as_str()))
                }
            }
            AgentOutcome::ToolFailure(message) => {
                if self.config.fallback.enabled {
                    // Empty-but-valid defaults: the deterministic index
                    // already populated what it could
                    warn!(task_id = %task.id, %message, "Recon agent failed, continuing with defaults");
                    PhaseResult::Partial("recon agent failed, defaults used".to_string())
                } else {
                    PhaseResult::Fatal(format!("Recon failed: {}", message))
                }
            }
            _ => PhaseResult::Success,
        }
    }

    async fn phase_analysis(
        &self,
        state: &mut AuditState,
        task: &mut Task,
        ckpt: &mut CheckpointManager,
    ) -> PhaseResult {
        // Re-entering analysis consumes the verification agent's request
        state.continue_analysis = false;

        let areas = if state.high_risk_paths.is_empty() {
            vec![".".to_string()]
        } else {
            state.high_risk_paths.clone()
        };

        let mut partial: Option<String> = None;

        for area in areas {
            if self.cancel.is_cancelled() {
                return PhaseResult::Cancelled;
            }

            let result = self
                .dispatch_agent(
                    &format!("analysis:{}", area),
                    Phase::Analysis,
                    prompts::ANALYSIS_SYSTEM,
                    analysis_tools(),
                    prompts::analysis_prompt(state, &area),
                    self.remaining_token_budget(task),
                    &task.id,
                    state,
                    ckpt,
                )
                .await;
            task.token_usage.input_tokens += result.usage.input_tokens;
            task.token_usage.output_tokens += result.usage.output_tokens;

            let outcome = result.outcome.clone();
            let produced = !result.diff.findings.is_empty();
            self.apply_diff(state, task, result.diff).await;

            match outcome {
                AgentOutcome::Success => {}
                AgentOutcome::Cancelled => return PhaseResult::Cancelled,
                AgentOutcome::ToolFailure(message) => {
                    if produced && self.config.fallback.continue_on_partial_results {
                        partial = Some(format!("analysis of {} degraded: {}", area, message));
                    } else {
                        return PhaseResult::Fatal(format!("Analysis of {} failed: {}", area, message));
                    }
                }
                outcome if outcome.is_partial() => {
                    if self.config.fallback.continue_on_partial_results {
                        partial = Some(format!("analysis of {}: {}", area, outcome.as_str()));
                    } else {
                        return PhaseResult::Fatal(format!("Analysis of {} terminated: {}", area, outcome.as_str()));
                    }
                }
                _ => {}
            }
        }

        task.analyzed_files = task.indexed_files;
        match partial {
            Some(reason) => PhaseResult::Partial(reason),
            None => PhaseResult::Success,
        }
    }

    async fn phase_verification(
        &self,
        state: &mut AuditState,
        task: &mut Task,
        ckpt: &mut CheckpointManager,
    ) -> PhaseResult {
        if state.open_findings.is_empty() {
            state.continue_analysis = false;
            return PhaseResult::Success;
        }

        let result = self
            .dispatch_agent(
                "verification",
                Phase::Verification,
                prompts::VERIFICATION_SYSTEM,
                verification_tools(),
                prompts::verification_prompt(state),
                self.remaining_token_budget(task),
                &task.id,
                state,
                ckpt,
            )
            .await;
        task.token_usage.input_tokens += result.usage.input_tokens;
        task.token_usage.output_tokens += result.usage.output_tokens;

        if result.outcome == AgentOutcome::Cancelled {
            return PhaseResult::Cancelled;
        }

        // Verdicts first, so repartitioning sees final statuses
        for (fp, status) in &result.diff.verdicts {
            let Some(finding) = state.open_findings.iter_mut().find(|f| f.fingerprint == *fp) else {
                debug!(fingerprint = %fp, "Verdict for unknown finding ignored");
                continue;
            };
            finding.verification_status = *status;
            self.emitter.finding_updated(&finding.id, status.as_str()).await;
            if let Err(e) = self.deps.findings.upsert_by_fingerprint(finding).await {
                warn!(error = %e, "Failed to persist finding verdict");
            }
        }
        state.repartition_findings();

        // Only the verification agent writes this flag
        state.continue_analysis = result.diff.continue_analysis.unwrap_or(false);

        let outcome = result.outcome.clone();
        let mut diff = result.diff;
        diff.verdicts.clear();
        diff.continue_analysis = None;
        self.apply_diff(state, task, diff).await;

        match outcome {
            AgentOutcome::Success => PhaseResult::Success,
            AgentOutcome::ToolFailure(message) => PhaseResult::Fatal(format!("Verification failed: {}", message)),
            outcome if outcome.is_partial() => {
                if self.config.fallback.continue_on_partial_results {
                    PhaseResult::Partial(format!("verification: {}", outcome.as_str()))
                } else {
                    PhaseResult::Fatal(format!("Verification terminated: {}", outcome.as_str()))
                }
            }
            _ => PhaseResult::Success,
        }
    }

    async fn phase_report(&self, state: &mut AuditState, task: &mut Task) -> PhaseResult {
        let (summary, overall, security) = build_report(state);

        // The rendered summary is a large artifact; it goes to the blob
        // store, the task keeps only the scores
        let report_key = format!("reports/{}.md", task.id);
        if let Err(e) = self.deps.blobs.put(&report_key, summary.as_bytes()).await {
            warn!(error = %e, "Failed to store report artifact");
        }

        state.summary = Some(summary);
        state.security_score = Some(security);
        task.overall_score = Some(overall);
        task.security_score = Some(security);
        task.current_step = Some("report".to_string());

        // Persist the final finding set
        for finding in state
            .open_findings
            .iter()
            .chain(state.verified_findings.iter())
            .chain(state.false_positives.iter())
        {
            if let Err(e) = self.deps.findings.upsert_by_fingerprint(finding).await {
                warn!(error = %e, "Failed to persist finding in report phase");
            }
        }

        PhaseResult::Success
    }

    // === Agent dispatch ===

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_agent(
        &self,
        name: &str,
        phase: Phase,
        system_prompt: &str,
        tools: Vec<String>,
        initial_prompt: String,
        token_budget: u64,
        task_id: &str,
        state: &AuditState,
        ckpt: &mut CheckpointManager,
    ) -> AgentRunResult {
        let deadline = Instant::now() + self.config.agent.timeout_for(phase);
        let ctx = self
            .tool_ctx(name, phase, task_id)
            .with_deadline(deadline)
            .with_llm(self.llm.clone());

        let agent_config = AgentConfig {
            phase,
            agent_name: name.to_string(),
            system_prompt: system_prompt.to_string(),
            tools,
            max_iterations: self.config.agent.max_iterations_for(phase),
            // Whatever remains of the task's cumulative budget; an
            // in-flight step may overshoot by one batch
            token_budget: Some(token_budget),
            max_context_messages: self.config.resource.max_context_messages,
            max_findings: self.config.resource.max_findings_per_agent,
            continue_on_tool_failure: self.config.fallback.continue_on_tool_failure,
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let agent = AgentLoop::new(
            agent_config,
            self.llm.clone(),
            self.executor.clone(),
            self.emitter.clone(),
            deadline,
            self.cancel.clone(),
        )
        .with_checkpoint_requests(tx);

        // The agent runs against an immutable prompt; interval
        // checkpoints of the pre-diff state are written concurrently
        let run = agent.run(&ctx, &initial_prompt);
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => return result,
                Some(iteration) = rx.recv() => {
                    if ckpt.should_checkpoint(CheckpointTrigger::Iteration, iteration) {
                        if let Some(index) = ckpt.write(state).await {
                            self.emitter.checkpoint(index).await;
                        }
                    }
                }
            }
        }
    }

    // === State application ===

    async fn apply_diff(&self, state: &mut AuditState, task: &mut Task, diff: StateDiff) {
        for (lang, fraction) in diff.tech_stack {
            state.tech_stack.insert(lang, fraction);
        }
        for entry in diff.entry_points {
            if !state.entry_points.iter().any(|e| e.path == entry.path) {
                state.entry_points.push(entry);
            }
        }
        for path in diff.high_risk_paths {
            if !state.high_risk_paths.contains(&path) {
                state.high_risk_paths.push(path);
            }
        }
        if diff.dependency_summary.is_some() {
            state.dependency_summary = diff.dependency_summary;
        }
        if diff.summary.is_some() {
            state.summary = diff.summary;
        }
        for message in diff.messages {
            state.push_message(message, self.config.resource.max_context_messages);
        }

        self.commit_findings(state, task, diff.findings).await;
    }

    /// Commit findings as they are confirmed: dedup by fingerprint,
    /// enforce the total cap, persist, and emit events.
    async fn commit_findings(&self, state: &mut AuditState, task: &mut Task, findings: Vec<crate::domain::Finding>) {
        for mut finding in findings {
            finding.task_id = task.id.clone();
            if finding.fingerprint.is_empty() {
                finding.fingerprint = fingerprint(&finding);
            }

            let existing = state
                .open_findings
                .iter_mut()
                .chain(state.verified_findings.iter_mut())
                .chain(state.false_positives.iter_mut())
                .find(|f| f.fingerprint == finding.fingerprint);

            if let Some(existing) = existing {
                merge_findings(existing, finding);
                let merged = existing.clone();
                self.emitter
                    .finding_updated(&merged.id, merged.verification_status.as_str())
                    .await;
                if let Err(e) = self.deps.findings.upsert_by_fingerprint(&merged).await {
                    warn!(error = %e, "Failed to persist merged finding");
                }
                continue;
            }

            if state.finding_count() >= self.config.resource.max_total_findings {
                debug!(cap = self.config.resource.max_total_findings, "Total finding cap reached");
                break;
            }

            self.emitter
                .finding_new(&finding.id, &finding.title, finding.severity.as_str())
                .await;
            task.finding_counts.record(finding.severity);
            if let Err(e) = self.deps.findings.upsert_by_fingerprint(&finding).await {
                warn!(error = %e, "Failed to persist finding");
            }
            state.open_findings.push(finding);
        }
    }

    // === Finishers ===

    async fn finish_failed(&self, mut task: Task, kind: &str, message: impl Into<String>) -> Task {
        let message = message.into();
        warn!(task_id = %task.id, kind, %message, "Audit failed");
        self.emitter.task_error(kind, message).await;
        if task.status == TaskStatus::Pending {
            let _ = task.transition(TaskStatus::Running);
        }
        let _ = task.transition(TaskStatus::Failed);
        self.save_task(&task).await;
        task
    }

    async fn finish_cancelled(&self, mut task: Task) -> Task {
        info!(task_id = %task.id, "Audit cancelled");
        self.emitter.task_error("Cancelled", "Task cancelled").await;
        let _ = task.transition(TaskStatus::Cancelled);
        self.save_task(&task).await;
        task
    }

    // === Helpers ===

    /// Tokens left of the task's cumulative budget
    fn remaining_token_budget(&self, task: &Task) -> u64 {
        self.config
            .agent
            .token_budget_per_task
            .saturating_sub(task.token_usage.total())
    }

    fn tool_ctx(&self, agent: &str, _phase: Phase, task_id: &str) -> ToolContext {
        ToolContext::new(self.project_root.clone(), task_id)
            .with_agent(agent)
            .with_security(self.config.security.clone())
            .with_resource(self.config.resource.clone())
            .with_cancel(self.cancel.clone())
    }

    async fn write_checkpoint(&self, ckpt: &mut CheckpointManager, state: &mut AuditState) {
        state.event_seq = self.emitter.bus().last_sequence().await;
        if let Some(index) = ckpt.write(state).await {
            self.emitter.checkpoint(index).await;
        }
    }

    async fn save_task(&self, task: &Task) {
        if let Err(e) = Box::pin(self.deps.tasks.save(task)).await {
            warn!(task_id = %task.id, error = %e, "Failed to persist task");
        }
    }

    fn config_digest(&self) -> String {
        let serialized = serde_json::to_vec(&self.config).unwrap_or_default();
        hex::encode(Sha256::digest(&serialized))[..12].to_string()
    }
}

fn recon_tools() -> Vec<String> {
    ["list_files", "read_file", "search_code", "think", "finish"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn analysis_tools() -> Vec<String> {
    [
        "list_files",
        "read_file",
        "search_code",
        "pattern_match",
        "dataflow_analysis",
        "semgrep_scan",
        "bandit_scan",
        "gitleaks_scan",
        "kunlun_scan",
        "npm_audit",
        "safety_check",
        "osv_scanner",
        "think",
        "reflect",
        "finish",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn verification_tools() -> Vec<String> {
    ["read_file", "sandbox_execute", "validate_vulnerability", "think", "finish"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn ms_since(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
