//! End-to-end scenarios driven through the public engine API with a
//! scripted, request-aware LLM client

use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

use auditdaemon::config::Config;
use auditdaemon::domain::TaskStatus;
use auditdaemon::engine::{Engine, EngineStores};
use auditdaemon::llm::{
    CompletionRequest, CompletionResponse, LlmClient, LlmError, StopReason, StreamChunk, TokenUsage, ToolCall,
};
use auditdaemon::store::{FindingStore, MemoryStores};

type Behavior = Box<dyn FnMut(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send>;

/// Owns `id` in its own stack frame so the borrow passed into
/// `run_task` isn't self-referential within a spawned async block.
async fn run_task_owned(
    engine: Arc<Engine>,
    id: String,
) -> Result<auditdaemon::domain::Task, auditdaemon::engine::EngineError> {
    engine.run_task(&id).await
}

/// LLM stand-in that inspects each request and answers per phase
struct ScriptedClient {
    behavior: Mutex<Behavior>,
}

impl ScriptedClient {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut behavior = self.behavior.lock().expect("behavior lock");
        (*behavior)(&request)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        _chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        self.complete(request).await
    }
}

fn finish(payload: serde_json::Value) -> Result<CompletionResponse, LlmError> {
    Ok(CompletionResponse {
        content: Some("done".to_string()),
        tool_calls: vec![ToolCall {
            id: "finish-call".to_string(),
            name: "finish".to_string(),
            input: payload,
        }],
        stop_reason: StopReason::ToolUse,
        usage: TokenUsage {
            input_tokens: 30,
            output_tokens: 10,
            ..Default::default()
        },
    })
}

fn call_tool(name: &str, input: serde_json::Value) -> Result<CompletionResponse, LlmError> {
    Ok(CompletionResponse {
        content: Some(format!("running {}", name)),
        tool_calls: vec![ToolCall {
            id: format!("call-{}", name),
            name: name.to_string(),
            input,
        }],
        stop_reason: StopReason::ToolUse,
        usage: TokenUsage {
            input_tokens: 30,
            output_tokens: 10,
            ..Default::default()
        },
    })
}

fn last_user_text(request: &CompletionRequest) -> String {
    use auditdaemon::llm::{ContentBlock, MessageContent};
    request
        .messages
        .iter()
        .rev()
        .find_map(|m| match &m.content {
            MessageContent::Text(t) => Some(t.clone()),
            MessageContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::ToolResult { content, .. } => Some(content.clone()),
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            }),
        })
        .unwrap_or_default()
}

/// Fingerprints listed in the verification prompt, one per line
fn fingerprints_in(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter(|l| l.starts_with("- "))
        .filter_map(|l| l[2..].split(" | ").next().map(str::to_string))
        .collect()
}

fn engine_with(client: ScriptedClient) -> (Engine, MemoryStores) {
    let (stores, memory) = EngineStores::memory();
    let mut config = Config::default();
    config.llm.rate_per_minute = 60_000;
    (Engine::new(config, stores, Arc::new(client)), memory)
}

#[tokio::test]
async fn happy_path_single_sql_injection() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("main.py"),
        r#"query = "SELECT * FROM u WHERE id=" + id"#,
    )
    .unwrap();

    // Phase-aware script: recon maps, analysis scans then finishes,
    // verification confirms every listed fingerprint
    let mut analysis_calls = 0u32;
    let behavior: Behavior = Box::new(move |request| {
        if request.system_prompt.contains("reconnaissance") {
            return finish(json!({"high_risk_paths": ["."]}));
        }
        if request.system_prompt.contains("vulnerability analysis") {
            analysis_calls += 1;
            return if analysis_calls == 1 {
                call_tool("pattern_match", json!({}))
            } else {
                finish(json!({"summary": "area covered"}))
            };
        }
        // verification
        let prompt = last_user_text(request);
        let verdicts: Vec<serde_json::Value> = fingerprints_in(&prompt)
            .into_iter()
            .map(|fp| json!([fp, "confirmed"]))
            .collect();
        finish(json!({"verdicts": verdicts, "continue_analysis": false}))
    });

    let (engine, memory) = engine_with(ScriptedClient::new(behavior));
    let task = engine
        .create_task(temp.path().to_str().unwrap(), serde_json::Value::Null)
        .await
        .unwrap();

    let done = engine.run_task(&task.id).await.unwrap();

    assert_eq!(done.status, TaskStatus::Succeeded);
    assert!(done.overall_score.unwrap() < 100);

    let findings = memory.list_for_task(&task.id).await.unwrap();
    assert_eq!(findings.len(), 1);
    let finding = &findings[0];
    assert_eq!(finding.vuln_type, "sql_injection");
    assert_eq!(finding.severity, auditdaemon::Severity::High);
    assert_eq!(finding.location.file_path, "main.py");
    assert_eq!(finding.location.line_start, 1);
    assert_eq!(
        finding.verification_status,
        auditdaemon::VerificationStatus::Confirmed
    );

    // Event stream carries the expected milestones, ordered by sequence
    let events = memory.events_for(&task.id).await;
    let kinds: Vec<&str> = events.iter().map(|e| e.kind.kind_str()).collect();
    assert!(kinds.contains(&"task-start"));
    assert!(kinds.contains(&"finding-new"));
    assert!(kinds.contains(&"task-complete"));

    let phase_completes: Vec<&auditdaemon::AuditEvent> = events
        .iter()
        .filter(|e| e.kind.kind_str() == "phase-complete")
        .collect();
    let phases: Vec<String> = phase_completes
        .iter()
        .filter_map(|e| serde_json::to_value(&e.kind).ok())
        .filter_map(|v| v.get("phase").and_then(|p| p.as_str()).map(String::from))
        .collect();
    assert!(phases.contains(&"recon".to_string()));
    assert!(phases.contains(&"verification".to_string()));

    let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    let mut sorted = seqs.clone();
    sorted.sort();
    assert_eq!(seqs, sorted, "persisted events must be ordered by sequence");
    assert_eq!(seqs.first(), Some(&1));
}

#[tokio::test]
async fn cancellation_mid_phase_keeps_committed_findings() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("main.py"), "x = 1").unwrap();

    // Recon commits one finding via its finish payload; the analysis
    // call then hangs until cancellation reaches it
    let behavior: Behavior = Box::new(move |request| {
        if request.system_prompt.contains("reconnaissance") {
            return finish(json!({
                "findings": [{
                    "vuln_type": "hardcoded_secret",
                    "severity": "high",
                    "title": "Secret in config",
                    "file_path": "main.py",
                    "line_start": 1,
                    "line_end": 1,
                }],
            }));
        }
        // Analysis: pretend to be a very slow provider
        Err(LlmError::Timeout(std::time::Duration::from_secs(3_600)))
    });

    let (engine, memory) = engine_with(ScriptedClient::new(behavior));
    let engine = Arc::new(engine);
    let task = engine
        .create_task(temp.path().to_str().unwrap(), serde_json::Value::Null)
        .await
        .unwrap();

    let runner = {
        let engine = engine.clone();
        let id = task.id.clone();
        tokio::spawn(run_task_owned(engine, id))
    };

    // Let recon commit its finding, then cancel
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    engine.cancel_task(&task.id).await;

    let done = runner.await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Cancelled);

    // The committed finding survives cancellation
    let findings = memory.list_for_task(&task.id).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].vuln_type, "hardcoded_secret");

    // The stream terminates with a Cancelled task-error
    let events = memory.events_for(&task.id).await;
    let last = events.last().expect("events persisted");
    let value = serde_json::to_value(&last.kind).unwrap();
    assert_eq!(value["kind"], "task-error");
    assert_eq!(value["error_kind"], "Cancelled");
}

#[tokio::test]
async fn two_agents_reporting_same_finding_commit_once() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("main.py"),
        r#"query = "SELECT * FROM u WHERE id=" + id"#,
    )
    .unwrap();

    // Recon fans analysis out to two areas; each area's agent scans the
    // same file and reports the same injection
    let mut analysis_steps = 0u32;
    let behavior: Behavior = Box::new(move |request| {
        if request.system_prompt.contains("reconnaissance") {
            return finish(json!({"high_risk_paths": [".", "main.py"]}));
        }
        if request.system_prompt.contains("vulnerability analysis") {
            analysis_steps += 1;
            // Odd steps scan, even steps finish (two agents, two steps each)
            return if analysis_steps % 2 == 1 {
                call_tool("pattern_match", json!({}))
            } else {
                finish(json!({}))
            };
        }
        finish(json!({"verdicts": [], "continue_analysis": false}))
    });

    let (engine, memory) = engine_with(ScriptedClient::new(behavior));
    let task = engine
        .create_task(temp.path().to_str().unwrap(), serde_json::Value::Null)
        .await
        .unwrap();

    let done = engine.run_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);

    let findings = memory.list_for_task(&task.id).await.unwrap();
    assert_eq!(findings.len(), 1, "identical fingerprints must merge to one commit");
    assert_eq!(findings[0].severity, auditdaemon::Severity::High);

    let events = memory.events_for(&task.id).await;
    let news = events.iter().filter(|e| e.kind.kind_str() == "finding-new").count();
    let updates = events.iter().filter(|e| e.kind.kind_str() == "finding-updated").count();
    assert_eq!(news, 1);
    assert!(updates >= 1, "the duplicate submission surfaces as finding-updated");
}

#[tokio::test]
async fn fingerprints_unique_in_final_set() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("a.py"),
        "import pickle\nobj = pickle.loads(blob)\npassword = \"supersecret99\"\n",
    )
    .unwrap();

    let mut analysis_calls = 0u32;
    let behavior: Behavior = Box::new(move |request| {
        if request.system_prompt.contains("reconnaissance") {
            return finish(json!({}));
        }
        if request.system_prompt.contains("vulnerability analysis") {
            analysis_calls += 1;
            return if analysis_calls == 1 {
                call_tool("pattern_match", json!({}))
            } else {
                finish(json!({}))
            };
        }
        finish(json!({"verdicts": [], "continue_analysis": false}))
    });

    let (engine, memory) = engine_with(ScriptedClient::new(behavior));
    let task = engine
        .create_task(temp.path().to_str().unwrap(), serde_json::Value::Null)
        .await
        .unwrap();

    let done = engine.run_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);

    let findings = memory.list_for_task(&task.id).await.unwrap();
    assert!(findings.len() >= 2);

    let mut fingerprints: Vec<&str> = findings.iter().map(|f| f.fingerprint.as_str()).collect();
    let before = fingerprints.len();
    fingerprints.sort();
    fingerprints.dedup();
    assert_eq!(before, fingerprints.len());
}
