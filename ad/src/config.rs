//! Configuration types and loading
//!
//! A process-wide immutable snapshot assembled at startup from a YAML
//! file plus `AGENT_*` environment overrides, then merged with per-task
//! overrides at pickup time. The snapshot is passed by value to every
//! downstream component; nothing below this module reads the
//! environment.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::Phase;

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub agent: AgentLimits,
    pub tool: ToolConfig,
    pub circuit: CircuitConfig,
    pub resource: ResourceConfig,
    pub checkpoint: CheckpointConfig,
    pub event: EventConfig,
    pub security: SecurityConfig,
    pub fallback: FallbackConfig,
}

impl Config {
    /// Load configuration with fallback chain: explicit path →
    /// `.auditdaemon.yml` → `~/.config/auditdaemon/auditdaemon.yml` →
    /// defaults. Environment overrides are applied last.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".auditdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("auditdaemon").join("auditdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply `AGENT_*` environment overrides. Unknown keys are ignored;
    /// unparseable values are logged and skipped.
    pub fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("AGENT_") else { continue };
            if !self.apply_override(name, &value) {
                tracing::debug!(key = %key, "Unrecognized or unparseable config override");
            }
        }
    }

    fn apply_override(&mut self, name: &str, value: &str) -> bool {
        fn set<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
            match value.parse() {
                Ok(v) => {
                    *slot = v;
                    true
                }
                Err(_) => false,
            }
        }

        match name {
            "LLM_MAX_RETRIES" => set(&mut self.llm.max_retries, value),
            "LLM_RETRY_BASE_DELAY_MS" => set(&mut self.llm.retry_base_delay_ms, value),
            "LLM_RETRY_MAX_DELAY_MS" => set(&mut self.llm.retry_max_delay_ms, value),
            "LLM_TIMEOUT_SECONDS" => set(&mut self.llm.timeout_seconds, value),
            "LLM_STREAM_ENABLED" => set(&mut self.llm.stream_enabled, value),
            "LLM_RATE_PER_MINUTE" => set(&mut self.llm.rate_per_minute, value),
            "LLM_MODEL" => set(&mut self.llm.model, value),
            "LLM_PROVIDER" => set(&mut self.llm.provider, value),
            "ORCHESTRATOR_MAX_ITERATIONS" => set(&mut self.agent.orchestrator_max_iterations, value),
            "RECON_MAX_ITERATIONS" => set(&mut self.agent.recon_max_iterations, value),
            "ANALYSIS_MAX_ITERATIONS" => set(&mut self.agent.analysis_max_iterations, value),
            "VERIFICATION_MAX_ITERATIONS" => set(&mut self.agent.verification_max_iterations, value),
            "ORCHESTRATOR_TIMEOUT_SECONDS" => set(&mut self.agent.orchestrator_timeout_seconds, value),
            "SUB_AGENT_TIMEOUT_SECONDS" => set(&mut self.agent.sub_agent_timeout_seconds, value),
            "TOKEN_BUDGET_PER_TASK" => set(&mut self.agent.token_budget_per_task, value),
            "TOOL_TIMEOUT_SECONDS" => set(&mut self.tool.timeout_seconds, value),
            "TOOL_MAX_RETRIES" => set(&mut self.tool.max_retries, value),
            "CIRCUIT_FAILURE_THRESHOLD" => set(&mut self.circuit.failure_threshold, value),
            "CIRCUIT_RECOVERY_TIMEOUT_SECONDS" => set(&mut self.circuit.recovery_timeout_seconds, value),
            "CIRCUIT_HALF_OPEN_MAX_CALLS" => set(&mut self.circuit.half_open_max_calls, value),
            "MAX_FILE_SIZE_BYTES" => set(&mut self.resource.max_file_size_bytes, value),
            "MAX_FILES_PER_SCAN" => set(&mut self.resource.max_files_per_scan, value),
            "MAX_FINDINGS_PER_AGENT" => set(&mut self.resource.max_findings_per_agent, value),
            "MAX_TOTAL_FINDINGS" => set(&mut self.resource.max_total_findings, value),
            "MAX_CONTEXT_MESSAGES" => set(&mut self.resource.max_context_messages, value),
            "MAX_TOOL_OUTPUT_LENGTH" => set(&mut self.resource.max_tool_output_length, value),
            "CHECKPOINT_ENABLED" => set(&mut self.checkpoint.enabled, value),
            "CHECKPOINT_INTERVAL_ITERATIONS" => set(&mut self.checkpoint.interval_iterations, value),
            "CHECKPOINT_ON_PHASE_COMPLETE" => set(&mut self.checkpoint.on_phase_complete, value),
            "CHECKPOINT_ON_TOOL_COMPLETE" => set(&mut self.checkpoint.on_tool_complete, value),
            "MAX_CHECKPOINTS_PER_TASK" => set(&mut self.checkpoint.max_per_task, value),
            "EVENT_QUEUE_MAX_SIZE" => set(&mut self.event.queue_max_size, value),
            "EVENT_BATCH_SIZE" => set(&mut self.event.batch_size, value),
            "SSE_HEARTBEAT_INTERVAL_SECONDS" => set(&mut self.event.sse_heartbeat_interval_seconds, value),
            "MAX_PATH_DEPTH" => set(&mut self.security.max_path_depth, value),
            "FALLBACK_ENABLED" => set(&mut self.fallback.enabled, value),
            "CONTINUE_ON_TOOL_FAILURE" => set(&mut self.fallback.continue_on_tool_failure, value),
            "CONTINUE_ON_PARTIAL_RESULTS" => set(&mut self.fallback.continue_on_partial_results, value),
            _ => false,
        }
    }

    /// Produce the per-task snapshot: this config deep-merged with the
    /// task's JSON overrides.
    pub fn snapshot_for_task(&self, overrides: &serde_json::Value) -> Result<Config> {
        if overrides.is_null() {
            return Ok(self.clone());
        }
        let mut base = serde_json::to_value(self).context("Failed to serialize config")?;
        deep_merge(&mut base, overrides);
        serde_json::from_value(base).context("Invalid per-task config overrides")
    }
}

fn deep_merge(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                deep_merge(base_map.entry(key.clone()).or_insert(serde_json::Value::Null), value);
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// LLM provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub timeout_seconds: u64,
    pub stream_enabled: bool,
    pub max_concurrent: usize,
    pub rate_per_minute: u32,
    pub cache_ttl_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            temperature: 0.1,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            timeout_seconds: 120,
            stream_enabled: true,
            max_concurrent: 4,
            rate_per_minute: 60,
            cache_ttl_seconds: 3_600,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Per-phase iteration and wall-clock budgets, plus the cumulative
/// per-task token budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentLimits {
    pub orchestrator_max_iterations: u32,
    pub recon_max_iterations: u32,
    pub analysis_max_iterations: u32,
    pub verification_max_iterations: u32,
    pub orchestrator_timeout_seconds: u64,
    pub sub_agent_timeout_seconds: u64,
    /// Cumulative LLM token limit across the whole task; sub-agents
    /// get whatever remains
    pub token_budget_per_task: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            orchestrator_max_iterations: 20,
            recon_max_iterations: 15,
            analysis_max_iterations: 30,
            verification_max_iterations: 15,
            orchestrator_timeout_seconds: 1_800,
            sub_agent_timeout_seconds: 600,
            token_budget_per_task: 100_000,
        }
    }
}

impl AgentLimits {
    pub fn max_iterations_for(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Recon => self.recon_max_iterations,
            Phase::Analysis => self.analysis_max_iterations,
            Phase::Verification => self.verification_max_iterations,
            _ => self.orchestrator_max_iterations,
        }
    }

    pub fn timeout_for(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Recon | Phase::Analysis | Phase::Verification => {
                Duration::from_secs(self.sub_agent_timeout_seconds)
            }
            _ => Duration::from_secs(self.orchestrator_timeout_seconds),
        }
    }
}

/// Per-tool override block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolOverride {
    pub enabled: Option<bool>,
    pub timeout_seconds: Option<u64>,
    pub rate_per_second: Option<f64>,
    pub burst: Option<u32>,
    pub fallback_tool: Option<String>,
    pub max_retries: Option<u32>,
}

/// Tool execution defaults plus per-tool overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    /// Default rate applied to tools that declare themselves external
    pub external_rate_per_second: f64,
    pub external_burst: u32,
    pub overrides: BTreeMap<String, ToolOverride>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            max_retries: 2,
            external_rate_per_second: 0.2,
            external_burst: 3,
            overrides: BTreeMap::new(),
        }
    }
}

/// Effective settings for one tool after overrides
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub enabled: bool,
    pub timeout: Duration,
    pub rate: Option<(f64, u32)>,
    pub fallback_tool: Option<String>,
    pub max_retries: u32,
}

impl ToolConfig {
    /// Resolve settings for a tool. `external` enables the default rate
    /// limit for subprocess-backed scanners.
    pub fn settings_for(&self, name: &str, external: bool) -> ToolSettings {
        let ov = self.overrides.get(name);
        let rate = match ov.and_then(|o| o.rate_per_second) {
            Some(r) => Some((r, ov.and_then(|o| o.burst).unwrap_or(self.external_burst))),
            None if external => Some((self.external_rate_per_second, self.external_burst)),
            None => None,
        };
        ToolSettings {
            enabled: ov.and_then(|o| o.enabled).unwrap_or(true),
            timeout: Duration::from_secs(ov.and_then(|o| o.timeout_seconds).unwrap_or(self.timeout_seconds)),
            rate,
            fallback_tool: ov.and_then(|o| o.fallback_tool.clone()),
            max_retries: ov.and_then(|o| o.max_retries).unwrap_or(self.max_retries),
        }
    }
}

/// Circuit breaker parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: f64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 30.0,
            half_open_max_calls: 3,
        }
    }
}

impl CircuitConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_timeout_seconds)
    }
}

/// Hard resource stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResourceConfig {
    pub max_file_size_bytes: u64,
    pub max_files_per_scan: usize,
    pub max_findings_per_agent: usize,
    pub max_total_findings: usize,
    pub max_context_messages: usize,
    pub max_tool_output_length: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            max_files_per_scan: 1_000,
            max_findings_per_agent: 100,
            max_total_findings: 500,
            max_context_messages: 50,
            max_tool_output_length: 50_000,
        }
    }
}

/// Checkpoint policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub interval_iterations: u32,
    pub on_phase_complete: bool,
    pub on_tool_complete: bool,
    pub max_per_task: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_iterations: 5,
            on_phase_complete: true,
            on_tool_complete: false,
            max_per_task: 50,
        }
    }
}

/// Event bus policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EventConfig {
    pub queue_max_size: usize,
    pub batch_size: usize,
    pub sse_heartbeat_interval_seconds: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_max_size: 1_000,
            batch_size: 10,
            sse_heartbeat_interval_seconds: 30,
        }
    }
}

/// Filesystem sandbox rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SecurityConfig {
    pub allowed_file_extensions: Vec<String>,
    pub blocked_directories: Vec<String>,
    pub max_path_depth: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_file_extensions: [
                "py", "js", "ts", "jsx", "tsx", "java", "go", "rb", "php", "c", "cpp", "h", "hpp", "cs", "swift",
                "kt", "rs", "scala", "vue", "svelte", "html", "css", "scss", "sass", "less", "json", "yaml", "yml",
                "xml", "toml", "ini", "conf", "sql", "graphql", "proto", "sh", "bash", "zsh", "ps1", "md", "txt",
                "rst",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            blocked_directories: [
                "node_modules", "__pycache__", ".git", ".svn", ".hg", "venv", ".venv", "env", ".env", "virtualenv",
                "dist", "build", "target", "out", "bin", "obj", ".idea", ".vscode", ".vs", ".pytest_cache",
                ".mypy_cache", "coverage", ".coverage", "htmlcov", ".tox", ".nox",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_path_depth: 20,
        }
    }
}

/// Graceful degradation switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FallbackConfig {
    pub enabled: bool,
    pub continue_on_tool_failure: bool,
    pub continue_on_partial_results: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            continue_on_tool_failure: true,
            continue_on_partial_results: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.agent.analysis_max_iterations, 30);
        assert_eq!(config.agent.token_budget_per_task, 100_000);
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.resource.max_total_findings, 500);
        assert_eq!(config.event.queue_max_size, 1_000);
        assert!(config.security.blocked_directories.contains(&"node_modules".to_string()));
    }

    #[test]
    fn test_yaml_partial_config() {
        let yaml = r#"
llm:
  model: claude-haiku
  timeout-seconds: 30
circuit:
  failure-threshold: 2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.model, "claude-haiku");
        assert_eq!(config.llm.timeout_seconds, 30);
        assert_eq!(config.circuit.failure_threshold, 2);
        // Unspecified fields keep defaults
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.circuit.half_open_max_calls, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(
            vec![
                ("AGENT_LLM_MAX_RETRIES".to_string(), "5".to_string()),
                ("AGENT_RECON_MAX_ITERATIONS".to_string(), "7".to_string()),
                ("AGENT_TOKEN_BUDGET_PER_TASK".to_string(), "50000".to_string()),
                ("AGENT_CONTINUE_ON_TOOL_FAILURE".to_string(), "false".to_string()),
                ("AGENT_UNKNOWN_KEY".to_string(), "x".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ]
            .into_iter(),
        );

        assert_eq!(config.llm.max_retries, 5);
        assert_eq!(config.agent.recon_max_iterations, 7);
        assert_eq!(config.agent.token_budget_per_task, 50_000);
        assert!(!config.fallback.continue_on_tool_failure);
    }

    #[test]
    fn test_env_override_bad_value_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(vec![("AGENT_LLM_MAX_RETRIES".to_string(), "lots".to_string())].into_iter());
        assert_eq!(config.llm.max_retries, 3);
    }

    #[test]
    fn test_snapshot_for_task_merges_overrides() {
        let config = Config::default();
        let overrides = serde_json::json!({
            "resource": { "max-findings-per-agent": 10 },
            "agent": { "token-budget-per-task": 25_000 },
            "llm": { "model": "claude-opus-4" }
        });

        let snapshot = config.snapshot_for_task(&overrides).unwrap();
        assert_eq!(snapshot.resource.max_findings_per_agent, 10);
        assert_eq!(snapshot.agent.token_budget_per_task, 25_000);
        assert_eq!(snapshot.llm.model, "claude-opus-4");
        // Untouched values preserved
        assert_eq!(snapshot.resource.max_total_findings, 500);
    }

    #[test]
    fn test_snapshot_null_overrides_is_identity() {
        let config = Config::default();
        let snapshot = config.snapshot_for_task(&serde_json::Value::Null).unwrap();
        assert_eq!(snapshot, config);
    }

    #[test]
    fn test_tool_settings_defaults_and_overrides() {
        let mut config = ToolConfig::default();
        config.overrides.insert(
            "semgrep_scan".to_string(),
            ToolOverride {
                enabled: Some(true),
                timeout_seconds: Some(120),
                fallback_tool: Some("pattern_match".to_string()),
                ..Default::default()
            },
        );

        let semgrep = config.settings_for("semgrep_scan", true);
        assert_eq!(semgrep.timeout, Duration::from_secs(120));
        assert_eq!(semgrep.fallback_tool.as_deref(), Some("pattern_match"));
        // External default rate applies when no override rate given
        assert_eq!(semgrep.rate, Some((0.2, 3)));

        let read = config.settings_for("read_file", false);
        assert!(read.enabled);
        assert_eq!(read.rate, None);
        assert_eq!(read.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_disabled_tool_override() {
        let mut config = ToolConfig::default();
        config.overrides.insert(
            "bandit_scan".to_string(),
            ToolOverride {
                enabled: Some(false),
                ..Default::default()
            },
        );
        assert!(!config.settings_for("bandit_scan", true).enabled);
    }

    #[test]
    fn test_phase_limits() {
        let limits = AgentLimits::default();
        assert_eq!(limits.max_iterations_for(Phase::Analysis), 30);
        assert_eq!(limits.max_iterations_for(Phase::Init), 20);
        assert_eq!(limits.timeout_for(Phase::Recon), Duration::from_secs(600));
        assert_eq!(limits.timeout_for(Phase::Report), Duration::from_secs(1_800));
    }
}
