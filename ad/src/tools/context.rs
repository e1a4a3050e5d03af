//! ToolContext: per-invocation execution context with the filesystem
//! sandbox

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::config::{ResourceConfig, SecurityConfig};
use crate::llm::pool::LlmPool;

use super::error::ToolError;

/// Execution context for tools, scoped to one task's project root.
///
/// Sandbox rules: no `..` after normalization, no escape of the project
/// root (symlinks included), no blocked directory components, no
/// disallowed extensions for reads, bounded path depth.
#[derive(Clone)]
pub struct ToolContext {
    pub project_root: PathBuf,
    pub task_id: String,
    pub agent: String,
    pub security: SecurityConfig,
    pub resource: ResourceConfig,
    pub cancel: CancelToken,
    pub deadline: Instant,
    llm: Option<Arc<LlmPool>>,
}

impl ToolContext {
    pub fn new(project_root: PathBuf, task_id: impl Into<String>) -> Self {
        Self {
            project_root,
            task_id: task_id.into(),
            agent: "agent".to_string(),
            security: SecurityConfig::default(),
            resource: ResourceConfig::default(),
            cancel: CancelToken::new(),
            deadline: Instant::now() + Duration::from_secs(600),
            llm: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    pub fn with_resource(mut self, resource: ResourceConfig) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_llm(mut self, llm: Arc<LlmPool>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// LLM pool for think/reflect/chat tools
    pub fn llm(&self) -> Result<&Arc<LlmPool>, ToolError> {
        self.llm
            .as_ref()
            .ok_or_else(|| ToolError::InvalidArgument("No LLM pool available in this context".to_string()))
    }

    /// Validate a path for listing/searching. Extension rules are not
    /// applied (directories and any file may be named).
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        self.validate(path, false)
    }

    /// Validate a path for reading file content; enforces the
    /// extension allowlist on top of the common rules.
    pub fn validate_read_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        self.validate(path, true)
    }

    fn validate(&self, path: &Path, check_extension: bool) -> Result<PathBuf, ToolError> {
        let violation = |reason: &str| ToolError::SandboxViolation {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        // Strip an absolute prefix only if it is the project root itself
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.project_root)
                .map_err(|_| violation("outside project root"))?
                .to_path_buf()
        } else {
            path.to_path_buf()
        };

        let mut depth = 0usize;
        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => return Err(violation("path contains '..'")),
                Component::Normal(name) => {
                    let name_str = name.to_string_lossy();
                    if self.security.blocked_directories.iter().any(|b| b == name_str.as_ref()) {
                        return Err(violation("blocked directory component"));
                    }
                    depth += 1;
                    normalized.push(name);
                }
                Component::RootDir | Component::Prefix(_) => return Err(violation("unexpected path prefix")),
            }
        }

        if depth > self.security.max_path_depth {
            return Err(violation("exceeds max path depth"));
        }

        if check_extension {
            let ext = normalized
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if !ext.is_empty() && !self.security.allowed_file_extensions.iter().any(|a| *a == ext) {
                return Err(violation("disallowed file extension"));
            }
        }

        let full = self.project_root.join(&normalized);

        // Symlinks must not cross the project-root boundary
        if full.exists() {
            let canonical = full.canonicalize().map_err(ToolError::Io)?;
            let canonical_root = self
                .project_root
                .canonicalize()
                .unwrap_or_else(|_| self.project_root.clone());
            if !canonical.starts_with(&canonical_root) {
                return Err(violation("resolves outside project root"));
            }
            return Ok(canonical);
        }

        Ok(full)
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("project_root", &self.project_root)
            .field("task_id", &self.task_id)
            .field("agent", &self.agent)
            .finish()
    }
}
