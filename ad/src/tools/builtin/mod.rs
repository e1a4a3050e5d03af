//! Built-in tool implementations
//!
//! Filesystem tools are sandboxed to the project root. Scanner tools
//! wrap external processes and normalize their JSON into partial
//! finding records. LLM tools call through the provider pool.

mod dataflow;
mod list_files;
mod llm_tools;
mod orchestration;
mod pattern_match;
mod read_file;
mod scanners;
mod search_code;
mod verify;

use std::sync::Arc;

pub use dataflow::DataflowTool;
pub use list_files::ListFilesTool;
pub use llm_tools::{ChatTool, ReflectTool, ThinkTool};
pub use orchestration::{DispatchAgentTool, FinishTool};
pub use pattern_match::PatternMatchTool;
pub use read_file::ReadFileTool;
pub use scanners::{ScannerKind, ScannerTool};
pub use search_code::SearchCodeTool;
pub use verify::{SandboxExecuteTool, ValidateVulnerabilityTool};

use super::Tool;

/// The full standard registry, populated at startup
pub fn standard_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        // Filesystem
        Arc::new(ListFilesTool),
        Arc::new(ReadFileTool),
        Arc::new(SearchCodeTool),
        // Pattern / static analysis
        Arc::new(PatternMatchTool),
        Arc::new(DataflowTool),
        Arc::new(ScannerTool::new(ScannerKind::Semgrep)),
        Arc::new(ScannerTool::new(ScannerKind::Bandit)),
        Arc::new(ScannerTool::new(ScannerKind::Gitleaks)),
        Arc::new(ScannerTool::new(ScannerKind::Kunlun)),
        Arc::new(ScannerTool::new(ScannerKind::NpmAudit)),
        Arc::new(ScannerTool::new(ScannerKind::Safety)),
        Arc::new(ScannerTool::new(ScannerKind::Osv)),
        // LLM
        Arc::new(ThinkTool),
        Arc::new(ReflectTool),
        Arc::new(ChatTool),
        // Orchestration
        Arc::new(DispatchAgentTool),
        Arc::new(FinishTool),
        // Verification
        Arc::new(SandboxExecuteTool),
        Arc::new(ValidateVulnerabilityTool),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_names() {
        let tools = standard_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();

        for expected in [
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
            "chat",
            "dispatch_agent",
            "finish",
            "sandbox_execute",
            "validate_vulnerability",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
    }

    #[test]
    fn test_scanners_are_external() {
        for tool in standard_tools() {
            let external = tool.external();
            let name = tool.name();
            if name.ends_with("_scan") || name == "npm_audit" || name == "safety_check" || name == "osv_scanner" {
                assert!(external, "{} should be external", name);
            }
        }
    }
}
