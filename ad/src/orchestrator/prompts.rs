//! Phase prompts
//!
//! Rendered with plain string substitution; state context is injected
//! into the initial user message, not the system prompt, so completion
//! caching stays effective across tasks.

use crate::domain::AuditState;

pub const RECON_SYSTEM: &str = "You are a reconnaissance agent performing a security audit. \
     Map the repository: identify the technology stack, application entry points, high-risk \
     areas (auth, input handling, file access, query construction), and a short dependency \
     summary. Use list_files, read_file, and search_code. When done, call finish with \
     tech_stack, entry_points, high_risk_paths, dependency_summary, and any findings you \
     noticed in passing.";

pub const ANALYSIS_SYSTEM: &str = "You are a vulnerability analysis agent. Examine the assigned \
     area for injection flaws, secrets, unsafe deserialization, weak cryptography, and access \
     control problems. Prefer scanner tools (semgrep_scan, pattern_match, dataflow_analysis) to \
     cover ground, then read the flagged code to confirm context. Report each suspicion as a \
     finding record with exact file and line range. Call finish with the findings list when the \
     area is covered.";

pub const VERIFICATION_SYSTEM: &str = "You are a verification agent. For each open finding, read \
     the code, optionally gather runtime evidence with sandbox_execute, and judge it with \
     validate_vulnerability. Call finish with verdicts as [fingerprint, status] pairs where \
     status is confirmed, rejected, or needs-review. Set continue_analysis to true only if \
     rejected findings suggest the analysis missed the real issue nearby.";

/// Initial user message for the recon agent
pub fn recon_prompt(state: &AuditState) -> String {
    format!(
        "Audit target: {}\n\nBegin reconnaissance. The project has not been mapped yet.",
        state.project_root.display()
    )
}

/// Initial user message for one analysis agent
pub fn analysis_prompt(state: &AuditState, area: &str) -> String {
    let stack = if state.tech_stack.is_empty() {
        "unknown".to_string()
    } else {
        state
            .tech_stack
            .iter()
            .map(|(lang, fraction)| format!("{} ({:.0}%)", lang, fraction * 100.0))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let entry_points = if state.entry_points.is_empty() {
        "none recorded".to_string()
    } else {
        state
            .entry_points
            .iter()
            .map(|e| format!("{} [{}]", e.path, e.kind))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "Analysis area: {}\nTech stack: {}\nEntry points: {}\n\nAnalyze this area for vulnerabilities.",
        area, stack, entry_points
    )
}

/// Initial user message for the verification agent
pub fn verification_prompt(state: &AuditState) -> String {
    let mut listing = String::new();
    for finding in &state.open_findings {
        listing.push_str(&format!(
            "- {} | {} | {} | {}:{}-{}\n",
            finding.fingerprint,
            finding.vuln_type,
            finding.title,
            finding.location.file_path,
            finding.location.line_start,
            finding.location.line_end,
        ));
    }

    format!(
        "Open findings to verify ({}):\n{}\nVerify each and return verdicts keyed by fingerprint.",
        state.open_findings.len(),
        listing
    )
}
