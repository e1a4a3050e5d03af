//! Report phase: a pure function over AuditState
//!
//! No LLM involvement. Produces the markdown summary plus the overall
//! and security scores.

use crate::domain::{AuditState, Finding, SeverityCounts};
use crate::findings::{score_for, severity_counts};

/// Summary, overall score, security score
pub fn build_report(state: &AuditState) -> (String, u8, u8) {
    let reported: Vec<&Finding> = state.open_findings.iter().chain(state.verified_findings.iter()).collect();

    let counts = severity_counts(reported.iter().copied());
    let overall_score = score_for(&counts);
    let security_score = score_for(&severity_counts(state.verified_findings.iter()));

    let summary = render_markdown(state, &counts, overall_score, security_score, &reported);
    (summary, overall_score, security_score)
}

fn render_markdown(
    state: &AuditState,
    counts: &SeverityCounts,
    overall_score: u8,
    security_score: u8,
    reported: &[&Finding],
) -> String {
    let mut out = String::new();
    out.push_str("# Audit Summary\n\n");
    out.push_str(&format!("Overall score: **{}** / 100\n", overall_score));
    out.push_str(&format!("Security score: **{}** / 100\n\n", security_score));

    if !state.tech_stack.is_empty() {
        let stack = state
            .tech_stack
            .iter()
            .map(|(lang, fraction)| format!("{} ({:.0}%)", lang, fraction * 100.0))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("Tech stack: {}\n\n", stack));
    }

    out.push_str("## Findings\n\n");
    out.push_str(&format!(
        "| Critical | High | Medium | Low | Info |\n|---|---|---|---|---|\n| {} | {} | {} | {} | {} |\n\n",
        counts.critical, counts.high, counts.medium, counts.low, counts.info
    ));
    out.push_str(&format!(
        "Verified: {} · Needs review or open: {} · Rejected as false positives: {}\n\n",
        state.verified_findings.len(),
        state.open_findings.len(),
        state.false_positives.len()
    ));

    // Top findings, most severe first
    let mut top: Vec<&Finding> = reported.to_vec();
    top.sort_by(|a, b| b.severity.cmp(&a.severity));
    for finding in top.iter().take(10) {
        out.push_str(&format!(
            "- **[{}]** {} — `{}:{}-{}` ({})\n",
            finding.severity.as_str(),
            finding.title,
            finding.location.file_path,
            finding.location.line_start,
            finding.location.line_end,
            finding.verification_status.as_str(),
        ));
    }

    out
}
