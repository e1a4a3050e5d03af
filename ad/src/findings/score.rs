//! Score derivation from finding sets
//!
//! Overall score: 100 − (10·critical + 5·high + 2·medium + 1·low),
//! clamped to 0..=100. Info findings never deduct.

use crate::domain::{Finding, Severity, SeverityCounts};

/// Count findings by severity
pub fn severity_counts<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> SeverityCounts {
    let mut counts = SeverityCounts::default();
    for finding in findings {
        counts.record(finding.severity);
    }
    counts
}

/// Score for a set of severity counts
pub fn score_for(counts: &SeverityCounts) -> u8 {
    let deduction = u64::from(counts.critical) * 10
        + u64::from(counts.high) * 5
        + u64::from(counts.medium) * 2
        + u64::from(counts.low);
    100u64.saturating_sub(deduction).min(100) as u8
}

/// Convenience: score straight from findings
pub fn score_of<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> u8 {
    score_for(&severity_counts(findings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Location;

    fn finding(severity: Severity) -> Finding {
        Finding::new("t1", "x", severity, "f", Location::default())
    }

    #[test]
    fn test_empty_set_is_perfect() {
        assert_eq!(score_of(std::iter::empty::<&Finding>()), 100);
        assert_eq!(score_for(&SeverityCounts::default()), 100);
    }

    #[test]
    fn test_deduction_weights() {
        let findings = vec![
            finding(Severity::Critical), // -10
            finding(Severity::High),     // -5
            finding(Severity::Medium),   // -2
            finding(Severity::Low),      // -1
            finding(Severity::Info),     // -0
        ];
        assert_eq!(score_of(findings.iter()), 82);
    }

    #[test]
    fn test_score_clamps_at_zero() {
        let findings: Vec<Finding> = (0..20).map(|_| finding(Severity::Critical)).collect();
        assert_eq!(score_of(findings.iter()), 0);
    }

    #[test]
    fn test_single_high_finding() {
        let findings = vec![finding(Severity::High)];
        let score = score_of(findings.iter());
        assert_eq!(score, 95);
        assert!(score < 100);
    }

    #[test]
    fn test_counts() {
        let findings = vec![finding(Severity::High), finding(Severity::High), finding(Severity::Info)];
        let counts = severity_counts(findings.iter());
        assert_eq!(counts.high, 2);
        assert_eq!(counts.info, 1);
        assert_eq!(counts.critical, 0);
    }
}
