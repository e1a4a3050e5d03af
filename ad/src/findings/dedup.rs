//! FindingSet: fingerprint-keyed collection with merge semantics

use std::collections::HashMap;

use tracing::debug;

use crate::domain::Finding;

use super::fingerprint::fingerprint;

/// What happened to an inserted finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New fingerprint, finding stored
    Inserted,
    /// Existing fingerprint, records merged
    Merged,
    /// Rejected: the set is at its capacity
    CapReached,
}

/// Deduplicating finding collection, bounded by `max_total`.
///
/// Merge rules for identical fingerprints: severity takes the max,
/// verification status follows precedence (confirmed > needs-review >
/// new > rejected), description and snippet keep the first non-empty
/// value.
#[derive(Debug)]
pub struct FindingSet {
    by_fingerprint: HashMap<String, Finding>,
    order: Vec<String>,
    max_total: usize,
}

impl FindingSet {
    pub fn new(max_total: usize) -> Self {
        Self {
            by_fingerprint: HashMap::new(),
            order: Vec::new(),
            max_total,
        }
    }

    /// Insert a finding, assigning its fingerprint if unset
    pub fn insert(&mut self, mut finding: Finding) -> InsertOutcome {
        if finding.fingerprint.is_empty() {
            finding.fingerprint = fingerprint(&finding);
        }

        if let Some(existing) = self.by_fingerprint.get_mut(&finding.fingerprint) {
            merge_findings(existing, finding);
            return InsertOutcome::Merged;
        }

        if self.by_fingerprint.len() >= self.max_total {
            debug!(cap = self.max_total, "Finding cap reached, dropping");
            return InsertOutcome::CapReached;
        }

        self.order.push(finding.fingerprint.clone());
        self.by_fingerprint.insert(finding.fingerprint.clone(), finding);
        InsertOutcome::Inserted
    }

    pub fn get(&self, fingerprint: &str) -> Option<&Finding> {
        self.by_fingerprint.get(fingerprint)
    }

    pub fn get_mut(&mut self, fingerprint: &str) -> Option<&mut Finding> {
        self.by_fingerprint.get_mut(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }

    /// Findings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.order.iter().filter_map(|fp| self.by_fingerprint.get(fp))
    }

    /// Consume into a vector in insertion order
    pub fn into_vec(mut self) -> Vec<Finding> {
        self.order
            .iter()
            .filter_map(|fp| self.by_fingerprint.remove(fp))
            .collect()
    }
}

/// Merge a duplicate submission into the stored finding: max severity,
/// verification precedence, first non-empty text fields
pub fn merge_findings(existing: &mut Finding, incoming: Finding) {
    if incoming.severity > existing.severity {
        existing.severity = incoming.severity;
    }
    if incoming.verification_status.precedence() > existing.verification_status.precedence() {
        existing.verification_status = incoming.verification_status;
    }
    if existing.description.is_empty() && !incoming.description.is_empty() {
        existing.description = incoming.description;
    }
    if existing.snippet.is_empty() && !incoming.snippet.is_empty() {
        existing.snippet = incoming.snippet;
    }
    if existing.dataflow.is_none() {
        existing.dataflow = incoming.dataflow;
    }
    if existing.poc.is_none() {
        existing.poc = incoming.poc;
    }
    if existing.fix_suggestion.is_none() {
        existing.fix_suggestion = incoming.fix_suggestion;
    }
    for tag in incoming.tags {
        if !existing.tags.contains(&tag) {
            existing.tags.push(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, Severity, VerificationStatus};

    fn finding(path: &str, line: u32, vuln_type: &str, severity: Severity) -> Finding {
        Finding::new(
            "t1",
            vuln_type,
            severity,
            format!("{} at {}", vuln_type, path),
            Location {
                file_path: path.to_string(),
                line_start: line,
                line_end: line,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_insert_assigns_fingerprint() {
        let mut set = FindingSet::new(10);
        let outcome = set.insert(finding("main.py", 10, "sql_injection", Severity::High));

        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(set.len(), 1);
        assert!(!set.iter().next().unwrap().fingerprint.is_empty());
    }

    #[test]
    fn test_duplicate_merges_to_max_severity() {
        let mut set = FindingSet::new(10);
        set.insert(finding("main.py", 10, "sql_injection", Severity::Medium));
        let outcome = set.insert(finding("main.py", 10, "sql_injection", Severity::Critical));

        assert_eq!(outcome, InsertOutcome::Merged);
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().severity, Severity::Critical);
    }

    #[test]
    fn test_merge_severity_never_lowers() {
        let mut set = FindingSet::new(10);
        set.insert(finding("main.py", 10, "sql_injection", Severity::Critical));
        set.insert(finding("main.py", 10, "sql_injection", Severity::Low));

        assert_eq!(set.iter().next().unwrap().severity, Severity::Critical);
    }

    #[test]
    fn test_merge_verification_precedence() {
        let mut set = FindingSet::new(10);

        let mut rejected = finding("a.py", 1, "xss", Severity::Low);
        rejected.verification_status = VerificationStatus::Rejected;
        set.insert(rejected);

        let mut confirmed = finding("a.py", 1, "xss", Severity::Low);
        confirmed.verification_status = VerificationStatus::Confirmed;
        set.insert(confirmed);

        assert_eq!(
            set.iter().next().unwrap().verification_status,
            VerificationStatus::Confirmed
        );

        // A later lower-precedence status does not downgrade
        let mut renew = finding("a.py", 1, "xss", Severity::Low);
        renew.verification_status = VerificationStatus::New;
        set.insert(renew);
        assert_eq!(
            set.iter().next().unwrap().verification_status,
            VerificationStatus::Confirmed
        );
    }

    #[test]
    fn test_merge_keeps_first_nonempty_description() {
        let mut set = FindingSet::new(10);

        let first = finding("a.py", 1, "xss", Severity::Low).with_description("original description");
        set.insert(first);

        let second = finding("a.py", 1, "xss", Severity::Low).with_description("later description");
        set.insert(second);

        assert_eq!(set.iter().next().unwrap().description, "original description");
    }

    #[test]
    fn test_merge_fills_empty_description() {
        let mut set = FindingSet::new(10);
        set.insert(finding("a.py", 1, "xss", Severity::Low));
        set.insert(finding("a.py", 1, "xss", Severity::Low).with_description("filled in"));

        assert_eq!(set.iter().next().unwrap().description, "filled in");
    }

    #[test]
    fn test_cap_enforced() {
        let mut set = FindingSet::new(2);
        assert_eq!(set.insert(finding("a.py", 1, "xss", Severity::Low)), InsertOutcome::Inserted);
        assert_eq!(set.insert(finding("b.py", 1, "xss", Severity::Low)), InsertOutcome::Inserted);
        assert_eq!(
            set.insert(finding("c.py", 1, "xss", Severity::Low)),
            InsertOutcome::CapReached
        );

        // Merging into an existing entry still works at the cap
        assert_eq!(
            set.insert(finding("a.py", 1, "xss", Severity::High)),
            InsertOutcome::Merged
        );
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_zero_cap_rejects_everything() {
        let mut set = FindingSet::new(0);
        assert_eq!(
            set.insert(finding("a.py", 1, "xss", Severity::Low)),
            InsertOutcome::CapReached
        );
        assert!(set.is_empty());
    }

    #[test]
    fn test_into_vec_preserves_insertion_order() {
        let mut set = FindingSet::new(10);
        set.insert(finding("a.py", 1, "xss", Severity::Low));
        set.insert(finding("b.py", 2, "sql_injection", Severity::High));

        let list = set.into_vec();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].location.file_path, "a.py");
        assert_eq!(list[1].location.file_path, "b.py");
    }

    #[test]
    fn test_fingerprints_unique_in_final_set() {
        let mut set = FindingSet::new(100);
        for i in 0..20 {
            set.insert(finding("a.py", i % 5, "xss", Severity::Low));
        }

        let list = set.into_vec();
        let mut fps: Vec<&str> = list.iter().map(|f| f.fingerprint.as_str()).collect();
        fps.sort();
        let before = fps.len();
        fps.dedup();
        assert_eq!(before, fps.len());
        assert_eq!(list.len(), 5);
    }
}
