//! Stable finding fingerprints
//!
//! Fingerprint = lowercase hex SHA-256 over
//! `<norm_path>|<line_start>-<line_end>|<vuln_type>|<src>→<sink>`,
//! with src/sink empty when no dataflow is attached. The fingerprint is
//! the deduplication key across agents and re-runs.

use sha2::{Digest, Sha256};

use crate::domain::Finding;

/// Normalize a path for hashing: strip leading `./`, collapse
/// backslashes, trim whitespace.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Compute the canonical fingerprint for a finding
pub fn fingerprint(finding: &Finding) -> String {
    let (src, sink) = finding
        .dataflow
        .as_ref()
        .map(|d| (d.source.trim(), d.sink.trim()))
        .unwrap_or(("", ""));

    let input = format!(
        "{}|{}-{}|{}|{}→{}",
        normalize_path(&finding.location.file_path),
        finding.location.line_start,
        finding.location.line_end,
        finding.vuln_type.trim(),
        src,
        sink,
    );

    hex::encode(Sha256::digest(input.as_bytes()))
}
