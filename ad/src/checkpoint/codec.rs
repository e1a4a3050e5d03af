//! Checkpoint blob format
//!
//! Length-prefixed versioned record:
//!
//! ```text
//! [4-byte magic "ADCP"] [2-byte version BE] [4-byte state length BE]
//! [AuditState canonical JSON] [4-byte finding count BE]
//! ([4-byte length BE] [finding JSON])*
//! ```
//!
//! Findings are carried as separate records; on decode they are
//! repartitioned by verification status. Version mismatches fail
//! recovery with a clear error.

use thiserror::Error;

use crate::domain::{AuditState, Finding};

const MAGIC: &[u8; 4] = b"ADCP";
const VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Bad checkpoint magic")]
    BadMagic,

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },

    #[error("Truncated checkpoint blob")]
    Truncated,

    #[error("Checkpoint JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint store error: {0}")]
    Store(String),
}

/// Serialize an AuditState into the versioned blob format
pub fn encode_state(state: &AuditState) -> Result<Vec<u8>, CheckpointError> {
    let mut stripped = state.clone();
    let mut findings: Vec<Finding> = Vec::new();
    findings.append(&mut stripped.open_findings);
    findings.append(&mut stripped.verified_findings);
    findings.append(&mut stripped.false_positives);

    let state_bytes = serde_json::to_vec(&stripped)?;

    let mut blob = Vec::with_capacity(state_bytes.len() + 64);
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&VERSION.to_be_bytes());
    blob.extend_from_slice(&(state_bytes.len() as u32).to_be_bytes());
    blob.extend_from_slice(&state_bytes);
    blob.extend_from_slice(&(findings.len() as u32).to_be_bytes());

    for finding in &findings {
        let finding_bytes = serde_json::to_vec(finding)?;
        blob.extend_from_slice(&(finding_bytes.len() as u32).to_be_bytes());
        blob.extend_from_slice(&finding_bytes);
    }

    Ok(blob)
}

/// Parse a blob back into an AuditState, repartitioning findings by
/// their verification status
pub fn decode_state(blob: &[u8]) -> Result<AuditState, CheckpointError> {
    let mut cursor = Cursor { blob, pos: 0 };

    if cursor.take(4)? != MAGIC {
        return Err(CheckpointError::BadMagic);
    }

    let version = u16::from_be_bytes(cursor.take(2)?.try_into().map_err(|_| CheckpointError::Truncated)?);
    if version != VERSION {
        return Err(CheckpointError::UnsupportedVersion {
            found: version,
            expected: VERSION,
        });
    }

    let state_len = cursor.take_u32()? as usize;
    let mut state: AuditState = serde_json::from_slice(cursor.take(state_len)?)?;

    let finding_count = cursor.take_u32()? as usize;
    for _ in 0..finding_count {
        let len = cursor.take_u32()? as usize;
        let finding: Finding = serde_json::from_slice(cursor.take(len)?)?;
        state.open_findings.push(finding);
    }
    state.repartition_findings();

    Ok(state)
}

struct Cursor<'a> {
    blob: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CheckpointError> {
        if self.pos + n > self.blob.len() {
            return Err(CheckpointError::Truncated);
        }
        let slice = &self.blob[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32, CheckpointError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().map_err(|_| CheckpointError::Truncated)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, Phase, Severity, VerificationStatus};
    use std::path::PathBuf;

    fn sample_state() -> AuditState {
        let mut state = AuditState::new(PathBuf::from("/srv/project"), 30);
        state.phase = Phase::Verification;
        state.iteration = 7;
        state.tech_stack.insert("python".to_string(), 0.75);
        state.tech_stack.insert("javascript".to_string(), 0.25);
        state.high_risk_paths.push("api/".to_string());
        state.push_message("recon complete", 50);

        let mut open = Finding::new(
            "t1",
            "sql_injection",
            Severity::High,
            "SQLi in query builder",
            Location {
                file_path: "main.py".to_string(),
                line_start: 10,
                line_end: 12,
                ..Default::default()
            },
        );
        open.fingerprint = "fp-open".to_string();
        state.open_findings.push(open);

        let mut confirmed = Finding::new("t1", "xss", Severity::Medium, "XSS", Location::default());
        confirmed.verification_status = VerificationStatus::Confirmed;
        confirmed.fingerprint = "fp-confirmed".to_string();
        state.verified_findings.push(confirmed);

        let mut rejected = Finding::new("t1", "weak_crypto", Severity::Low, "MD5", Location::default());
        rejected.verification_status = VerificationStatus::Rejected;
        rejected.fingerprint = "fp-rejected".to_string();
        state.false_positives.push(rejected);

        state
    }

    #[test]
    fn test_roundtrip_restores_state() {
        let state = sample_state();
        let blob = encode_state(&state).unwrap();
        let restored = decode_state(&blob).unwrap();

        assert_eq!(restored.phase, Phase::Verification);
        assert_eq!(restored.iteration, 7);
        assert_eq!(restored.tech_stack, state.tech_stack);
        assert_eq!(restored.open_findings.len(), 1);
        assert_eq!(restored.verified_findings.len(), 1);
        assert_eq!(restored.false_positives.len(), 1);
        assert_eq!(restored, state);
    }

    #[test]
    fn test_roundtrip_is_byte_stable() {
        // checkpoint → restore → serialize again ⇒ byte-equal
        let blob = encode_state(&sample_state()).unwrap();
        let restored = decode_state(&blob).unwrap();
        let blob2 = encode_state(&restored).unwrap();
        assert_eq!(blob, blob2);
    }

    #[test]
    fn test_magic_checked() {
        let mut blob = encode_state(&sample_state()).unwrap();
        blob[0] = b'X';
        assert!(matches!(decode_state(&blob), Err(CheckpointError::BadMagic)));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut blob = encode_state(&sample_state()).unwrap();
        blob[4] = 0xFF;
        blob[5] = 0xFF;
        match decode_state(&blob) {
            Err(CheckpointError::UnsupportedVersion { found, expected }) => {
                assert_eq!(found, 0xFFFF);
                assert_eq!(expected, VERSION);
            }
            other => panic!("expected version error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let blob = encode_state(&sample_state()).unwrap();
        for cut in [3, 5, 9, blob.len() - 1] {
            assert!(
                matches!(decode_state(&blob[..cut]), Err(CheckpointError::Truncated) | Err(CheckpointError::Json(_))),
                "cut at {} should fail",
                cut
            );
        }
    }

    #[test]
    fn test_empty_state_roundtrip() {
        let state = AuditState::new(PathBuf::from("/p"), 10);
        let blob = encode_state(&state).unwrap();
        let restored = decode_state(&blob).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.finding_count(), 0);
    }
}
