//! Phase graph edges
//!
//! The DAG is fixed; edge conditions are pure functions of AuditState.
//! The analysis↔verification loop re-enters analysis only while the
//! verification agent requests it and the orchestrator iteration budget
//! holds.

use crate::domain::{AuditState, Phase};

/// The next phase from the current state
pub fn next_phase(state: &AuditState) -> Phase {
    match state.phase {
        Phase::Init => Phase::Recon,
        Phase::Recon => Phase::Analysis,
        Phase::Analysis => Phase::Verification,
        Phase::Verification => {
            if state.continue_analysis && state.iteration < state.max_iterations {
                Phase::Analysis
            } else {
                Phase::Report
            }
        }
        Phase::Report => Phase::Done,
        Phase::Done => Phase::Done,
        Phase::Error => Phase::Error,
    }
}
