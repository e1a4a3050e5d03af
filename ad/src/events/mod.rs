//! Structured progress events: the sole progress channel out of the engine

mod bus;
mod types;

pub use bus::{EventBus, EventEmitter, EventStream, run_heartbeat, run_persistence};
pub use types::{AuditEvent, EventKind};
