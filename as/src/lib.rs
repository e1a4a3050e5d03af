//! AuditStore - persistent record store for audit state
//!
//! Stores JSON records in named collections. Every write goes to two
//! places: a SQLite index (fast status/id lookups) and a per-collection
//! JSONL append log (durable history, greppable with standard tools).
//! Checkpoints and events get dedicated tables because their access
//! patterns (latest-by-index, ordered-by-sequence) differ from plain
//! document collections.
//!
//! # Layout
//!
//! ```text
//! .auditstore/
//! ├── index.db            # SQLite index
//! ├── log/
//! │   ├── tasks.jsonl     # append log per collection
//! │   └── findings.jsonl
//! ├── blobs/              # large artifacts, one file per key
//! └── locks/              # advisory lock files (fs2)
//! ```

pub mod cli;
mod lock;
mod store;

pub use lock::StoreLock;
pub use store::{CollectionStats, Store, StoreError};

/// Collection name for task records
pub const TASKS: &str = "tasks";

/// Collection name for finding records
pub const FINDINGS: &str = "findings";
