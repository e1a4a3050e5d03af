//! CLI argument parsing for auditstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "auditstore")]
#[command(author, version, about = "Inspect an audit record store", long_about = None)]
pub struct Cli {
    /// Path to the store directory
    #[arg(short, long, default_value = ".auditstore")]
    pub store: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List records in a collection
    List {
        /// Collection name (e.g. tasks, findings)
        #[arg(required = true)]
        collection: String,

        /// Filter by status
        #[arg(short = 's', long)]
        status: Option<String>,
    },

    /// Print a single record as JSON
    Get {
        /// Collection name
        #[arg(required = true)]
        collection: String,

        /// Record id
        #[arg(required = true)]
        id: String,
    },

    /// Print events for a task, ordered by sequence
    Events {
        /// Task id
        #[arg(required = true)]
        task_id: String,
    },

    /// Show per-collection record counts
    Stats,
}
