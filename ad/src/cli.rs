//! CLI argument parsing for auditdaemon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ad")]
#[command(author, version, about = "LLM-agent security audit engine", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Store directory for tasks, findings, events, and checkpoints
    #[arg(short, long, default_value = ".auditstore")]
    pub store: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Audit a project directory
    Run {
        /// Project root to audit
        #[arg(required = true)]
        path: PathBuf,

        /// Per-task config overrides as inline JSON
        #[arg(short, long)]
        overrides: Option<String>,
    },

    /// Resume a task from its latest checkpoint
    Resume {
        /// Task id
        #[arg(required = true)]
        task_id: String,
    },

    /// Show a task's status and scores
    Status {
        /// Task id
        #[arg(required = true)]
        task_id: String,
    },

    /// Print the effective configuration as YAML
    Config,
}
