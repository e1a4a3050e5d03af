//! AuditDaemon CLI entry point

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, eyre};
use tracing::info;

use auditdaemon::cli::{Cli, Command};
use auditdaemon::config::Config;
use auditdaemon::engine::{Engine, EngineStores};
use auditdaemon::llm::AnthropicClient;
use auditdaemon::store::TaskStore;

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run { path, overrides } => {
            let overrides: serde_json::Value = match overrides {
                Some(text) => serde_json::from_str(&text).context("Invalid --overrides JSON")?,
                None => serde_json::Value::Null,
            };
            let path = path
                .canonicalize()
                .context("Project path does not exist")?
                .to_string_lossy()
                .to_string();

            let engine = build_engine(&config, &cli.store)?;
            let task = engine.create_task(&path, overrides).await?;
            info!(task_id = %task.id, "Starting audit");

            let done = engine.run_task(&task.id).await?;
            print_task(&done);
        }
        Command::Resume { task_id } => {
            let engine = build_engine(&config, &cli.store)?;
            let done = engine.run_task(&task_id).await?;
            print_task(&done);
        }
        Command::Status { task_id } => {
            let stores = EngineStores::persistent(&cli.store)?;
            let task = stores
                .tasks
                .load(&task_id)
                .await?
                .ok_or_else(|| eyre!("Task not found: {}", task_id))?;
            print_task(&task);
        }
        Command::Config => {
            println!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}

fn build_engine(config: &Config, store_path: &std::path::Path) -> Result<Engine> {
    let stores = EngineStores::persistent(store_path).context("Failed to open store")?;
    let client = AnthropicClient::from_config(&config.llm).map_err(|e| eyre!("LLM client: {}", e))?;
    Ok(Engine::new(config.clone(), stores, Arc::new(client)))
}

fn print_task(task: &auditdaemon::domain::Task) {
    println!("Task:     {}", task.id);
    println!("Status:   {}", task.status.as_str());
    if let Some(phase) = &task.current_phase {
        println!("Phase:    {}", phase);
    }
    println!(
        "Files:    {} total, {} analyzed",
        task.total_files, task.analyzed_files
    );
    println!(
        "Findings: {} critical, {} high, {} medium, {} low, {} info",
        task.finding_counts.critical,
        task.finding_counts.high,
        task.finding_counts.medium,
        task.finding_counts.low,
        task.finding_counts.info,
    );
    if let Some(score) = task.overall_score {
        println!("Score:    {} / 100", score);
    }
    if let Some(score) = task.security_score {
        println!("Security: {} / 100", score);
    }
    println!(
        "Tokens:   {} in / {} out",
        task.token_usage.input_tokens, task.token_usage.output_tokens
    );
}
