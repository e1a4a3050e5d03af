use clap::Parser;
use eyre::{Context, Result};

use auditstore::Store;
use auditstore::cli::{Cli, Command};

fn main() -> Result<()> {
    tracing_subscriber_init();

    let cli = Cli::parse();
    let store = Store::open(&cli.store).context("Failed to open store")?;

    match cli.command {
        Command::List { collection, status } => {
            let records = store.list(&collection, status.as_deref())?;
            if records.is_empty() {
                println!("No records in {}", collection);
            }
            for record in records {
                let id = record.get("id").and_then(|v| v.as_str()).unwrap_or("?");
                let status = record.get("status").and_then(|v| v.as_str()).unwrap_or("-");
                println!("{}  [{}]", id, status);
            }
        }
        Command::Get { collection, id } => match store.get(&collection, &id)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("Not found: {}/{}", collection, id),
        },
        Command::Events { task_id } => {
            for event in store.list_events(&task_id)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        Command::Stats => {
            for s in store.stats()? {
                println!("{:<16} {}", s.collection, s.record_count);
            }
        }
    }

    Ok(())
}

fn tracing_subscriber_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
