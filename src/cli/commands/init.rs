use anyhow::{Context, Result};

use crate::cli::backends;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::TaskBroker;

pub async fn handle_init(config: &Config, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    let store = backends::document_store(config).await?;
    store
        .ensure_schema()
        .await
        .context("failed to create database schema")?;
    store
        .check_pgvector_extension()
        .await
        .context("pgvector is required")?;
    if verbose {
        eprintln!(
            "Schema ready (vector dimension {})",
            config.embedding.dimension
        );
    }

    let broker = backends::broker(config).await?;
    broker
        .ensure_topology()
        .await
        .context("failed to create queues")?;

    print!(
        "{}",
        formatter.format_message(&format!(
            "Initialized schema and queues '{}' / '{}' (group '{}')",
            config.queue.stream, config.queue.dead_letter_stream, config.queue.consumer_group
        ))
    );
    Ok(())
}
