use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::backends;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, RequestContext};

#[derive(Debug, Subcommand)]
pub enum DocCommand {
    #[command(about = "List documents in your permission groups")]
    List,
    #[command(about = "Show one document")]
    Show { id: i64 },
    #[command(about = "Delete a document, its chunks and its blob")]
    Delete { id: i64 },
    #[command(about = "Re-enqueue the ingestion task of a PENDING document")]
    Requeue { id: i64 },
}

pub async fn handle_doc(
    cmd: DocCommand,
    config: &Config,
    ctx: &RequestContext,
    format: OutputFormat,
) -> Result<()> {
    let formatter = get_formatter(format);
    let service = backends::document_service(config).await?;

    let output = match cmd {
        DocCommand::List => {
            let documents = service
                .list(ctx)
                .await
                .context("failed to list documents")?;
            formatter.format_documents(&documents)
        }
        DocCommand::Show { id } => {
            let outcome = service.show(ctx, id).await.context("failed to load document")?;
            formatter.format_document_outcome("Document", &outcome)
        }
        DocCommand::Delete { id } => {
            let outcome = service
                .delete(ctx, id)
                .await
                .context("failed to delete document")?;
            formatter.format_document_outcome("Deleted", &outcome)
        }
        DocCommand::Requeue { id } => {
            let outcome = service
                .requeue(ctx, id)
                .await
                .context("failed to requeue document")?;
            formatter.format_document_outcome("Requeued", &outcome)
        }
    };

    print!("{output}");
    Ok(())
}
