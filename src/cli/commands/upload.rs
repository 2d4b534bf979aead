use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::backends;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, RequestContext};
use crate::services::Upload;

#[derive(Debug, Args)]
pub struct UploadArgs {
    #[arg(required = true, help = "File to upload")]
    pub path: PathBuf,

    #[arg(
        long,
        short = 'g',
        help = "Permission group for the document (defaults to your first role)"
    )]
    pub group: Option<String>,

    #[arg(long, help = "Content type recorded with the document")]
    pub content_type: Option<String>,
}

pub async fn handle_upload(
    args: UploadArgs,
    config: &Config,
    ctx: &RequestContext,
    format: OutputFormat,
) -> Result<()> {
    let formatter = get_formatter(format);

    let filename = args
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", args.path.display()))?
        .to_string();

    let size = tokio::fs::metadata(&args.path)
        .await
        .with_context(|| format!("failed to read {}", args.path.display()))?
        .len();
    if size > config.ingestion.max_file_size {
        anyhow::bail!(
            "{} is {} bytes, larger than the {} byte limit",
            args.path.display(),
            size,
            config.ingestion.max_file_size
        );
    }
    let bytes = tokio::fs::read(&args.path)
        .await
        .with_context(|| format!("failed to read {}", args.path.display()))?;

    let service = backends::document_service(config).await?;
    let outcome = service
        .register(
            ctx,
            Upload {
                filename: &filename,
                bytes: &bytes,
                content_type: args.content_type.as_deref(),
                permission_group: args.group.as_deref(),
            },
        )
        .await
        .context("upload failed")?;

    print!("{}", formatter.format_upload(&outcome));
    Ok(())
}
