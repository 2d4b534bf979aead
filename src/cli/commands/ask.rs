use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::backends;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, RequestContext};

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, num_args = 1.., help = "Question text")]
    pub words: Vec<String>,
}

impl AskArgs {
    pub fn question(&self) -> String {
        self.words.join(" ")
    }
}

pub async fn handle_ask(
    args: AskArgs,
    config: &Config,
    ctx: &RequestContext,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let question = args.question();
    if question.trim().is_empty() {
        anyhow::bail!("question cannot be empty");
    }

    let formatter = get_formatter(format);
    let start_time = Instant::now();

    if verbose {
        eprintln!("Question: \"{}\"", question.trim());
        eprintln!("  Roles: {}", ctx.roles().join(", "));
        eprintln!("  Top-k: {}", config.chat.top_k);
    }

    let chat = backends::chat_service(config).await?;
    let answer = chat
        .ask(ctx, &question)
        .await
        .context("failed to answer question")?;

    if verbose {
        eprintln!("Answered in {}ms", start_time.elapsed().as_millis());
        eprintln!();
    }

    print!("{}", formatter.format_answer(&answer));
    Ok(())
}
