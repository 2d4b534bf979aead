use anyhow::{Context, Result};
use clap::Parser;

use kbrag::cli::commands::{
    handle_ask, handle_config, handle_doc, handle_init, handle_status, handle_upload,
    handle_worker, shutdown_signal,
};
use kbrag::cli::output::get_formatter;
use kbrag::cli::{Cli, Commands};
use kbrag::models::{Config, OutputFormat};
use kbrag::utils::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logger(&config.logging, cli.verbose);

    let format = cli.format.unwrap_or_default();

    // The worker owns its shutdown handling so in-flight tasks can drain.
    let result = if matches!(cli.command, Commands::Worker(_)) {
        run_command(cli, config, format).await
    } else {
        tokio::select! {
            result = run_command(cli, config, format) => result,
            _ = shutdown_signal() => {
                eprintln!("\nReceived shutdown signal, cleaning up...");
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                Ok(())
            }
        }
    };

    if let Err(e) = result {
        eprint!("{}", get_formatter(format).format_error(&format!("{e:#}")));
        std::process::exit(1);
    }
    Ok(())
}

/// `config` subcommands tolerate an unreadable or invalid file so it can be rewritten.
fn load_config(cli: &Cli) -> Result<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(config) => Ok(config),
        Err(e) if matches!(cli.command, Commands::Config(_)) => {
            eprintln!("Warning: {e}; using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).context("failed to load configuration"),
    }
}

async fn run_command(cli: Cli, config: Config, format: OutputFormat) -> Result<()> {
    let ctx = cli.request_context();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Init => handle_init(&config, format, verbose).await,
        Commands::Upload(args) => handle_upload(args, &config, &ctx, format).await,
        Commands::Ask(args) => handle_ask(args, &config, &ctx, format, verbose).await,
        Commands::Doc(cmd) => handle_doc(cmd, &config, &ctx, format).await,
        Commands::Worker(args) => handle_worker(args, &config, format).await,
        Commands::Status => handle_status(&config, format, verbose).await,
        Commands::Config(cmd) => handle_config(cmd, &config, cli.config.as_deref(), format).await,
    }
}
