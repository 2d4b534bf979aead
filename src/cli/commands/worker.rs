use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal;
use tokio::sync::watch;

use crate::cli::backends;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::pipeline::WorkerPool;

#[derive(Debug, Args)]
pub struct WorkerArgs {
    #[arg(long, short = 'n', help = "Concurrent ingestion tasks (overrides queue.concurrency)")]
    pub concurrency: Option<usize>,

    #[arg(long, help = "Consumer name within the consumer group")]
    pub consumer: Option<String>,
}

pub async fn handle_worker(args: WorkerArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    let mut config = config.clone();
    if let Some(concurrency) = args.concurrency {
        config.queue.concurrency = concurrency;
    }
    if args.consumer.is_some() {
        config.queue.consumer_name = args.consumer;
    }
    config.validate()?;

    let broker = backends::broker(&config).await?;
    let pipeline = backends::ingestion_pipeline(&config).await?;
    let pool = WorkerPool::new(broker, Arc::new(pipeline), &config.queue);

    let (tx, rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested, finishing in-flight tasks");
        let _ = tx.send(true);
    });

    let stats = pool.run(rx).await.context("worker pool failed")?;
    signal_task.abort();

    print!("{}", formatter.format_worker_stats(&stats));
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
