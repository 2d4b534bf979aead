use anyhow::Result;

use crate::cli::backends;
use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::services::{DocumentStore, KeyValueStore, Queue, TaskBroker};

pub async fn handle_status(config: &Config, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    let (database_connected, documents) = match backends::document_store(config).await {
        Ok(store) => match store.health_check().await {
            Ok(()) => (true, store.count_by_status().await.unwrap_or_default()),
            Err(e) => {
                if verbose {
                    eprintln!("PostgreSQL: {e}");
                }
                (false, Vec::new())
            }
        },
        Err(e) => {
            if verbose {
                eprintln!("PostgreSQL: {e:#}");
            }
            (false, Vec::new())
        }
    };

    let redis_connected = match backends::kv_store(config).await {
        Ok(kv) => kv.ping().await.is_ok(),
        Err(e) => {
            if verbose {
                eprintln!("Redis: {e:#}");
            }
            false
        }
    };

    let (ingest_queue, dead_letter_queue) = if redis_connected {
        match backends::broker(config).await {
            Ok(broker) => (
                broker.depth(Queue::Ingest).await.ok(),
                broker.depth(Queue::DeadLetter).await.ok(),
            ),
            Err(_) => (None, None),
        }
    } else {
        (None, None)
    };

    let embedding_healthy = match backends::embedder(config) {
        Ok(client) => client.health_check().await.is_ok(),
        Err(_) => false,
    };

    let status = StatusInfo {
        database_connected,
        redis_url: config.redis.url.clone(),
        redis_connected,
        embedding_url: config.embedding.url.clone(),
        embedding_healthy,
        ingest_queue,
        dead_letter_queue,
        documents,
    };

    print!("{}", formatter.format_status(&status));

    if !database_connected || !redis_connected {
        eprintln!();
        if !database_connected {
            eprintln!("Warning: PostgreSQL not accessible. Check database.url or KBRAG_DATABASE_URL.");
        }
        if !redis_connected {
            eprintln!("Warning: Redis not accessible. Check redis.url or KBRAG_REDIS_URL.");
        }
    }
    if dead_letter_queue.is_some_and(|d| d.length > 0) {
        eprintln!("Hint: dead-lettered tasks are waiting. Run: kbrag worker");
    }

    Ok(())
}
