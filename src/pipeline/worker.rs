//! Bounded worker pool driving the ingestion pipeline and the dead-letter sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};

use crate::error::BrokerError;
use crate::models::QueueConfig;
use crate::services::broker::{Delivery, Queue, TaskBroker};

use super::{DeadLetterSink, Disposition, IngestionPipeline};

/// Pause after a failed receive before polling the broker again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Settlement counters for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub acked: u64,
    pub dead_lettered: u64,
    pub dead_letters_recorded: u64,
    pub settle_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    acked: AtomicU64,
    dead_lettered: AtomicU64,
    dead_letters_recorded: AtomicU64,
    settle_failures: AtomicU64,
}

pub struct WorkerPool {
    broker: Arc<dyn TaskBroker>,
    pipeline: Arc<IngestionPipeline>,
    sink: DeadLetterSink,
    concurrency: usize,
    batch_size: usize,
    block: Duration,
    claim_idle: Duration,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(
        broker: Arc<dyn TaskBroker>,
        pipeline: Arc<IngestionPipeline>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            broker,
            pipeline,
            sink: DeadLetterSink::new(),
            concurrency: config.concurrency.max(1),
            batch_size: config.batch_size.max(1),
            block: Duration::from_millis(config.block_ms),
            claim_idle: Duration::from_millis(config.claim_idle_ms),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            acked: self.counters.acked.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
            dead_letters_recorded: self.counters.dead_letters_recorded.load(Ordering::Relaxed),
            settle_failures: self.counters.settle_failures.load(Ordering::Relaxed),
        }
    }

    /// Consume both queues until `shutdown` turns true, then wait for
    /// in-flight ingestion tasks to settle.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<WorkerStats, BrokerError> {
        self.broker.ensure_topology().await?;
        tracing::info!(
            concurrency = self.concurrency,
            batch_size = self.batch_size,
            "worker pool started"
        );

        tokio::join!(
            self.run_ingest(shutdown.clone()),
            self.run_dead_letter(shutdown)
        );

        let stats = self.stats();
        tracing::info!(
            acked = stats.acked,
            dead_lettered = stats.dead_lettered,
            dead_letters_recorded = stats.dead_letters_recorded,
            settle_failures = stats.settle_failures,
            "worker pool stopped"
        );
        Ok(stats)
    }

    async fn run_ingest(&self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        for delivery in self.reclaim(Queue::Ingest).await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                return;
            };
            self.dispatch(delivery, permit);
        }

        while !*shutdown.borrow() {
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let max = (semaphore.available_permits() + 1).min(self.batch_size);
            let deliveries = match self.broker.receive(Queue::Ingest, max, self.block).await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    tracing::error!(error = %e, "failed to receive ingestion tasks");
                    drop(permit);
                    pause(&mut shutdown).await;
                    continue;
                }
            };

            let mut first = Some(permit);
            for delivery in deliveries {
                let permit = match first.take() {
                    Some(permit) => permit,
                    None => match Arc::clone(&semaphore).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                self.dispatch(delivery, permit);
            }
        }

        tracing::info!("draining in-flight ingestion tasks");
        let _drained = semaphore.acquire_many(self.concurrency as u32).await;
    }

    async fn run_dead_letter(&self, mut shutdown: watch::Receiver<bool>) {
        for delivery in self.reclaim(Queue::DeadLetter).await {
            self.record_dead_letter(&delivery).await;
        }

        while !*shutdown.borrow() {
            let deliveries = match self
                .broker
                .receive(Queue::DeadLetter, self.batch_size, self.block)
                .await
            {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    tracing::error!(error = %e, "failed to receive dead-lettered tasks");
                    pause(&mut shutdown).await;
                    continue;
                }
            };
            for delivery in deliveries {
                self.record_dead_letter(&delivery).await;
            }
        }
    }

    async fn record_dead_letter(&self, delivery: &Delivery) {
        let disposition = self.sink.handle(delivery);
        if settle(self.broker.as_ref(), delivery, disposition, &self.counters).await {
            self.counters
                .dead_letters_recorded
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Deliveries a previous consumer left unsettled.
    async fn reclaim(&self, queue: Queue) -> Vec<Delivery> {
        let max = self.concurrency * self.batch_size;
        match self.broker.claim_stale(queue, self.claim_idle, max).await {
            Ok(deliveries) => {
                if !deliveries.is_empty() {
                    tracing::info!(queue = %queue, count = deliveries.len(), "reclaimed unsettled deliveries");
                }
                deliveries
            }
            Err(e) => {
                tracing::warn!(queue = %queue, error = %e, "failed to reclaim unsettled deliveries");
                Vec::new()
            }
        }
    }

    /// Handle one delivery on its own task; the permit is held until it settles.
    fn dispatch(&self, delivery: Delivery, permit: OwnedSemaphorePermit) {
        let pipeline = Arc::clone(&self.pipeline);
        let broker = Arc::clone(&self.broker);
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            let _permit = permit;
            let handled = {
                let pipeline = Arc::clone(&pipeline);
                let delivery = delivery.clone();
                tokio::spawn(async move { pipeline.handle(&delivery).await }).await
            };

            let disposition = match handled {
                Ok(disposition) => disposition,
                Err(e) => {
                    tracing::error!(delivery_id = %delivery.id, error = %e, "ingestion handler aborted");
                    pipeline
                        .abandon(&delivery, &format!("ingestion handler aborted: {e}"))
                        .await;
                    Disposition::DeadLetter
                }
            };
            settle(broker.as_ref(), &delivery, disposition, &counters).await;
        });
    }
}

/// Returns true when the broker accepted the settlement.
async fn settle(
    broker: &dyn TaskBroker,
    delivery: &Delivery,
    disposition: Disposition,
    counters: &Counters,
) -> bool {
    let result = match disposition {
        Disposition::Ack => broker.ack(delivery).await,
        Disposition::DeadLetter => broker.reject(delivery).await,
    };

    match result {
        Ok(()) => {
            if delivery.queue == Queue::Ingest {
                let counter = match disposition {
                    Disposition::Ack => &counters.acked,
                    Disposition::DeadLetter => &counters.dead_lettered,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            true
        }
        Err(e) => {
            counters.settle_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                delivery_id = %delivery.id,
                queue = %delivery.queue,
                error = %e,
                "failed to settle delivery, it stays pending for redelivery"
            );
            false
        }
    }
}

async fn pause(shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
        _ = shutdown.changed() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::EmbeddingError;
    use crate::models::IngestionConfig;
    use crate::services::blob_store::MemoryBlobStore;
    use crate::services::broker::MemoryBroker;
    use crate::services::document_store::MemoryDocumentStore;
    use crate::services::embedding::Embedder;
    use crate::services::extractor::DocumentExtractor;
    use crate::services::guard::IdempotencyGuard;
    use crate::services::kv_store::MemoryKeyValueStore;

    struct ZeroEmbedder;

    #[async_trait]
    impl Embedder for ZeroEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
        }
    }

    fn pool(broker: &MemoryBroker) -> WorkerPool {
        let pipeline = IngestionPipeline::new(
            IdempotencyGuard::new(Arc::new(MemoryKeyValueStore::new()), Duration::from_secs(60)),
            Arc::new(MemoryDocumentStore::new(2)),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(DocumentExtractor::new(1024)),
            Arc::new(ZeroEmbedder),
            &IngestionConfig::default(),
            8,
        );
        let config = QueueConfig {
            concurrency: 2,
            block_ms: 20,
            ..QueueConfig::default()
        };
        WorkerPool::new(Arc::new(broker.clone()), Arc::new(pipeline), &config)
    }

    #[tokio::test]
    async fn test_poison_message_flows_to_sink() {
        let broker = MemoryBroker::new();
        broker.push_raw(Queue::Ingest, "not a task").await;
        let pool = pool(&broker);
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(async move { pool.run(rx).await });
        for _ in 0..100 {
            if !broker.acked(Queue::DeadLetter).await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        let stats = run.await.unwrap().unwrap();

        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.dead_letters_recorded, 1);
        assert_eq!(broker.dead_lettered().await, vec!["not a task".to_string()]);
        assert_eq!(broker.depth(Queue::Ingest).await.unwrap().length, 0);
        assert_eq!(broker.depth(Queue::DeadLetter).await.unwrap().length, 0);
    }

    #[tokio::test]
    async fn test_stops_when_idle() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);
        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { pool.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats, WorkerStats::default());
    }
}
