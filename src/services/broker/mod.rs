//! At-least-once task broker with an explicit dead-letter queue.
//!
//! Each delivery ends in exactly one of three ways: [`TaskBroker::ack`]
//! removes it, [`TaskBroker::reject`] moves it to the dead-letter queue, or
//! the consumer crashes and the broker redelivers it later through
//! [`TaskBroker::claim_stale`].

mod memory;
mod redis;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisStreamBroker;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::BrokerError;
use crate::models::IngestionTask;

/// Queues known to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Ingest,
    DeadLetter,
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Queue::Ingest => write!(f, "ingest"),
            Queue::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

/// One delivered message, not yet settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub queue: Queue,
    /// Raw payload; may not decode as a task.
    pub payload: String,
    /// 1 on first delivery.
    pub delivery_count: u64,
}

impl Delivery {
    pub fn decode(&self) -> Result<IngestionTask, serde_json::Error> {
        IngestionTask::from_payload(&self.payload)
    }
}

/// Queue length and unsettled deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub length: u64,
    pub pending: u64,
}

#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Create queues and consumer groups if missing.
    async fn ensure_topology(&self) -> Result<(), BrokerError>;

    /// Enqueue one ingestion task. Returns the message id.
    async fn publish(&self, task: &IngestionTask) -> Result<String, BrokerError>;

    /// Wait up to `block` for at most `max` new deliveries.
    async fn receive(
        &self,
        queue: Queue,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, BrokerError>;

    /// Take over deliveries left unsettled for at least `min_idle`.
    async fn claim_stale(
        &self,
        queue: Queue,
        min_idle: Duration,
        max: usize,
    ) -> Result<Vec<Delivery>, BrokerError>;

    /// Permanently remove a delivery.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Route a delivery to the dead-letter queue without requeueing it.
    ///
    /// The dead-letter queue has no further target; rejecting there acks.
    async fn reject(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    async fn depth(&self, queue: Queue) -> Result<QueueDepth, BrokerError>;
}
