use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{Delivery, Queue, QueueDepth, TaskBroker};
use crate::error::BrokerError;
use crate::models::IngestionTask;

#[derive(Debug)]
struct InFlight {
    delivery: Delivery,
    since: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<(String, String, u64)>,
    in_flight: HashMap<String, InFlight>,
}

#[derive(Debug, Default)]
struct State {
    ingest: QueueState,
    dead_letter: QueueState,
    /// Every payload ever routed to the dead-letter queue.
    dead_lettered: Vec<String>,
    acked: Vec<(Queue, String)>,
}

impl State {
    fn queue(&mut self, queue: Queue) -> &mut QueueState {
        match queue {
            Queue::Ingest => &mut self.ingest,
            Queue::DeadLetter => &mut self.dead_letter,
        }
    }
}

/// In-process broker with the same three-outcome contract as the Redis broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    next_id: Arc<AtomicU64>,
    fail_publish: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `publish` fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Enqueue an arbitrary payload, bypassing task encoding.
    pub async fn push_raw(&self, queue: Queue, payload: &str) -> String {
        let id = self.new_id();
        self.state
            .lock()
            .await
            .queue(queue)
            .ready
            .push_back((id.clone(), payload.to_string(), 1));
        self.notify.notify_waiters();
        id
    }

    /// Payloads routed to the dead-letter queue so far.
    pub async fn dead_lettered(&self) -> Vec<String> {
        self.state.lock().await.dead_lettered.clone()
    }

    /// Delivery ids acknowledged on `queue` so far.
    pub async fn acked(&self, queue: Queue) -> Vec<String> {
        self.state
            .lock()
            .await
            .acked
            .iter()
            .filter(|(q, _)| *q == queue)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub async fn ready_len(&self, queue: Queue) -> usize {
        self.state.lock().await.queue(queue).ready.len()
    }

    pub async fn in_flight_len(&self, queue: Queue) -> usize {
        self.state.lock().await.queue(queue).in_flight.len()
    }

    /// Deliver the next ready message without blocking.
    pub async fn next_delivery(&self, queue: Queue) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        Self::take_ready(state.queue(queue), queue, 1).pop()
    }

    fn new_id(&self) -> String {
        format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn take_ready(queue_state: &mut QueueState, queue: Queue, max: usize) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while deliveries.len() < max {
            let Some((id, payload, count)) = queue_state.ready.pop_front() else {
                break;
            };
            let delivery = Delivery {
                id: id.clone(),
                queue,
                payload,
                delivery_count: count,
            };
            queue_state.in_flight.insert(
                id,
                InFlight {
                    delivery: delivery.clone(),
                    since: Instant::now(),
                },
            );
            deliveries.push(delivery);
        }
        deliveries
    }
}

#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn ensure_topology(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish(&self, task: &IngestionTask) -> Result<String, BrokerError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::PublishError("broker unavailable".to_string()));
        }
        let payload = task.to_payload()?;
        Ok(self.push_raw(Queue::Ingest, &payload).await)
    }

    async fn receive(
        &self,
        queue: Queue,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                let deliveries = Self::take_ready(state.queue(queue), queue, max.max(1));
                if !deliveries.is_empty() {
                    return Ok(deliveries);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_stale(
        &self,
        queue: Queue,
        min_idle: Duration,
        max: usize,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut claimed = Vec::new();
        for entry in state.queue(queue).in_flight.values_mut() {
            if claimed.len() >= max {
                break;
            }
            if now.duration_since(entry.since) >= min_idle {
                entry.since = now;
                entry.delivery.delivery_count += 1;
                claimed.push(entry.delivery.clone());
            }
        }
        claimed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(claimed)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if state
            .queue(delivery.queue)
            .in_flight
            .remove(&delivery.id)
            .is_none()
        {
            return Err(BrokerError::SettleError {
                delivery_id: delivery.id.clone(),
                reason: "not in flight".to_string(),
            });
        }
        state.acked.push((delivery.queue, delivery.id.clone()));
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        if delivery.queue == Queue::DeadLetter {
            return self.ack(delivery).await;
        }

        let id = self.new_id();
        {
            let mut state = self.state.lock().await;
            if state.ingest.in_flight.remove(&delivery.id).is_none() {
                return Err(BrokerError::SettleError {
                    delivery_id: delivery.id.clone(),
                    reason: "not in flight".to_string(),
                });
            }
            state
                .dead_letter
                .ready
                .push_back((id, delivery.payload.clone(), 1));
            state.dead_lettered.push(delivery.payload.clone());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn depth(&self, queue: Queue) -> Result<QueueDepth, BrokerError> {
        let mut state = self.state.lock().await;
        let queue_state = state.queue(queue);
        let pending = queue_state.in_flight.len() as u64;
        Ok(QueueDepth {
            length: queue_state.ready.len() as u64 + pending,
            pending,
        })
    }
}
