use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redis::aio::MultiplexedConnection;

use super::{Delivery, Queue, QueueDepth, TaskBroker};
use crate::error::BrokerError;
use crate::models::{IngestionTask, QueueConfig};

const PAYLOAD_FIELD: &str = "data";

/// Broker on Redis Streams with one consumer group per stream.
///
/// Blocking reads use their own connections so they never stall acks and
/// publishes queued on the shared command connection.
#[derive(Clone)]
pub struct RedisStreamBroker {
    conn: MultiplexedConnection,
    ingest_reader: MultiplexedConnection,
    dead_letter_reader: MultiplexedConnection,
    stream: String,
    dead_letter_stream: String,
    group: String,
    consumer: String,
}

impl RedisStreamBroker {
    pub async fn connect(url: &str, config: &QueueConfig) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::ConnectionError(e.to_string()))?;

        let conn = open_connection(&client).await?;
        let ingest_reader = open_connection(&client).await?;
        let dead_letter_reader = open_connection(&client).await?;

        let consumer = config.resolved_consumer_name();
        tracing::debug!(
            stream = %config.stream,
            dead_letter_stream = %config.dead_letter_stream,
            group = %config.consumer_group,
            consumer = %consumer,
            "connected to Redis broker"
        );

        Ok(Self {
            conn,
            ingest_reader,
            dead_letter_reader,
            stream: config.stream.clone(),
            dead_letter_stream: config.dead_letter_stream.clone(),
            group: config.consumer_group.clone(),
            consumer,
        })
    }

    fn stream_for(&self, queue: Queue) -> &str {
        match queue {
            Queue::Ingest => &self.stream,
            Queue::DeadLetter => &self.dead_letter_stream,
        }
    }

    fn reader_for(&self, queue: Queue) -> MultiplexedConnection {
        match queue {
            Queue::Ingest => self.ingest_reader.clone(),
            Queue::DeadLetter => self.dead_letter_reader.clone(),
        }
    }

    async fn create_group(&self, stream: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            // Group already exists
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(BrokerError::ConnectionError(format!(
                "failed to create consumer group on {stream}: {e}"
            ))),
        }
    }

    async fn settle(&self, delivery: &Delivery, dead_letter: bool) -> Result<(), BrokerError> {
        let source = self.stream_for(delivery.queue);
        let mut pipe = redis::pipe();
        pipe.atomic();
        if dead_letter {
            pipe.cmd("XADD")
                .arg(&self.dead_letter_stream)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(&delivery.payload)
                .arg("source_id")
                .arg(&delivery.id)
                .ignore();
        }
        pipe.cmd("XACK")
            .arg(source)
            .arg(&self.group)
            .arg(&delivery.id)
            .ignore()
            .cmd("XDEL")
            .arg(source)
            .arg(&delivery.id)
            .ignore();

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = pipe.query_async(&mut conn).await;
        result.map_err(|e| BrokerError::SettleError {
            delivery_id: delivery.id.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl TaskBroker for RedisStreamBroker {
    async fn ensure_topology(&self) -> Result<(), BrokerError> {
        self.create_group(&self.stream).await?;
        self.create_group(&self.dead_letter_stream).await
    }

    async fn publish(&self, task: &IngestionTask) -> Result<String, BrokerError> {
        let payload = task.to_payload()?;
        let mut conn = self.conn.clone();
        let id: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::PublishError(e.to_string()))?;
        Ok(id)
    }

    async fn receive(
        &self,
        queue: Queue,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let mut conn = self.reader_for(queue);
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(max.max(1))
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(self.stream_for(queue))
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::ReceiveError(e.to_string()))?;

        parse_read_reply(reply, queue)
    }

    async fn claim_stale(
        &self,
        queue: Queue,
        min_idle: Duration,
        max: usize,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let mut conn = self.conn.clone();
        let mut cursor = "0-0".to_string();
        let mut claimed = Vec::new();

        loop {
            let reply: Value = redis::cmd("XAUTOCLAIM")
                .arg(self.stream_for(queue))
                .arg(&self.group)
                .arg(&self.consumer)
                .arg(min_idle.as_millis() as u64)
                .arg(&cursor)
                .arg("COUNT")
                .arg(max.saturating_sub(claimed.len()).max(1))
                .query_async(&mut conn)
                .await
                .map_err(|e| BrokerError::ReceiveError(e.to_string()))?;

            let (next, entries) = parse_autoclaim_reply(reply, queue)?;
            claimed.extend(entries);
            if next == "0-0" || claimed.len() >= max {
                break;
            }
            cursor = next;
        }

        Ok(claimed)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery, false).await
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.settle(delivery, delivery.queue == Queue::Ingest).await
    }

    async fn depth(&self, queue: Queue) -> Result<QueueDepth, BrokerError> {
        let stream = self.stream_for(queue);
        let mut conn = self.conn.clone();
        let length: u64 = redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::ReceiveError(e.to_string()))?;

        let summary: Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.group)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::ReceiveError(e.to_string()))?;

        let pending = match summary {
            Value::Array(items) => match items.first() {
                Some(Value::Int(n)) => *n as u64,
                _ => 0,
            },
            _ => 0,
        };

        Ok(QueueDepth { length, pending })
    }
}

async fn open_connection(client: &redis::Client) -> Result<MultiplexedConnection, BrokerError> {
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| BrokerError::ConnectionError(e.to_string()))
}

/// Parse `XREADGROUP` output: `[[stream, [[id, [field, value, ...]], ...]]]`.
fn parse_read_reply(reply: Value, queue: Queue) -> Result<Vec<Delivery>, BrokerError> {
    let streams = match reply {
        Value::Array(streams) => streams,
        Value::Nil => return Ok(Vec::new()),
        other => {
            return Err(BrokerError::ReceiveError(format!(
                "unexpected XREADGROUP reply: {other:?}"
            )));
        }
    };

    let mut deliveries = Vec::new();
    for stream in streams {
        let Value::Array(mut stream_data) = stream else {
            continue;
        };
        if stream_data.len() < 2 {
            continue;
        }
        deliveries.extend(parse_entries(stream_data.swap_remove(1), queue));
    }
    Ok(deliveries)
}

/// Parse `XAUTOCLAIM` output: `[next_cursor, [entries...], [deleted ids...]]`.
fn parse_autoclaim_reply(
    reply: Value,
    queue: Queue,
) -> Result<(String, Vec<Delivery>), BrokerError> {
    let Value::Array(mut parts) = reply else {
        return Err(BrokerError::ReceiveError(
            "unexpected XAUTOCLAIM reply".to_string(),
        ));
    };
    if parts.len() < 2 {
        return Err(BrokerError::ReceiveError(
            "short XAUTOCLAIM reply".to_string(),
        ));
    }

    let entries = parse_entries(parts.swap_remove(1), queue)
        .into_iter()
        .map(|mut d| {
            d.delivery_count = 2;
            d
        })
        .collect();
    let next = value_to_string(&parts[0]).unwrap_or_else(|| "0-0".to_string());
    Ok((next, entries))
}

fn parse_entries(entries: Value, queue: Queue) -> Vec<Delivery> {
    let Value::Array(entries) = entries else {
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let Value::Array(entry) = entry else {
                return None;
            };
            let id = entry.first().and_then(value_to_string)?;
            // Entries deleted while pending come back with a nil field list
            let payload = match entry.get(1) {
                Some(Value::Array(fields)) => fields
                    .chunks(2)
                    .find(|pair| {
                        pair.first().and_then(value_to_string).as_deref() == Some(PAYLOAD_FIELD)
                    })
                    .and_then(|pair| pair.get(1))
                    .and_then(value_to_string)
                    .unwrap_or_default(),
                _ => String::new(),
            };
            Some(Delivery {
                id,
                queue,
                payload,
                delivery_count: 1,
            })
        })
        .collect()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_read_reply() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("kb:ingest"),
            Value::Array(vec![
                Value::Array(vec![
                    bulk("1-0"),
                    Value::Array(vec![bulk("data"), bulk("{\"documentId\":1}")]),
                ]),
                Value::Array(vec![bulk("2-0"), Value::Array(vec![bulk("other"), bulk("x")])]),
            ]),
        ])]);

        let deliveries = parse_read_reply(reply, Queue::Ingest).unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].id, "1-0");
        assert_eq!(deliveries[0].payload, "{\"documentId\":1}");
        assert_eq!(deliveries[1].payload, "");
    }

    #[test]
    fn test_parse_read_reply_nil() {
        assert!(parse_read_reply(Value::Nil, Queue::Ingest).unwrap().is_empty());
    }

    #[test]
    fn test_parse_autoclaim_reply() {
        let reply = Value::Array(vec![
            bulk("0-0"),
            Value::Array(vec![
                Value::Array(vec![bulk("5-0"), Value::Array(vec![bulk("data"), bulk("p")])]),
                Value::Array(vec![bulk("6-0"), Value::Nil]),
            ]),
            Value::Array(vec![]),
        ]);

        let (next, deliveries) = parse_autoclaim_reply(reply, Queue::DeadLetter).unwrap();
        assert_eq!(next, "0-0");
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].queue, Queue::DeadLetter);
        assert_eq!(deliveries[0].delivery_count, 2);
        assert_eq!(deliveries[1].payload, "");
    }
}
