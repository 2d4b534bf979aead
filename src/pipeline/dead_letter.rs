use crate::services::broker::Delivery;

use super::Disposition;

/// Terminal consumer of the dead-letter queue.
///
/// Records each failed task for operators and always acknowledges it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadLetterSink;

impl DeadLetterSink {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, delivery: &Delivery) -> Disposition {
        match delivery.decode() {
            Ok(task) => tracing::error!(
                document_id = task.document_id,
                blob_key = %task.blob_key,
                permission_group = %task.permission_group,
                user_id = task.user_id,
                delivery_id = %delivery.id,
                "ingestion task dead-lettered"
            ),
            Err(e) => tracing::error!(
                delivery_id = %delivery.id,
                payload_len = delivery.payload.len(),
                error = %e,
                "undecodable message dead-lettered"
            ),
        }
        Disposition::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::broker::Queue;

    #[test]
    fn test_always_acks() {
        let sink = DeadLetterSink::new();
        let good = Delivery {
            id: "1-0".to_string(),
            queue: Queue::DeadLetter,
            payload: r#"{"documentId":1,"blobKey":"k","userId":2,"permissionGroup":"hr"}"#
                .to_string(),
            delivery_count: 1,
        };
        let poison = Delivery {
            payload: "garbage".to_string(),
            ..good.clone()
        };
        assert_eq!(sink.handle(&good), Disposition::Ack);
        assert_eq!(sink.handle(&poison), Disposition::Ack);
    }
}
