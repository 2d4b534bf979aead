//! Cross-process processing marker for ingestion tasks.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::KvError;
use crate::services::kv_store::KeyValueStore;

const MARKER_PREFIX: &str = "kb:process:";
const MARKER_VALUE: &str = "PROCESSING";

pub fn marker_key(document_id: i64) -> String {
    format!("{MARKER_PREFIX}{document_id}")
}

/// Proof that one attempt holds the marker of `document_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerToken {
    document_id: i64,
    value: String,
}

impl MarkerToken {
    pub fn document_id(&self) -> i64 {
        self.document_id
    }

    /// Stored marker value, `PROCESSING:{attempt}`.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// At most one holder per document id across every worker sharing the store.
///
/// The marker expires after `ttl` so a crashed holder cannot block a document
/// forever. Only the attempt that acquired the marker may release it: once it
/// has lapsed and been taken by another attempt, a late release is a no-op.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Returns `None` when another attempt holds the marker.
    pub async fn acquire(&self, document_id: i64) -> Result<Option<MarkerToken>, KvError> {
        let token = MarkerToken {
            document_id,
            value: format!("{MARKER_VALUE}:{}", Uuid::new_v4().simple()),
        };
        let acquired = self
            .store
            .set_if_absent(&marker_key(document_id), &token.value, self.ttl)
            .await?;
        if !acquired {
            return Ok(None);
        }
        tracing::debug!(document_id, "processing marker acquired");
        Ok(Some(token))
    }

    /// Failures are logged; the marker then lapses with its ttl.
    pub async fn release(&self, token: &MarkerToken) {
        let document_id = token.document_id;
        match self
            .store
            .delete_if_equals(&marker_key(document_id), &token.value)
            .await
        {
            Ok(true) => tracing::debug!(document_id, "processing marker released"),
            Ok(false) => tracing::warn!(
                document_id,
                "processing marker expired before release, left to its current holder"
            ),
            Err(e) => tracing::warn!(
                document_id,
                error = %e,
                "failed to release processing marker"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv_store::MemoryKeyValueStore;

    #[test]
    fn test_marker_key() {
        assert_eq!(marker_key(42), "kb:process:42");
    }

    #[tokio::test]
    async fn test_single_holder() {
        let store = MemoryKeyValueStore::new();
        let guard = IdempotencyGuard::new(Arc::new(store.clone()), Duration::from_secs(3600));

        let token = guard.acquire(7).await.unwrap().unwrap();
        assert!(guard.acquire(7).await.unwrap().is_none());
        assert!(guard.acquire(8).await.unwrap().is_some());

        let stored = store.get("kb:process:7").await.unwrap().unwrap();
        assert_eq!(stored, token.value());
        assert!(stored.starts_with("PROCESSING:"));

        guard.release(&token).await;
        assert!(guard.acquire(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_attempts_get_distinct_tokens() {
        let store = MemoryKeyValueStore::new();
        let guard = IdempotencyGuard::new(Arc::new(store), Duration::from_secs(60));
        let first = guard.acquire(1).await.unwrap().unwrap();
        guard.release(&first).await;
        let second = guard.acquire(1).await.unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(second.document_id(), 1);
    }

    #[tokio::test]
    async fn test_marker_expires() {
        let store = MemoryKeyValueStore::new();
        let guard = IdempotencyGuard::new(Arc::new(store), Duration::from_millis(10));
        assert!(guard.acquire(1).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(guard.acquire(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_late_release_keeps_new_holder() {
        let store = MemoryKeyValueStore::new();
        let short = IdempotencyGuard::new(Arc::new(store.clone()), Duration::from_millis(10));
        let long = IdempotencyGuard::new(Arc::new(store.clone()), Duration::from_secs(60));

        let stale = short.acquire(5).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let current = long.acquire(5).await.unwrap().unwrap();

        short.release(&stale).await;
        assert!(long.acquire(5).await.unwrap().is_none());
        assert_eq!(
            store.get("kb:process:5").await.unwrap().as_deref(),
            Some(current.value())
        );

        long.release(&current).await;
        assert!(long.acquire(5).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = MemoryKeyValueStore::new();
        let guard = IdempotencyGuard::new(Arc::new(store.clone()), Duration::from_secs(60));
        let token = guard.acquire(1).await.unwrap().unwrap();
        store.set_unavailable(true);
        assert!(guard.acquire(2).await.is_err());
        guard.release(&token).await;
    }
}
