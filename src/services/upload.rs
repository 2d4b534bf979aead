//! Upload registration and document management.
//!
//! Registration is the producer side of the ingestion queue: the blob is
//! stored, the document row is registered as `PENDING`, and exactly one
//! ingestion task is enqueued. A failed enqueue leaves a `PENDING` row with no
//! task; it is reported as [`UploadError::Enqueue`] and can be fixed with
//! [`DocumentService::requeue`].

use std::sync::Arc;

use crate::error::{StoreError, UploadError};
use crate::models::{
    Document, DocumentOutcome, DocumentStatus, IngestionTask, NewDocument, RequestContext,
    UploadOutcome,
};
use crate::services::blob_store::{BlobStore, storage_key};
use crate::services::broker::TaskBroker;
use crate::services::document_store::DocumentStore;
use crate::utils::calculate_checksum;

/// One uploaded file as received from the caller.
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    pub filename: &'a str,
    pub bytes: &'a [u8],
    pub content_type: Option<&'a str>,
    /// Target permission group; defaults to the caller's first role.
    pub permission_group: Option<&'a str>,
}

pub struct DocumentService {
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn DocumentStore>,
    broker: Arc<dyn TaskBroker>,
}

impl DocumentService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn DocumentStore>,
        broker: Arc<dyn TaskBroker>,
    ) -> Self {
        Self {
            blobs,
            store,
            broker,
        }
    }

    pub async fn register(
        &self,
        ctx: &RequestContext,
        upload: Upload<'_>,
    ) -> Result<UploadOutcome, UploadError> {
        let Some(user_id) = ctx.user_id() else {
            tracing::info!("upload refused: caller is not signed in");
            return Ok(UploadOutcome::Unauthorized);
        };
        let Some(first_role) = ctx.roles().first() else {
            tracing::info!(user_id, "upload refused: caller has no roles");
            return Ok(UploadOutcome::Unauthorized);
        };

        let permission_group = match upload.permission_group {
            Some(group) if ctx.has_role(group) => group.to_string(),
            Some(group) => {
                tracing::info!(user_id, permission_group = group, "upload refused: group not granted");
                return Ok(UploadOutcome::Forbidden {
                    permission_group: group.to_string(),
                });
            }
            None => first_role.clone(),
        };

        if upload.bytes.is_empty() {
            return Ok(UploadOutcome::Empty);
        }

        let content_hash = calculate_checksum(upload.bytes);
        if self
            .store
            .exists_by_hash_and_group(&content_hash, &permission_group)
            .await?
        {
            tracing::info!(
                permission_group = %permission_group,
                content_hash = %content_hash,
                "duplicate upload skipped"
            );
            return Ok(UploadOutcome::Duplicate {
                permission_group,
                content_hash,
            });
        }

        let key = storage_key(&permission_group, &content_hash, upload.filename);
        let key = self.blobs.put(&key, upload.bytes).await?;

        let new_document = NewDocument {
            filename: upload.filename.to_string(),
            storage_key: key.clone(),
            file_size: upload.bytes.len() as i64,
            content_type: upload.content_type.map(str::to_string),
            content_hash,
            permission_group,
        };
        let document = match self.store.insert_document(new_document).await {
            Ok(document) => document,
            // Lost a race with an identical upload in the same group.
            Err(StoreError::Duplicate {
                permission_group,
                content_hash,
            }) => {
                self.discard_unreferenced_blob(&key).await;
                return Ok(UploadOutcome::Duplicate {
                    permission_group,
                    content_hash,
                });
            }
            Err(e) => {
                self.discard_unreferenced_blob(&key).await;
                return Err(e.into());
            }
        };

        let task = IngestionTask {
            document_id: document.id,
            blob_key: key,
            user_id,
            permission_group: document.permission_group.clone(),
        };
        if let Err(source) = self.broker.publish(&task).await {
            tracing::error!(
                document_id = document.id,
                error = %source,
                "document registered but ingestion task was not enqueued"
            );
            return Err(UploadError::Enqueue {
                document_id: document.id,
                source,
            });
        }

        tracing::info!(
            document_id = document.id,
            permission_group = %document.permission_group,
            file_size = document.file_size,
            "document registered for ingestion"
        );
        Ok(UploadOutcome::Accepted { document })
    }

    /// Documents visible to the caller, newest first.
    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<Document>, UploadError> {
        if !ctx.has_roles() {
            return Ok(Vec::new());
        }
        Ok(self.store.list_documents(ctx.roles()).await?)
    }

    pub async fn show(
        &self,
        ctx: &RequestContext,
        document_id: i64,
    ) -> Result<DocumentOutcome, UploadError> {
        Ok(match self.visible_document(ctx, document_id).await? {
            Ok(document) => DocumentOutcome::Done { document },
            Err(outcome) => outcome,
        })
    }

    /// Remove chunks, then the document row, then its blob.
    ///
    /// A document still being processed is refused.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        document_id: i64,
    ) -> Result<DocumentOutcome, UploadError> {
        let document = match self.visible_document(ctx, document_id).await? {
            Ok(document) => document,
            Err(outcome) => return Ok(outcome),
        };
        if document.status == DocumentStatus::Processing {
            return Ok(DocumentOutcome::Refused {
                document,
                reason: "document is being processed".to_string(),
            });
        }

        let chunks_deleted = self.store.delete_chunks_by_document_id(document_id).await?;
        if !self.store.delete_document(document_id).await? {
            return Ok(DocumentOutcome::NotFound { document_id });
        }
        if let Err(e) = self.blobs.delete(&document.storage_key).await {
            tracing::error!(
                document_id,
                storage_key = %document.storage_key,
                error = %e,
                "document deleted but its blob was not"
            );
        }

        tracing::info!(document_id, chunks_deleted, "document deleted");
        Ok(DocumentOutcome::Done { document })
    }

    /// Republish the ingestion task of a document that is still `PENDING`.
    pub async fn requeue(
        &self,
        ctx: &RequestContext,
        document_id: i64,
    ) -> Result<DocumentOutcome, UploadError> {
        let Some(user_id) = ctx.user_id() else {
            return Ok(DocumentOutcome::Unauthorized);
        };
        let document = match self.visible_document(ctx, document_id).await? {
            Ok(document) => document,
            Err(outcome) => return Ok(outcome),
        };
        if document.status != DocumentStatus::Pending {
            let reason = format!("only PENDING documents can be requeued, status is {}", document.status);
            return Ok(DocumentOutcome::Refused { document, reason });
        }

        let task = IngestionTask {
            document_id,
            blob_key: document.storage_key.clone(),
            user_id,
            permission_group: document.permission_group.clone(),
        };
        let message_id = self.broker.publish(&task).await?;
        tracing::info!(document_id, message_id = %message_id, "ingestion task requeued");
        Ok(DocumentOutcome::Done { document })
    }

    /// Delete a blob written by a registration that produced no row, unless
    /// another document stored the same key. Problems are logged.
    async fn discard_unreferenced_blob(&self, key: &str) {
        match self.store.storage_key_in_use(key).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(storage_key = %key, error = %e, "cannot check blob ownership, keeping blob");
                return;
            }
        }
        match self.blobs.delete(key).await {
            Ok(_) => tracing::debug!(storage_key = %key, "discarded blob of unregistered upload"),
            Err(e) => tracing::warn!(storage_key = %key, error = %e, "failed to discard orphaned blob"),
        }
    }

    /// The document if the caller may see it, else the outcome to report.
    async fn visible_document(
        &self,
        ctx: &RequestContext,
        document_id: i64,
    ) -> Result<Result<Document, DocumentOutcome>, UploadError> {
        if !ctx.has_roles() {
            return Ok(Err(DocumentOutcome::Unauthorized));
        }
        let Some(document) = self.store.find_document(document_id).await? else {
            return Ok(Err(DocumentOutcome::NotFound { document_id }));
        };
        if !ctx.has_role(&document.permission_group) {
            return Ok(Err(DocumentOutcome::Forbidden { document_id }));
        }
        Ok(Ok(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::models::RetrievedChunk;
    use crate::services::blob_store::MemoryBlobStore;
    use crate::services::broker::{MemoryBroker, Queue};
    use crate::services::document_store::{ChunkWriter, MemoryDocumentStore};

    /// Skips the duplicate pre-check, as when a concurrent upload wins the
    /// insert, and can fail inserts outright.
    #[derive(Clone)]
    struct RacingStore {
        inner: MemoryDocumentStore,
        fail_insert: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DocumentStore for RacingStore {
        async fn health_check(&self) -> Result<(), StoreError> {
            self.inner.health_check().await
        }

        async fn insert_document(&self, document: NewDocument) -> Result<Document, StoreError> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(StoreError::QueryError("connection reset".to_string()));
            }
            self.inner.insert_document(document).await
        }

        async fn find_document(&self, id: i64) -> Result<Option<Document>, StoreError> {
            self.inner.find_document(id).await
        }

        async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
            self.inner.save_document(document).await
        }

        async fn exists_by_hash_and_group(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn storage_key_in_use(&self, storage_key: &str) -> Result<bool, StoreError> {
            self.inner.storage_key_in_use(storage_key).await
        }

        async fn list_documents(&self, groups: &[String]) -> Result<Vec<Document>, StoreError> {
            self.inner.list_documents(groups).await
        }

        async fn count_by_status(&self) -> Result<Vec<(DocumentStatus, i64)>, StoreError> {
            self.inner.count_by_status().await
        }

        async fn count_chunks(&self, document_id: i64) -> Result<u64, StoreError> {
            self.inner.count_chunks(document_id).await
        }

        async fn delete_chunks_by_document_id(&self, document_id: i64) -> Result<u64, StoreError> {
            self.inner.delete_chunks_by_document_id(document_id).await
        }

        async fn delete_document(&self, document_id: i64) -> Result<bool, StoreError> {
            self.inner.delete_document(document_id).await
        }

        async fn begin_chunk_replacement(
            &self,
            document_id: i64,
        ) -> Result<Box<dyn ChunkWriter>, StoreError> {
            self.inner.begin_chunk_replacement(document_id).await
        }

        async fn nearest_chunks(
            &self,
            vector: &[f32],
            groups: &[String],
            top_k: usize,
        ) -> Result<Vec<RetrievedChunk>, StoreError> {
            self.inner.nearest_chunks(vector, groups, top_k).await
        }
    }

    fn racing_fixture() -> (MemoryBlobStore, RacingStore, DocumentService) {
        let blobs = MemoryBlobStore::new();
        let store = RacingStore {
            inner: MemoryDocumentStore::new(4),
            fail_insert: Arc::new(AtomicBool::new(false)),
        };
        let service = DocumentService::new(
            Arc::new(blobs.clone()),
            Arc::new(store.clone()),
            Arc::new(MemoryBroker::new()),
        );
        (blobs, store, service)
    }

    fn named<'a>(filename: &'a str, bytes: &'a [u8]) -> Upload<'a> {
        Upload {
            filename,
            bytes,
            content_type: None,
            permission_group: Some("hr"),
        }
    }

    struct Fixture {
        blobs: MemoryBlobStore,
        store: MemoryDocumentStore,
        broker: MemoryBroker,
        service: DocumentService,
    }

    fn fixture() -> Fixture {
        let blobs = MemoryBlobStore::new();
        let store = MemoryDocumentStore::new(4);
        let broker = MemoryBroker::new();
        let service = DocumentService::new(
            Arc::new(blobs.clone()),
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
        );
        Fixture {
            blobs,
            store,
            broker,
            service,
        }
    }

    fn upload<'a>(bytes: &'a [u8], group: Option<&'a str>) -> Upload<'a> {
        Upload {
            filename: "leave policy.txt",
            bytes,
            content_type: Some("text/plain"),
            permission_group: group,
        }
    }

    fn hr() -> RequestContext {
        RequestContext::new(Some(3), vec!["hr", "eng"])
    }

    #[tokio::test]
    async fn test_register_accepts_and_enqueues() {
        let f = fixture();
        let outcome = f.service.register(&hr(), upload(b"hello", None)).await.unwrap();
        let UploadOutcome::Accepted { document } = outcome else {
            panic!("expected accepted, got {outcome:?}");
        };
        assert_eq!(document.status, DocumentStatus::Pending);
        assert_eq!(document.permission_group, "hr");
        assert!(document.storage_key.starts_with("kb-docs/hr/"));
        assert!(document.storage_key.ends_with("_leave policy.txt"));
        assert!(f.blobs.contains(&document.storage_key).await);

        let delivery = f.broker.next_delivery(Queue::Ingest).await.unwrap();
        let task = delivery.decode().unwrap();
        assert_eq!(task.document_id, document.id);
        assert_eq!(task.user_id, 3);
        assert_eq!(task.blob_key, document.storage_key);
    }

    #[tokio::test]
    async fn test_register_refusals() {
        let f = fixture();
        let anonymous = RequestContext::new(None, vec!["hr"]);
        assert_eq!(
            f.service.register(&anonymous, upload(b"x", None)).await.unwrap(),
            UploadOutcome::Unauthorized
        );
        let no_roles = RequestContext::new(Some(1), Vec::<String>::new());
        assert_eq!(
            f.service.register(&no_roles, upload(b"x", None)).await.unwrap(),
            UploadOutcome::Unauthorized
        );
        assert_eq!(
            f.service.register(&hr(), upload(b"x", Some("finance"))).await.unwrap(),
            UploadOutcome::Forbidden {
                permission_group: "finance".to_string()
            }
        );
        assert_eq!(
            f.service.register(&hr(), upload(b"", None)).await.unwrap(),
            UploadOutcome::Empty
        );
        assert_eq!(f.store.document_count().await, 0);
        assert!(f.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_is_per_group() {
        let f = fixture();
        let first = f.service.register(&hr(), upload(b"same", None)).await.unwrap();
        assert!(matches!(first, UploadOutcome::Accepted { .. }));

        let again = f.service.register(&hr(), upload(b"same", Some("hr"))).await.unwrap();
        assert!(matches!(again, UploadOutcome::Duplicate { ref permission_group, .. } if permission_group == "hr"));

        let other = f.service.register(&hr(), upload(b"same", Some("eng"))).await.unwrap();
        assert!(matches!(other, UploadOutcome::Accepted { .. }));
        assert_eq!(f.store.document_count().await, 2);
        assert_eq!(f.broker.ready_len(Queue::Ingest).await, 2);
    }

    #[tokio::test]
    async fn test_lost_race_discards_blob_under_other_name() {
        let (blobs, _, service) = racing_fixture();
        let winner = service.register(&hr(), named("a.txt", b"same bytes")).await.unwrap();
        let UploadOutcome::Accepted { document } = winner else {
            panic!("expected accepted, got {winner:?}");
        };

        let loser = service.register(&hr(), named("b.txt", b"same bytes")).await.unwrap();
        assert!(matches!(loser, UploadOutcome::Duplicate { .. }));
        assert_eq!(blobs.len().await, 1);
        assert!(blobs.contains(&document.storage_key).await);
    }

    #[tokio::test]
    async fn test_lost_race_keeps_shared_blob() {
        let (blobs, _, service) = racing_fixture();
        let winner = service.register(&hr(), named("a.txt", b"same bytes")).await.unwrap();
        let UploadOutcome::Accepted { document } = winner else {
            panic!("expected accepted, got {winner:?}");
        };

        let loser = service.register(&hr(), named("a.txt", b"same bytes")).await.unwrap();
        assert!(matches!(loser, UploadOutcome::Duplicate { .. }));
        assert!(blobs.contains(&document.storage_key).await);
    }

    #[tokio::test]
    async fn test_failed_insert_discards_blob() {
        let (blobs, store, service) = racing_fixture();
        store.fail_insert.store(true, Ordering::SeqCst);

        let err = service.register(&hr(), named("a.txt", b"bytes")).await.unwrap_err();
        assert!(matches!(err, UploadError::Store(_)));
        assert!(blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_enqueue_failure_reported_and_requeue() {
        let f = fixture();
        f.broker.set_fail_publish(true);
        let err = f
            .service
            .register(&hr(), upload(b"payload", None))
            .await
            .unwrap_err();
        let UploadError::Enqueue { document_id, .. } = err else {
            panic!("expected enqueue error, got {err:?}");
        };
        let document = f.store.find_document(document_id).await.unwrap().unwrap();
        assert_eq!(document.status, DocumentStatus::Pending);
        assert_eq!(f.broker.ready_len(Queue::Ingest).await, 0);

        f.broker.set_fail_publish(false);
        let outcome = f.service.requeue(&hr(), document_id).await.unwrap();
        assert!(matches!(outcome, DocumentOutcome::Done { .. }));
        assert_eq!(f.broker.ready_len(Queue::Ingest).await, 1);
    }

    #[tokio::test]
    async fn test_requeue_refuses_non_pending() {
        let f = fixture();
        let UploadOutcome::Accepted { mut document } =
            f.service.register(&hr(), upload(b"doc", None)).await.unwrap()
        else {
            panic!("expected accepted");
        };
        document.transition(DocumentStatus::Processing).unwrap();
        document.transition(DocumentStatus::Completed).unwrap();
        f.store.save_document(&document).await.unwrap();

        let outcome = f.service.requeue(&hr(), document.id).await.unwrap();
        assert!(matches!(outcome, DocumentOutcome::Refused { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_blob() {
        let f = fixture();
        let UploadOutcome::Accepted { document } =
            f.service.register(&hr(), upload(b"doc", None)).await.unwrap()
        else {
            panic!("expected accepted");
        };

        let eng_only = RequestContext::new(Some(9), vec!["eng"]);
        assert_eq!(
            f.service.delete(&eng_only, document.id).await.unwrap(),
            DocumentOutcome::Forbidden {
                document_id: document.id
            }
        );

        let outcome = f.service.delete(&hr(), document.id).await.unwrap();
        assert!(matches!(outcome, DocumentOutcome::Done { .. }));
        assert!(f.store.find_document(document.id).await.unwrap().is_none());
        assert!(!f.blobs.contains(&document.storage_key).await);
        assert_eq!(
            f.service.show(&hr(), document.id).await.unwrap(),
            DocumentOutcome::NotFound {
                document_id: document.id
            }
        );
    }

    #[tokio::test]
    async fn test_list_scoped_to_roles() {
        let f = fixture();
        f.service.register(&hr(), upload(b"a", Some("hr"))).await.unwrap();
        f.service.register(&hr(), upload(b"b", Some("eng"))).await.unwrap();

        let hr_only = RequestContext::new(Some(1), vec!["hr"]);
        let listed = f.service.list(&hr_only).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].permission_group, "hr");
        assert!(f.service.list(&RequestContext::anonymous()).await.unwrap().is_empty());
    }
}
