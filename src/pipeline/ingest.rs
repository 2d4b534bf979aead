//! Document ingestion: blob to text to chunks with embeddings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{EmbeddingError, PipelineError};
use crate::models::{
    ChunkMetadata, Document, DocumentStatus, IngestionConfig, IngestionTask, InvalidTransition,
    NewChunk,
};
use crate::services::blob_store::BlobStore;
use crate::services::broker::Delivery;
use crate::services::chunker::TokenTextSplitter;
use crate::services::document_store::DocumentStore;
use crate::services::embedding::Embedder;
use crate::services::extractor::TextExtractor;
use crate::services::guard::{IdempotencyGuard, MarkerToken};
use crate::utils::{collapse_newlines, truncate_chars};

use super::Disposition;

pub struct IngestionPipeline {
    guard: IdempotencyGuard,
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    splitter: TokenTextSplitter,
    embed_batch_size: usize,
    max_error_length: usize,
    /// Markers held by in-flight deliveries, keyed by delivery id.
    held: Mutex<HashMap<String, MarkerToken>>,
}

impl IngestionPipeline {
    pub fn new(
        guard: IdempotencyGuard,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        config: &IngestionConfig,
        embed_batch_size: usize,
    ) -> Self {
        Self {
            guard,
            store,
            blobs,
            extractor,
            embedder,
            splitter: TokenTextSplitter::new(config),
            embed_batch_size: embed_batch_size.max(1),
            max_error_length: config.max_error_length,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one delivery from the ingest queue.
    ///
    /// Never fails: every outcome is mapped to a [`Disposition`] after any
    /// state mutation it requires. The processing marker is released on every
    /// path that acquired it.
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let task = match delivery.decode() {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "undecodable ingestion task, dead-lettering"
                );
                return Disposition::DeadLetter;
            }
        };
        let document_id = task.document_id;

        let token = match self.guard.acquire(document_id).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!(
                    document_id,
                    delivery_id = %delivery.id,
                    "document already being processed, skipping duplicate delivery"
                );
                return Disposition::Ack;
            }
            Err(e) => {
                let err = PipelineError::from(e);
                tracing::error!(document_id, error = %err, "cannot acquire processing marker");
                self.record_failure(document_id, &err).await;
                return Disposition::DeadLetter;
            }
        };

        self.track(&delivery.id, Some(token.clone()));
        let disposition = self.run_guarded(&task, delivery).await;
        self.guard.release(&token).await;
        self.untrack(&delivery.id, &token);
        disposition
    }

    /// Mark the task's document failed and release its marker after the
    /// handler itself died.
    pub async fn abandon(&self, delivery: &Delivery, reason: &str) {
        let Ok(task) = delivery.decode() else {
            return;
        };
        let message = truncate_chars(reason, self.max_error_length);
        self.save_failure(task.document_id, message).await;
        if let Some(token) = self.track(&delivery.id, None) {
            self.guard.release(&token).await;
        }
    }

    /// Record (or with `None`, take back) the marker held for a delivery.
    fn track(&self, delivery_id: &str, token: Option<MarkerToken>) -> Option<MarkerToken> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        match token {
            Some(token) => held.insert(delivery_id.to_string(), token),
            None => held.remove(delivery_id),
        }
    }

    fn untrack(&self, delivery_id: &str, token: &MarkerToken) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.get(delivery_id) == Some(token) {
            held.remove(delivery_id);
        }
    }

    async fn run_guarded(&self, task: &IngestionTask, delivery: &Delivery) -> Disposition {
        let document_id = task.document_id;
        let document = match self.store.find_document(document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::error!(
                    document_id,
                    delivery_id = %delivery.id,
                    "ingestion task references a missing document, discarding"
                );
                return Disposition::Ack;
            }
            Err(e) => {
                let err = PipelineError::from(e);
                tracing::error!(document_id, error = %err, "document lookup failed");
                self.record_failure(document_id, &err).await;
                return Disposition::DeadLetter;
            }
        };

        if document.status.is_terminal() {
            tracing::info!(
                document_id,
                status = %document.status,
                delivery_id = %delivery.id,
                "document already settled, skipping redelivery"
            );
            return Disposition::Ack;
        }

        match self.process(task, document).await {
            Ok(chunks) => {
                tracing::info!(document_id, chunks, "document ingested");
                Disposition::Ack
            }
            Err(err) => {
                tracing::error!(
                    document_id,
                    delivery_id = %delivery.id,
                    error = %err,
                    "document ingestion failed"
                );
                self.record_failure(document_id, &err).await;
                Disposition::DeadLetter
            }
        }
    }

    /// Extract, chunk, embed and store one document. Returns the chunk count.
    ///
    /// The old chunk set is replaced inside a single [`ChunkWriter`] so a
    /// failure before commit leaves it untouched.
    ///
    /// [`ChunkWriter`]: crate::services::document_store::ChunkWriter
    pub async fn process(
        &self,
        task: &IngestionTask,
        mut document: Document,
    ) -> Result<usize, PipelineError> {
        transition(&mut document, DocumentStatus::Processing)?;
        self.store.save_document(&document).await?;

        let reader = self.blobs.open_stream(&task.blob_key).await?;
        let text = self
            .extractor
            .extract(reader, &document.filename, document.content_type.as_deref())
            .await?;

        let cleaned = collapse_newlines(&text);
        let segments = self.splitter.split(&cleaned);
        if segments.is_empty() {
            return Err(PipelineError::EmptyContent(document.id));
        }

        let mut writer = self.store.begin_chunk_replacement(document.id).await?;
        if writer.replaced() > 0 {
            tracing::debug!(
                document_id = document.id,
                replaced = writer.replaced(),
                "replacing existing chunks"
            );
        }

        let mut chunk_index: u32 = 0;
        for batch in segments.chunks(self.embed_batch_size) {
            let embeddings = self.embedder.embed_batch(batch).await?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                ))
                .into());
            }

            for (content, embedding) in batch.iter().zip(embeddings) {
                writer
                    .insert(NewChunk {
                        document_id: document.id,
                        chunk_index,
                        content: content.clone(),
                        metadata: ChunkMetadata::new(&document, chunk_index),
                        embedding,
                    })
                    .await?;
                chunk_index += 1;
            }
        }
        let inserted = writer.commit().await?;

        transition(&mut document, DocumentStatus::Completed)?;
        self.store.save_document(&document).await?;

        Ok(inserted as usize)
    }

    async fn record_failure(&self, document_id: i64, err: &PipelineError) {
        let message = truncate_chars(&err.to_string(), self.max_error_length);
        self.save_failure(document_id, message).await;
    }

    /// Reload the document and persist it as `FAILED`; problems are logged.
    async fn save_failure(&self, document_id: i64, message: String) {
        let mut document = match self.store.find_document(document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::warn!(document_id, "cannot mark missing document as failed");
                return;
            }
            Err(e) => {
                tracing::error!(document_id, error = %e, "cannot reload document to mark it failed");
                return;
            }
        };

        if let Err(InvalidTransition { from, .. }) = document.fail(message) {
            tracing::warn!(document_id, status = %from, "document not marked failed from this status");
            return;
        }
        if let Err(e) = self.store.save_document(&document).await {
            tracing::error!(document_id, error = %e, "failed to persist FAILED status");
        }
    }
}

fn transition(document: &mut Document, next: DocumentStatus) -> Result<(), PipelineError> {
    let document_id = document.id;
    document
        .transition(next)
        .map_err(|InvalidTransition { from, to }| PipelineError::InvalidTransition {
            document_id,
            from: from.to_string(),
            to: to.to_string(),
        })
}
