//! Relational store for documents and their vector chunks.
//!
//! Chunk replacement for a document runs through a [`ChunkWriter`]: the
//! writer opens a transaction, deletes the document's existing chunks, and
//! buffers inserts until [`ChunkWriter::commit`]. Dropping a writer without
//! committing rolls the whole replacement back, so readers see either the old
//! chunk set or the new one.

mod memory;
mod pgvector;

pub use memory::MemoryDocumentStore;
pub use pgvector::PgDocumentStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Document, DocumentStatus, NewChunk, NewDocument, RetrievedChunk};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Register a document; the store assigns id and creation time.
    ///
    /// Fails with [`StoreError::Duplicate`] when the (group, hash) pair exists.
    async fn insert_document(&self, document: NewDocument) -> Result<Document, StoreError>;

    async fn find_document(&self, id: i64) -> Result<Option<Document>, StoreError>;

    /// Persist status and error message of an existing document.
    async fn save_document(&self, document: &Document) -> Result<(), StoreError>;

    async fn exists_by_hash_and_group(
        &self,
        content_hash: &str,
        permission_group: &str,
    ) -> Result<bool, StoreError>;

    /// Whether any document row points at blob `storage_key`.
    async fn storage_key_in_use(&self, storage_key: &str) -> Result<bool, StoreError>;

    /// Documents whose permission group is in `groups`, newest first.
    async fn list_documents(&self, groups: &[String]) -> Result<Vec<Document>, StoreError>;

    async fn count_by_status(&self) -> Result<Vec<(DocumentStatus, i64)>, StoreError>;

    async fn count_chunks(&self, document_id: i64) -> Result<u64, StoreError>;

    async fn delete_chunks_by_document_id(&self, document_id: i64) -> Result<u64, StoreError>;

    /// Remove the document row (chunks cascade). Returns false if it did not exist.
    async fn delete_document(&self, document_id: i64) -> Result<bool, StoreError>;

    /// Start replacing the chunk set of `document_id`.
    async fn begin_chunk_replacement(
        &self,
        document_id: i64,
    ) -> Result<Box<dyn ChunkWriter>, StoreError>;

    /// Chunks closest to `vector` by L2 distance among documents in `groups`.
    async fn nearest_chunks(
        &self,
        vector: &[f32],
        groups: &[String],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError>;
}

/// One in-progress chunk replacement.
#[async_trait]
pub trait ChunkWriter: Send {
    /// Number of chunks removed when the replacement started.
    fn replaced(&self) -> u64;

    async fn insert(&mut self, chunk: NewChunk) -> Result<(), StoreError>;

    /// Make the new chunk set visible. Returns the number of inserted chunks.
    async fn commit(self: Box<Self>) -> Result<u64, StoreError>;
}

pub(crate) fn check_dimension(vector: &[f32], expected: usize) -> Result<(), StoreError> {
    if vector.len() != expected {
        return Err(StoreError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}
