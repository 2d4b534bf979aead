use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{ChunkWriter, DocumentStore, check_dimension};
use crate::error::StoreError;
use crate::models::{Document, DocumentStatus, NewChunk, NewDocument, RetrievedChunk};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    documents: BTreeMap<i64, Document>,
    chunks: HashMap<i64, Vec<NewChunk>>,
    commits: HashMap<i64, u64>,
}

/// In-process document store with the same transactional guarantees as the
/// PostgreSQL adapter: a chunk replacement becomes visible only on commit.
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
    embedding_dim: usize,
    /// Chunk index whose insert fails, or -1.
    fail_insert_at: Arc<AtomicI64>,
}

impl MemoryDocumentStore {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            embedding_dim,
            fail_insert_at: Arc::new(AtomicI64::new(-1)),
        }
    }

    /// Make the insert of chunk `index` fail in every later replacement.
    pub fn fail_chunk_insert_at(&self, index: Option<u32>) {
        let value = index.map(i64::from).unwrap_or(-1);
        self.fail_insert_at.store(value, Ordering::SeqCst);
    }

    /// Committed chunks of a document, in index order.
    pub async fn chunks(&self, document_id: i64) -> Vec<NewChunk> {
        let inner = self.inner.lock().await;
        let mut chunks = inner.chunks.get(&document_id).cloned().unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        chunks
    }

    /// Number of committed chunk replacements for a document.
    pub async fn commit_count(&self, document_id: i64) -> u64 {
        let inner = self.inner.lock().await;
        inner.commits.get(&document_id).copied().unwrap_or(0)
    }

    pub async fn document_count(&self) -> usize {
        self.inner.lock().await.documents.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_document(&self, document: NewDocument) -> Result<Document, StoreError> {
        let mut inner = self.inner.lock().await;
        let exists = inner.documents.values().any(|d| {
            d.permission_group == document.permission_group
                && d.content_hash == document.content_hash
        });
        if exists {
            return Err(StoreError::Duplicate {
                permission_group: document.permission_group,
                content_hash: document.content_hash,
            });
        }

        inner.next_id += 1;
        let stored = Document {
            id: inner.next_id,
            filename: document.filename,
            storage_key: document.storage_key,
            file_size: document.file_size,
            content_type: document.content_type,
            content_hash: document.content_hash,
            permission_group: document.permission_group,
            status: DocumentStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
        };
        inner.documents.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_document(&self, id: i64) -> Result<Option<Document>, StoreError> {
        Ok(self.inner.lock().await.documents.get(&id).cloned())
    }

    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .documents
            .get_mut(&document.id)
            .ok_or(StoreError::NotFound(document.id))?;
        stored.status = document.status;
        stored.error_message = document.error_message.clone();
        Ok(())
    }

    async fn exists_by_hash_and_group(
        &self,
        content_hash: &str,
        permission_group: &str,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .documents
            .values()
            .any(|d| d.content_hash == content_hash && d.permission_group == permission_group))
    }

    async fn storage_key_in_use(&self, storage_key: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.documents.values().any(|d| d.storage_key == storage_key))
    }

    async fn list_documents(&self, groups: &[String]) -> Result<Vec<Document>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .documents
            .values()
            .rev()
            .filter(|d| groups.contains(&d.permission_group))
            .cloned()
            .collect())
    }

    async fn count_by_status(&self) -> Result<Vec<(DocumentStatus, i64)>, StoreError> {
        let inner = self.inner.lock().await;
        let mut counts: BTreeMap<&'static str, (DocumentStatus, i64)> = BTreeMap::new();
        for doc in inner.documents.values() {
            counts.entry(doc.status.as_str()).or_insert((doc.status, 0)).1 += 1;
        }
        Ok(counts.into_values().collect())
    }

    async fn count_chunks(&self, document_id: i64) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.chunks.get(&document_id).map_or(0, |c| c.len() as u64))
    }

    async fn delete_chunks_by_document_id(&self, document_id: i64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .chunks
            .remove(&document_id)
            .map_or(0, |c| c.len() as u64))
    }

    async fn delete_document(&self, document_id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.chunks.remove(&document_id);
        Ok(inner.documents.remove(&document_id).is_some())
    }

    async fn begin_chunk_replacement(
        &self,
        document_id: i64,
    ) -> Result<Box<dyn ChunkWriter>, StoreError> {
        let replaced = self.count_chunks(document_id).await?;
        Ok(Box::new(MemoryChunkWriter {
            store: self.clone(),
            document_id,
            replaced,
            pending: Vec::new(),
        }))
    }

    async fn nearest_chunks(
        &self,
        vector: &[f32],
        groups: &[String],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        check_dimension(vector, self.embedding_dim)?;
        let inner = self.inner.lock().await;

        let mut results: Vec<RetrievedChunk> = inner
            .chunks
            .iter()
            .filter(|(id, _)| {
                inner
                    .documents
                    .get(*id)
                    .is_some_and(|d| groups.contains(&d.permission_group))
            })
            .flat_map(|(_, chunks)| chunks.iter())
            .map(|chunk| RetrievedChunk {
                document_id: chunk.document_id,
                chunk_index: chunk.chunk_index,
                content: chunk.content.clone(),
                distance: l2_distance(vector, &chunk.embedding),
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.document_id.cmp(&b.document_id))
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        results.truncate(top_k);
        Ok(results)
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

struct MemoryChunkWriter {
    store: MemoryDocumentStore,
    document_id: i64,
    replaced: u64,
    pending: Vec<NewChunk>,
}

#[async_trait]
impl ChunkWriter for MemoryChunkWriter {
    fn replaced(&self) -> u64 {
        self.replaced
    }

    async fn insert(&mut self, chunk: NewChunk) -> Result<(), StoreError> {
        check_dimension(&chunk.embedding, self.store.embedding_dim)?;
        let fail_at = self.store.fail_insert_at.load(Ordering::SeqCst);
        if fail_at >= 0 && i64::from(chunk.chunk_index) == fail_at {
            return Err(StoreError::TransactionError(format!(
                "injected failure at chunk {}",
                chunk.chunk_index
            )));
        }
        self.pending.push(chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<u64, StoreError> {
        let MemoryChunkWriter {
            store,
            document_id,
            pending,
            ..
        } = *self;

        let mut inner = store.inner.lock().await;
        if !inner.documents.contains_key(&document_id) {
            return Err(StoreError::NotFound(document_id));
        }
        let inserted = pending.len() as u64;
        inner.chunks.insert(document_id, pending);
        *inner.commits.entry(document_id).or_insert(0) += 1;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn new_document(group: &str, hash: &str) -> NewDocument {
        NewDocument {
            filename: "a.txt".to_string(),
            storage_key: format!("kb-docs/{group}/{hash}_a.txt"),
            file_size: 3,
            content_type: None,
            content_hash: hash.to_string(),
            permission_group: group.to_string(),
        }
    }

    fn chunk(doc: &Document, index: u32, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            document_id: doc.id,
            chunk_index: index,
            content: format!("chunk {index}"),
            metadata: ChunkMetadata::new(doc, index),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_duplicate_within_group_only() {
        let store = MemoryDocumentStore::new(2);
        store.insert_document(new_document("hr", "abc")).await.unwrap();
        assert!(matches!(
            store.insert_document(new_document("hr", "abc")).await,
            Err(StoreError::Duplicate { .. })
        ));
        assert!(store.insert_document(new_document("eng", "abc")).await.is_ok());
    }

    #[tokio::test]
    async fn test_uncommitted_replacement_is_invisible() {
        let store = MemoryDocumentStore::new(2);
        let doc = store.insert_document(new_document("hr", "h1")).await.unwrap();

        let mut writer = store.begin_chunk_replacement(doc.id).await.unwrap();
        writer.insert(chunk(&doc, 0, vec![0.0, 1.0])).await.unwrap();
        writer.commit().await.unwrap();

        let mut writer = store.begin_chunk_replacement(doc.id).await.unwrap();
        assert_eq!(writer.replaced(), 1);
        writer.insert(chunk(&doc, 0, vec![1.0, 1.0])).await.unwrap();
        drop(writer);

        let chunks = store.chunks(doc.id).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_nearest_filters_by_group_and_orders() {
        let store = MemoryDocumentStore::new(2);
        let hr = store.insert_document(new_document("hr", "h1")).await.unwrap();
        let eng = store.insert_document(new_document("eng", "h2")).await.unwrap();

        let mut writer = store.begin_chunk_replacement(hr.id).await.unwrap();
        writer.insert(chunk(&hr, 0, vec![5.0, 5.0])).await.unwrap();
        writer.insert(chunk(&hr, 1, vec![1.0, 0.0])).await.unwrap();
        writer.commit().await.unwrap();

        let mut writer = store.begin_chunk_replacement(eng.id).await.unwrap();
        writer.insert(chunk(&eng, 0, vec![1.0, 0.0])).await.unwrap();
        writer.commit().await.unwrap();

        let results = store
            .nearest_chunks(&[1.0, 0.0], &["hr".to_string()], 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.document_id == hr.id));
        assert_eq!(results[0].chunk_index, 1);

        let none = store.nearest_chunks(&[1.0, 0.0], &[], 5).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_checked() {
        let store = MemoryDocumentStore::new(3);
        assert!(matches!(
            store.nearest_chunks(&[1.0], &["hr".to_string()], 1).await,
            Err(StoreError::DimensionMismatch { expected: 3, actual: 1 })
        ));
    }

    #[tokio::test]
    async fn test_save_missing_document() {
        let store = MemoryDocumentStore::new(2);
        let doc = store.insert_document(new_document("hr", "h1")).await.unwrap();
        store.delete_document(doc.id).await.unwrap();
        assert!(matches!(
            store.save_document(&doc).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
