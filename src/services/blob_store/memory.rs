use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BlobReader, BlobStore, validate_key};
use crate::error::BlobError;

/// In-process blob store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, BlobError> {
        validate_key(key)?;
        self.blobs
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(key.to_string())
    }

    async fn open_stream(&self, key: &str) -> Result<BlobReader, BlobError> {
        validate_key(key)?;
        let bytes = self
            .blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        validate_key(key)?;
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_roundtrip_and_delete() {
        let store = MemoryBlobStore::new();
        store.put("a/b.txt", b"bytes").await.unwrap();
        assert!(store.contains("a/b.txt").await);

        let mut buf = Vec::new();
        store
            .open_stream("a/b.txt")
            .await
            .unwrap()
            .read_to_end(&mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"bytes");

        store.delete("a/b.txt").await.unwrap();
        assert!(store.is_empty().await);
    }
}
