use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BlobReader, BlobStore, validate_key};
use crate::error::BlobError;

/// Blob store rooted at a local directory; keys are relative paths.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never see a partial blob
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp).await?;
        if let Err(e) = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await
        {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        drop(file);
        fs::rename(&tmp, &path).await?;

        tracing::debug!(key, bytes = bytes.len(), "blob stored");
        Ok(key.to_string())
    }

    async fn open_stream(&self, key: &str) -> Result<BlobReader, BlobError> {
        let path = self.path_for(key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_put_open_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let key = store.put("kb-docs/hr/abc_a.txt", b"hello").await.unwrap();
        assert_eq!(key, "kb-docs/hr/abc_a.txt");

        let mut reader = store.open_stream(&key).await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "hello");

        store.delete(&key).await.unwrap();
        assert!(matches!(
            store.open_stream(&key).await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.put("k/a.txt", b"one").await.unwrap();
        store.put("k/a.txt", b"two").await.unwrap();

        let mut content = String::new();
        store
            .open_stream("k/a.txt")
            .await
            .unwrap()
            .read_to_string(&mut content)
            .await
            .unwrap();
        assert_eq!(content, "two");
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.delete("kb-docs/none.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_escaping_key() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(matches!(
            store.put("../outside.txt", b"x").await,
            Err(BlobError::InvalidKey(_))
        ));
    }
}
