//! Blob store abstraction.
//!
//! Uploaded bytes are stored under opaque keys and streamed back to the
//! ingestion pipeline. Backends are substitutable adapters.

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::BlobError;

/// Owned byte stream returned by [`BlobStore::open_stream`].
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous content. Returns the key.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, BlobError>;

    async fn open_stream(&self, key: &str) -> Result<BlobReader, BlobError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Build the storage key for an upload: `kb-docs/{group}/{hash}_{filename}`.
pub fn storage_key(permission_group: &str, content_hash: &str, filename: &str) -> String {
    format!(
        "kb-docs/{}/{}_{}",
        crate::utils::sanitize_filename(permission_group),
        content_hash,
        crate::utils::sanitize_filename(filename)
    )
}

/// Reject keys that could escape the store root.
pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}
