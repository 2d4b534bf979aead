//! Shared key-value store used for processing markers and the answer cache.
//!
//! Every worker process must see the same store, so production uses Redis;
//! the in-memory adapter exists for tests and single-process runs.

mod memory;
mod redis;

pub use self::memory::MemoryKeyValueStore;
pub use self::redis::RedisKeyValueStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Atomically set `key` only if absent. Returns true when this call set it.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Remove `key`. Returns true if it existed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Remove `key` only while it still holds `expected`, atomically.
    /// Returns true if this call removed it.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    async fn ping(&self) -> Result<(), KvError>;
}

/// Expiry in whole seconds, never zero.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
