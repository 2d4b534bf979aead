//! Answer cache over the shared key-value store.
//!
//! The cache is an optimisation: store failures are logged and behave like a
//! miss (reads) or a no-op (writes), never like a failed request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256, Sha512};

use crate::models::RequestContext;
use crate::services::kv_store::KeyValueStore;

/// Key namespace for chat answers.
pub const CHAT_CACHE_MODULE: &str = "chat";

/// A value returned by [`CacheManager::get_or_load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub value: String,
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// `module:identifier[:param...]`
    pub fn generate_key(module: &str, identifier: &str, params: &[&str]) -> String {
        let mut key = format!("{module}:{identifier}");
        for param in params {
            key.push(':');
            key.push_str(param);
        }
        key
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(Some(value)) => {
                tracing::debug!(cache_key = key, "cache hit");
                Some(value)
            }
            Ok(None) => {
                tracing::debug!(cache_key = key, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(cache_key = key, error = %e, "cache read failed");
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: &str, ttl: Duration) {
        match self.store.set(key, value, ttl).await {
            Ok(()) => tracing::debug!(cache_key = key, ttl_secs = ttl.as_secs(), "cache write"),
            Err(e) => tracing::warn!(cache_key = key, error = %e, "cache write failed"),
        }
    }

    /// The cached value for `key`, or else the loader's.
    ///
    /// A loaded `Some` is cached for `ttl`; `None` means nothing worth caching
    /// and is passed through. Loader errors are returned and never cached.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        load: F,
    ) -> Result<Option<Fetched>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(Some(Fetched {
                value,
                from_cache: true,
            }));
        }

        let Some(value) = load().await? else {
            return Ok(None);
        };
        self.put(key, &value, ttl).await;
        Ok(Some(Fetched {
            value,
            from_cache: false,
        }))
    }
}

/// Cache key for a question asked under the caller's role set.
///
/// Roles are sorted and de-duplicated, then each is length-prefixed before
/// hashing with SHA-256, so neither reordering nor regrouping characters
/// across roles yields a different or colliding key. The question is hashed
/// with SHA-512.
pub fn cache_key_for_chat(ctx: &RequestContext, question: &str) -> String {
    let mut role_hasher = Sha256::new();
    for role in ctx.role_set() {
        role_hasher.update((role.len() as u64).to_be_bytes());
        role_hasher.update(role.as_bytes());
    }
    let role_hash = hex::encode(role_hasher.finalize());
    let question_hash = hex::encode(Sha512::digest(question.as_bytes()));

    CacheManager::generate_key(CHAT_CACHE_MODULE, &role_hash, &[&question_hash])
}
