//! Key-value cache collaborator
//!
//! Holds ephemeral state only: rate-limit counters, delivered one-time codes and
//! password-change tickets. Values are strings; typed JSON access comes from
//! `CacheStoreExt`.
pub mod memory;
pub mod redis_cache;

use crate::error::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub use self::memory::InMemoryCache;
pub use self::redis_cache::RedisCache;

/// Counter value and remaining window after an atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub count: u64,
    pub ttl: Duration,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// `ttl = None` keeps the value until removed
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// `true` when a value was removed
    async fn remove(&self, key: &str) -> Result<bool>;

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize>;

    /// Atomic get-and-delete; at most one caller observes a given value
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// Increment a counter in one atomic step; the window TTL starts at first use
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterState>;
}

/// Typed JSON helpers over any `CacheStore`
#[async_trait]
pub trait CacheStoreExt: CacheStore {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache deserialization failed");
                    // Delete corrupted cache entry
                    self.remove(key).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let data = serde_json::to_string(value)?;
        self.set(key, &data, ttl).await
    }

    async fn get_or_create<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, factory: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        if let Some(value) = self.get_json(key).await? {
            return Ok(value);
        }

        let value = factory().await?;
        self.set_json(key, &value, ttl).await?;
        Ok(value)
    }
}

impl<C: CacheStore + ?Sized> CacheStoreExt for C {}
