//! Key/value cache with explicit TTL semantics.
//!
//! One interface, two backends: Redis when a server is configured, otherwise
//! an in-process map. Presence markers and article summaries both go through
//! here, so callers never branch on which backend is live.

pub mod memory;
pub mod redis_cache;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::{sync::Arc, time::Duration};

use crate::error::Result;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Every write carries a TTL; there are no immortal keys.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Renews the TTL of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

/// Typed JSON wrapper over a [`CacheBackend`].
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    tracing::warn!("Dropping undecodable cache entry {}: {}", key, e);
                    self.backend.delete(key).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(value).map_err(|_| crate::error::AppError::InternalError)?;
        self.backend.set_with_ttl(key, &raw, ttl).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.backend.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.backend.set_with_ttl(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.backend.expire(key, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Summary {
        id: i64,
        title: String,
    }

    #[tokio::test]
    async fn json_round_trip_through_memory_backend() {
        let cache = Cache::in_memory();
        let value = Summary { id: 42, title: "Bike".to_string() };

        cache.set_json("article:42", &value, Duration::from_secs(60)).await.unwrap();
        let cached: Option<Summary> = cache.get_json("article:42").await.unwrap();

        assert_eq!(cached, Some(value));
    }

    #[tokio::test]
    async fn undecodable_entry_is_evicted() {
        let cache = Cache::in_memory();
        cache.set("article:1", "not json", Duration::from_secs(60)).await.unwrap();

        let cached: Option<Summary> = cache.get_json("article:1").await.unwrap();

        assert!(cached.is_none());
        assert!(cache.get("article:1").await.unwrap().is_none());
    }
}
