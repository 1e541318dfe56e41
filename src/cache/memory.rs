use async_trait::async_trait;
use dashmap::DashMap;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use super::CacheBackend;
use crate::error::Result;

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Writes between two full sweeps of expired entries.
const PURGE_EVERY: usize = 256;

/// In-process backend. Expired entries are dropped on read and by a sweep
/// that runs every `PURGE_EVERY` writes.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str, now: Instant) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        // re-checked under the shard lock so a concurrent set survives
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key, Instant::now()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        if self.live_value(key, now).is_none() {
            return Ok(false);
        }
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = now + ttl;
            return Ok(true);
        }
        Ok(false)
    }
}
