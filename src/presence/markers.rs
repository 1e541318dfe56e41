use std::time::Duration;

use crate::{cache::Cache, error::Result};

/// Renewable "currently connected" markers. A marker that is not renewed
/// within its TTL disappears on its own; nothing else needs to clear it.
#[derive(Clone)]
pub struct PresenceMarkers {
    cache: Cache,
    ttl: Duration,
}

fn key(user_id: i64) -> String {
    format!("presence:{}", user_id)
}

impl PresenceMarkers {
    pub fn new(cache: Cache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn mark(&self, user_id: i64) -> Result<()> {
        self.cache.set(&key(user_id), "1", self.ttl).await
    }

    /// Extends the marker, recreating it if it already expired.
    pub async fn renew(&self, user_id: i64) -> Result<()> {
        if !self.cache.expire(&key(user_id), self.ttl).await? {
            self.mark(user_id).await?;
        }
        Ok(())
    }

    pub async fn clear(&self, user_id: i64) -> Result<()> {
        self.cache.delete(&key(user_id)).await
    }

    pub async fn is_present(&self, user_id: i64) -> Result<bool> {
        Ok(self.cache.get(&key(user_id)).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marker_lifecycle_with_memory_backend() {
        let markers = PresenceMarkers::new(Cache::in_memory(), Duration::from_secs(60));

        assert!(!markers.is_present(7).await.unwrap());
        markers.mark(7).await.unwrap();
        assert!(markers.is_present(7).await.unwrap());
        assert!(!markers.is_present(8).await.unwrap());

        markers.clear(7).await.unwrap();
        assert!(!markers.is_present(7).await.unwrap());
    }

    #[tokio::test]
    async fn unrenewed_marker_expires() {
        let markers = PresenceMarkers::new(Cache::in_memory(), Duration::from_millis(50));
        markers.mark(7).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!markers.is_present(7).await.unwrap());

        markers.renew(7).await.unwrap();
        assert!(markers.is_present(7).await.unwrap());
    }
}
