//! Best-effort publish/subscribe bus.
//!
//! ```text
//!  publish ──► Redis PUBLISH chat:{scope} ──► relay task (every node) ──► local channels ──► WS / SSE
//!     │
//!     └── Redis absent or failing ───────────────────────────────────────► local channels
//! ```
//!
//! Nothing is buffered for absent subscribers: a send with no receivers is
//! dropped, and lagging receivers skip ahead. Clients reconcile by fetching.

use dashmap::DashMap;
use futures::StreamExt;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::events::{Channel, EventEnvelope};

const REDIS_CHANNEL_PREFIX: &str = "chat";
const RELAY_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct EventBus {
    local: Arc<DashMap<String, broadcast::Sender<EventEnvelope>>>,
    redis: Option<MultiplexedConnection>,
    capacity: usize,
}

impl EventBus {
    /// Bus confined to this process.
    pub fn local(capacity: usize) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis: None,
            capacity,
        }
    }

    /// Bus that fans out across nodes through Redis. Starts the relay task
    /// that feeds Redis messages into this node's local channels.
    pub async fn with_redis(client: redis::Client, capacity: usize) -> Self {
        let mut bus = Self::local(capacity);
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                bus.redis = Some(conn);
                bus.spawn_relay(client);
                info!("Event bus relaying through Redis");
            }
            Err(e) => {
                warn!("Redis unavailable, event bus is process-local: {}", e);
            }
        }
        bus
    }

    pub fn subscribe(&self, channel: Channel) -> broadcast::Receiver<EventEnvelope> {
        self.local
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Never fails the caller: a bus outage only means the event is not seen.
    pub async fn publish(&self, envelope: EventEnvelope) {
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            let subject = format!("{}:{}", REDIS_CHANNEL_PREFIX, envelope.scope_id);
            match serde_json::to_string(&envelope) {
                Ok(json) => match conn.publish::<_, _, ()>(&subject, json).await {
                    Ok(()) => return,
                    Err(e) => warn!("Redis publish to {} failed, delivering locally: {}", subject, e),
                },
                Err(e) => {
                    error!("Failed to serialize event for {}: {}", subject, e);
                    return;
                }
            }
        }
        self.deliver_local(envelope);
    }

    pub fn deliver_local(&self, envelope: EventEnvelope) {
        if let Some(tx) = self.local.get(&envelope.scope_id) {
            let delivered = tx.send(envelope).unwrap_or(0);
            debug!("Event delivered to {} local subscriber(s)", delivered);
        }
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.local
            .get(&channel.to_string())
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.local.len()
    }

    /// Drops channels nobody listens to anymore.
    pub fn prune(&self) -> usize {
        let before = self.local.len();
        self.local.retain(|_, tx| tx.receiver_count() > 0);
        before - self.local.len()
    }

    fn spawn_relay(&self, client: redis::Client) {
        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = bus.relay_once(&client).await {
                    warn!("Redis relay interrupted: {}", e);
                }
                tokio::time::sleep(RELAY_RECONNECT_DELAY).await;
            }
        });
    }

    async fn relay_once(&self, client: &redis::Client) -> redis::RedisResult<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{}:*", REDIS_CHANNEL_PREFIX)).await?;
        let mut messages = pubsub.into_on_message();

        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(_) => continue,
            };
            match serde_json::from_str::<EventEnvelope>(&payload) {
                Ok(envelope) => self.deliver_local(envelope),
                Err(e) => warn!(
                    "Ignoring malformed event on {}: {}",
                    msg.get_channel_name(),
                    e
                ),
            }
        }
        Ok(())
    }
}
