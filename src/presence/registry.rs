use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    connection_repository::ConnectionRepository,
    markers::PresenceMarkers,
    presence_models::{Connection, PresenceStatus, TransportKind},
};
use crate::{
    conversation::conversation_repository::ConversationRepository, error::Result,
    realtime::broadcaster::Broadcaster,
};

/// Tracks live WebSocket/SSE sessions and derives presence from them.
///
/// Connections are persisted so that a user with several devices stays
/// online until the last one goes away. The presence marker in the cache is
/// the fast path for "is this user online"; it is renewed by heartbeats and
/// expires by itself when a node dies without unregistering.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: ConnectionRepository,
    markers: PresenceMarkers,
    conversations: ConversationRepository,
    broadcaster: Broadcaster,
    stale_after: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        connections: ConnectionRepository,
        markers: PresenceMarkers,
        conversations: ConversationRepository,
        broadcaster: Broadcaster,
        stale_after: Duration,
    ) -> Self {
        Self {
            connections,
            markers,
            conversations,
            broadcaster,
            stale_after,
        }
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.stale_after
    }

    pub async fn register(
        &self,
        user_id: i64,
        connection_id: Uuid,
        transport: TransportKind,
    ) -> Result<Connection> {
        let purged = self
            .connections
            .purge_stale_for_user(user_id, self.cutoff())
            .await?;
        if purged > 0 {
            debug!(user_id, purged, "purged stale connections");
        }

        let connection = self.connections.insert(connection_id, user_id, transport).await?;

        let was_present = self.markers.is_present(user_id).await.unwrap_or(false);
        if let Err(e) = self.markers.mark(user_id).await {
            warn!(user_id, "failed to set presence marker: {}", e);
        }

        info!(user_id, %connection_id, ?transport, "connection registered");

        if !was_present {
            self.announce(user_id, true, None).await;
        }
        Ok(connection)
    }

    /// Marks the connection inactive. When it was the user's last one the
    /// presence marker is cleared and an offline status is published.
    pub async fn unregister(&self, connection_id: Uuid) -> Result<()> {
        let Some(user_id) = self.connections.deactivate(connection_id).await? else {
            return Ok(());
        };
        info!(user_id, %connection_id, "connection unregistered");

        if self.connections.active_count(user_id).await? > 0 {
            return Ok(());
        }

        if let Err(e) = self.markers.clear(user_id).await {
            warn!(user_id, "failed to clear presence marker: {}", e);
        }
        let last_seen = self.connections.last_seen(user_id).await?;
        self.announce(user_id, false, last_seen).await;
        Ok(())
    }

    /// Renews both the connection's last ping and the presence marker.
    pub async fn heartbeat(&self, connection_id: Uuid) -> Result<()> {
        match self.connections.touch(connection_id).await? {
            Some(user_id) => {
                if let Err(e) = self.markers.renew(user_id).await {
                    warn!(user_id, "failed to renew presence marker: {}", e);
                }
            }
            None => debug!(%connection_id, "heartbeat for inactive connection ignored"),
        }
        Ok(())
    }

    pub async fn is_online(&self, user_id: i64) -> Result<PresenceStatus> {
        let online = match self.markers.is_present(user_id).await {
            Ok(present) => present,
            Err(e) => {
                warn!(user_id, "presence marker unavailable, using connection table: {}", e);
                self.connections.active_count(user_id).await? > 0
            }
        };

        let last_seen = if online {
            None
        } else {
            self.connections.last_seen(user_id).await?
        };

        Ok(PresenceStatus {
            user_id,
            is_online: online,
            last_seen,
        })
    }

    /// Deactivates connections whose heartbeat went stale and takes users
    /// left without any connection offline. Returns how many went offline.
    pub async fn sweep_stale(&self) -> Result<usize> {
        let users = self.connections.sweep_stale(self.cutoff()).await?;
        for user_id in &users {
            if let Err(e) = self.markers.clear(*user_id).await {
                warn!(user_id, "failed to clear presence marker: {}", e);
            }
            let last_seen = self.connections.last_seen(*user_id).await?;
            self.announce(*user_id, false, last_seen).await;
        }
        Ok(users.len())
    }

    async fn announce(&self, user_id: i64, is_online: bool, last_seen: Option<DateTime<Utc>>) {
        match self.conversations.conversation_ids_for_user(user_id).await {
            Ok(conversation_ids) => {
                self.broadcaster
                    .user_status(user_id, is_online, last_seen, &conversation_ids)
                    .await
            }
            Err(e) => warn!(user_id, "could not load conversations for presence fan-out: {}", e),
        }
    }
}
