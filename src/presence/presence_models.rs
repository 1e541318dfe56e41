use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
    Sse,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Connection {
    pub connection_id: Uuid,
    pub user_id: i64,
    pub transport: TransportKind,
    pub last_ping: DateTime<Utc>,
    pub is_active: bool,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PresenceStatus {
    pub user_id: i64,
    pub is_online: bool,
    /// Most recent heartbeat of any connection; only meaningful when offline.
    pub last_seen: Option<DateTime<Utc>>,
}
