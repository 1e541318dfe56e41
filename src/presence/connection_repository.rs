use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::presence_models::{Connection, TransportKind};
use crate::error::Result;

#[derive(Clone)]
pub struct ConnectionRepository {
    pool: PgPool,
}

impl ConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deactivates the user's connections whose heartbeat is older than `cutoff`.
    pub async fn purge_stale_for_user(&self, user_id: i64, cutoff: DateTime<Utc>) -> Result<u64> {
        let purged = sqlx::query(
            "UPDATE user_connections SET is_active = FALSE
             WHERE user_id = $1 AND is_active = TRUE AND last_ping < $2",
        )
        .bind(user_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(purged)
    }

    pub async fn insert(
        &self,
        connection_id: Uuid,
        user_id: i64,
        transport: TransportKind,
    ) -> Result<Connection> {
        let connection = sqlx::query_as::<_, Connection>(
            "INSERT INTO user_connections (connection_id, user_id, transport)
             VALUES ($1, $2, $3)
             RETURNING *",
        )
        .bind(connection_id)
        .bind(user_id)
        .bind(transport)
        .fetch_one(&self.pool)
        .await?;

        Ok(connection)
    }

    /// Returns the owning user if the connection was still active.
    pub async fn deactivate(&self, connection_id: Uuid) -> Result<Option<i64>> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "UPDATE user_connections SET is_active = FALSE
             WHERE connection_id = $1 AND is_active = TRUE
             RETURNING user_id",
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id)
    }

    /// Returns the owning user if the connection is still active.
    pub async fn touch(&self, connection_id: Uuid) -> Result<Option<i64>> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "UPDATE user_connections SET last_ping = NOW()
             WHERE connection_id = $1 AND is_active = TRUE
             RETURNING user_id",
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id)
    }

    pub async fn active_count(&self, user_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_connections WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn last_seen(&self, user_id: i64) -> Result<Option<DateTime<Utc>>> {
        let last_seen: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(last_ping) FROM user_connections WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(last_seen)
    }

    /// Deactivates every stale connection and returns the affected users
    /// that are left with no active connection at all.
    pub async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        let users = sqlx::query_scalar::<_, i64>(
            "WITH swept AS (
                UPDATE user_connections SET is_active = FALSE
                WHERE is_active = TRUE AND last_ping < $1
                RETURNING user_id
             )
             SELECT DISTINCT s.user_id FROM swept s
             WHERE NOT EXISTS (
                SELECT 1 FROM user_connections c
                WHERE c.user_id = s.user_id AND c.is_active = TRUE AND c.last_ping >= $1
             )",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}
