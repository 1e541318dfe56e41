use async_trait::async_trait;
use sqlx::PgPool;

use super::{channels::push::SubscriptionStore, notification_models::PushSubscription};
use crate::error::Result;

#[derive(Clone)]
pub struct PushSubscriptionRepository {
    pool: PgPool,
}

impl PushSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Re-subscribing a known endpoint refreshes its keys and reactivates it.
    pub async fn upsert(
        &self,
        user_id: i64,
        endpoint: &str,
        p256dh_key: &str,
        auth_key: &str,
    ) -> Result<PushSubscription> {
        let subscription = sqlx::query_as::<_, PushSubscription>(
            "INSERT INTO push_subscriptions (user_id, endpoint, p256dh_key, auth_key)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT ON CONSTRAINT push_subscriptions_unique DO UPDATE SET
                p256dh_key = EXCLUDED.p256dh_key,
                auth_key = EXCLUDED.auth_key,
                is_active = TRUE,
                updated_at = NOW()
             RETURNING *",
        )
        .bind(user_id)
        .bind(endpoint)
        .bind(p256dh_key)
        .bind(auth_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription)
    }

    pub async fn deactivate_endpoint(&self, user_id: i64, endpoint: &str) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE push_subscriptions SET is_active = FALSE, updated_at = NOW()
             WHERE user_id = $1 AND endpoint = $2 AND is_active = TRUE",
        )
        .bind(user_id)
        .bind(endpoint)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }

    pub async fn deactivate(&self, subscription_id: i64) -> Result<()> {
        sqlx::query("UPDATE push_subscriptions SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn active_for(&self, user_id: i64) -> Result<Vec<PushSubscription>> {
        let subscriptions = sqlx::query_as::<_, PushSubscription>(
            "SELECT * FROM push_subscriptions WHERE user_id = $1 AND is_active = TRUE ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }
}

#[async_trait]
impl SubscriptionStore for PushSubscriptionRepository {
    async fn active_subscriptions(&self, user_id: i64) -> Result<Vec<PushSubscription>> {
        self.active_for(user_id).await
    }

    async fn deactivate_subscription(&self, subscription_id: i64) -> Result<()> {
        self.deactivate(subscription_id).await
    }
}
