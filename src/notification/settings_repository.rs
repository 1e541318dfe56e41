use async_trait::async_trait;
use sqlx::PgPool;

use super::{
    dispatcher::SettingsStore, notification_dto::UpdateSettingsRequest,
    notification_models::NotificationSettings,
};
use crate::error::Result;

#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the defaults row the first time a user's settings are needed.
    pub async fn load_or_create(&self, user_id: i64) -> Result<NotificationSettings> {
        sqlx::query("INSERT INTO notification_settings (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let settings = sqlx::query_as::<_, NotificationSettings>(
            "SELECT * FROM notification_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(settings)
    }

    pub async fn replace(
        &self,
        user_id: i64,
        request: &UpdateSettingsRequest,
    ) -> Result<NotificationSettings> {
        let settings = sqlx::query_as::<_, NotificationSettings>(
            "INSERT INTO notification_settings
                (user_id, email_enabled, push_enabled, in_app_enabled, sound_enabled,
                 frequency, quiet_hours_start, quiet_hours_end, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
             ON CONFLICT (user_id) DO UPDATE SET
                email_enabled = EXCLUDED.email_enabled,
                push_enabled = EXCLUDED.push_enabled,
                in_app_enabled = EXCLUDED.in_app_enabled,
                sound_enabled = EXCLUDED.sound_enabled,
                frequency = EXCLUDED.frequency,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                updated_at = NOW()
             RETURNING *",
        )
        .bind(user_id)
        .bind(request.email_enabled)
        .bind(request.push_enabled)
        .bind(request.in_app_enabled)
        .bind(request.sound_enabled)
        .bind(request.frequency)
        .bind(request.quiet_hours_start)
        .bind(request.quiet_hours_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(settings)
    }
}

#[async_trait]
impl SettingsStore for SettingsRepository {
    async fn settings_for(&self, user_id: i64) -> Result<NotificationSettings> {
        self.load_or_create(user_id).await
    }
}
