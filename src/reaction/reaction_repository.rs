use sqlx::PgPool;

use super::reaction_models::Reaction;
use crate::error::Result;

#[derive(Clone)]
pub struct ReactionRepository {
    pool: PgPool,
}

impl ReactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Re-adding an existing (message, user, emoji) triple only refreshes
    /// its timestamp.
    pub async fn upsert(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<Reaction> {
        let reaction = sqlx::query_as::<_, Reaction>(
            "INSERT INTO message_reactions (message_id, user_id, emoji)
             VALUES ($1, $2, $3)
             ON CONFLICT (message_id, user_id, emoji)
             DO UPDATE SET created_at = NOW()
             RETURNING *",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .fetch_one(&self.pool)
        .await?;

        Ok(reaction)
    }

    pub async fn remove(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<bool> {
        let removed = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(removed > 0)
    }

    pub async fn for_message(&self, message_id: i64) -> Result<Vec<Reaction>> {
        let reactions = sqlx::query_as::<_, Reaction>(
            "SELECT * FROM message_reactions WHERE message_id = $1 ORDER BY created_at, id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reactions)
    }

    pub async fn for_messages(&self, message_ids: &[i64]) -> Result<Vec<Reaction>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let reactions = sqlx::query_as::<_, Reaction>(
            "SELECT * FROM message_reactions WHERE message_id = ANY($1) ORDER BY created_at, id",
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(reactions)
    }
}
