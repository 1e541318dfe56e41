use sqlx::{PgPool, Postgres, Transaction};

use super::reaction_models::{DeliveryState, DeliveryStatus};
use crate::error::Result;

/// Upserts delivery rows for `user_id`, moving each forward to `state`.
/// A row already at or past `state` is left untouched, so delivery status
/// never regresses and repeating the call writes nothing new.
pub async fn advance_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    message_ids: &[i64],
    user_id: i64,
    state: DeliveryState,
) -> Result<u64> {
    let affected = sqlx::query(
        "INSERT INTO message_delivery_status (message_id, user_id, status, updated_at)
         SELECT id, $2, $3, NOW() FROM UNNEST($1::BIGINT[]) AS id
         ON CONFLICT (message_id, user_id)
         DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
         WHERE message_delivery_status.status < EXCLUDED.status",
    )
    .bind(message_ids)
    .bind(user_id)
    .bind(state)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(affected)
}

#[derive(Clone)]
pub struct DeliveryRepository {
    pool: PgPool,
}

impl DeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Moves delivery rows forward for the messages of the batch that `user_id`
    /// can see and did not send. Other ids are ignored.
    pub async fn advance_received(&self, message_ids: &[i64], user_id: i64, state: DeliveryState) -> Result<u64> {
        let affected = sqlx::query(
            "INSERT INTO message_delivery_status (message_id, user_id, status, updated_at)
             SELECT m.id, $2, $3, NOW()
             FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE m.id = ANY($1)
               AND m.sender_id <> $2
               AND (c.buyer_id = $2 OR c.seller_id = $2)
             ON CONFLICT (message_id, user_id)
             DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
             WHERE message_delivery_status.status < EXCLUDED.status",
        )
        .bind(message_ids)
        .bind(user_id)
        .bind(state)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }

    pub async fn for_message(&self, message_id: i64) -> Result<Vec<DeliveryStatus>> {
        let rows = sqlx::query_as::<_, DeliveryStatus>(
            "SELECT * FROM message_delivery_status WHERE message_id = $1 ORDER BY user_id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
