use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use utoipa::ToSchema;

use super::conversation_models::{Conversation, ConversationStatus, Side};
use crate::{
    error::{AppError, Result},
    message::{
        message_models::{Message, MessageType, NewMessage, SYSTEM_SENDER_ID},
        message_repository,
    },
    reaction::{delivery_repository, reaction_models::DeliveryState},
};

#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ConversationListRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message_content: Option<String>,
    pub last_message_type: Option<MessageType>,
    pub last_message_sender_id: Option<i64>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Result of a read-mark: which messages flipped and the conversation with
/// its recomputed counters.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub conversation: Conversation,
    pub message_ids: Vec<i64>,
}

/// Row-locks the conversation for the rest of the transaction. Every write
/// that touches unread counters goes through here first, which serializes
/// concurrent sends and read-marks on the same conversation.
pub async fn lock_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: i64,
) -> Result<Conversation> {
    sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1 FOR UPDATE")
        .bind(conversation_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("Conversation not found".to_string()))
}

/// Sets both unread counters to the number of unread messages the respective
/// side did not author. Recomputing rather than decrementing keeps the
/// counters exact no matter how reads and sends interleave.
pub async fn recompute_unread_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: i64,
) -> Result<Conversation> {
    let conversation = sqlx::query_as::<_, Conversation>(
        "UPDATE conversations c SET
            buyer_unread = (
                SELECT COUNT(*) FROM messages m
                WHERE m.conversation_id = c.id AND m.sender_id <> c.buyer_id AND m.is_read = FALSE
            )::INTEGER,
            seller_unread = (
                SELECT COUNT(*) FROM messages m
                WHERE m.conversation_id = c.id AND m.sender_id <> c.seller_id AND m.is_read = FALSE
            )::INTEGER,
            updated_at = NOW()
         WHERE c.id = $1
         RETURNING *",
    )
    .bind(conversation_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(conversation)
}

async fn mark_read_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: i64,
    reader_id: i64,
    only_ids: Option<&[i64]>,
) -> Result<ReadOutcome> {
    let conversation = lock_in_tx(tx, conversation_id).await?;
    conversation.ensure_participant(reader_id)?;

    let message_ids: Vec<i64> = match only_ids {
        None => {
            sqlx::query_scalar(
                "UPDATE messages SET is_read = TRUE, read_at = NOW()
                 WHERE conversation_id = $1 AND sender_id <> $2 AND is_read = FALSE
                 RETURNING id",
            )
            .bind(conversation_id)
            .bind(reader_id)
            .fetch_all(&mut **tx)
            .await?
        }
        Some(ids) => {
            sqlx::query_scalar(
                "UPDATE messages SET is_read = TRUE, read_at = NOW()
                 WHERE conversation_id = $1 AND sender_id <> $2 AND is_read = FALSE
                   AND id = ANY($3)
                 RETURNING id",
            )
            .bind(conversation_id)
            .bind(reader_id)
            .bind(ids)
            .fetch_all(&mut **tx)
            .await?
        }
    };

    if !message_ids.is_empty() {
        delivery_repository::advance_in_tx(tx, &message_ids, reader_id, DeliveryState::Read).await?;
    }

    let conversation = recompute_unread_in_tx(tx, conversation_id).await?;

    Ok(ReadOutcome {
        conversation,
        message_ids,
    })
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent on (article, buyer, seller). A concurrent first contact
    /// loses the insert race and reads the winner's row.
    pub async fn find_or_create(
        &self,
        article_id: i64,
        buyer_id: i64,
        seller_id: i64,
    ) -> Result<(Conversation, bool)> {
        let inserted = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (article_id, buyer_id, seller_id)
             VALUES ($1, $2, $3)
             ON CONFLICT ON CONSTRAINT conversations_triple_unique DO NOTHING
             RETURNING *",
        )
        .bind(article_id)
        .bind(buyer_id)
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(conversation) = inserted {
            return Ok((conversation, true));
        }

        let existing = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations
             WHERE article_id = $1 AND buyer_id = $2 AND seller_id = $3",
        )
        .bind(article_id)
        .bind(buyer_id)
        .bind(seller_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((existing, false))
    }

    pub async fn find_by_id(&self, conversation_id: i64) -> Result<Option<Conversation>> {
        let conversation =
            sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(conversation)
    }

    /// Same shape as a listing row, for a single conversation.
    pub async fn find_row(&self, conversation_id: i64) -> Result<Option<ConversationListRow>> {
        let row = sqlx::query_as::<_, ConversationListRow>(
            "SELECT c.*,
                    m.content AS last_message_content,
                    m.message_type AS last_message_type,
                    m.sender_id AS last_message_sender_id,
                    m.created_at AS last_message_at
             FROM conversations c
             LEFT JOIN messages m ON m.id = c.last_message_id
             WHERE c.id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationListRow>, i64)> {
        let rows = sqlx::query_as::<_, ConversationListRow>(
            "SELECT c.*,
                    m.content AS last_message_content,
                    m.message_type AS last_message_type,
                    m.sender_id AS last_message_sender_id,
                    m.created_at AS last_message_at
             FROM conversations c
             LEFT JOIN messages m ON m.id = c.last_message_id
             WHERE c.buyer_id = $1 OR c.seller_id = $1
             ORDER BY COALESCE(m.created_at, c.created_at) DESC, c.id DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversations WHERE buyer_id = $1 OR seller_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }

    pub async fn conversation_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM conversations WHERE buyer_id = $1 OR seller_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Unread totals across every conversation of each given user.
    pub async fn total_unread_for(&self, user_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT u.id,
                    COALESCE(SUM(CASE WHEN c.buyer_id = u.id THEN c.buyer_unread ELSE c.seller_unread END), 0)::BIGINT
             FROM UNNEST($1::BIGINT[]) AS u(id)
             LEFT JOIN conversations c ON c.buyer_id = u.id OR c.seller_id = u.id
             GROUP BY u.id",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Flips unread messages not authored by `reader_id` (optionally only the
    /// given ids), records read delivery status, and recomputes counters, all
    /// in one transaction. Already-read messages are untouched, so repeating
    /// the call is a no-op.
    pub async fn mark_read(
        &self,
        conversation_id: i64,
        reader_id: i64,
        only_ids: Option<&[i64]>,
    ) -> Result<ReadOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = mark_read_in_tx(&mut tx, conversation_id, reader_id, only_ids).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Read-marks `message_ids` across several conversations atomically. If
    /// the reader is not a participant of any one of them nothing is written.
    pub async fn mark_read_across(
        &self,
        conversation_ids: &[i64],
        reader_id: i64,
        message_ids: &[i64],
    ) -> Result<Vec<ReadOutcome>> {
        let mut ordered = conversation_ids.to_vec();
        // lock order is fixed so two multi-reads cannot deadlock
        ordered.sort_unstable();
        ordered.dedup();

        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(ordered.len());
        for conversation_id in ordered {
            outcomes.push(mark_read_in_tx(&mut tx, conversation_id, reader_id, Some(message_ids)).await?);
        }
        tx.commit().await?;

        Ok(outcomes)
    }

    /// Last write wins; the timestamp lets readers expire a stale flag.
    pub async fn set_typing(
        &self,
        conversation_id: i64,
        side: Side,
        is_typing: bool,
    ) -> Result<Conversation> {
        let sql = match side {
            Side::Buyer => {
                "UPDATE conversations SET buyer_typing = $2, buyer_typing_at = NOW()
                 WHERE id = $1 RETURNING *"
            }
            Side::Seller => {
                "UPDATE conversations SET seller_typing = $2, seller_typing_at = NOW()
                 WHERE id = $1 RETURNING *"
            }
        };

        let conversation = sqlx::query_as::<_, Conversation>(sql)
            .bind(conversation_id)
            .bind(is_typing)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Conversation not found".to_string()))?;

        Ok(conversation)
    }

    pub async fn touch_last_seen(&self, conversation_id: i64, side: Side) -> Result<()> {
        let sql = match side {
            Side::Buyer => "UPDATE conversations SET buyer_last_seen = NOW() WHERE id = $1",
            Side::Seller => "UPDATE conversations SET seller_last_seen = NOW() WHERE id = $1",
        };

        sqlx::query(sql)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Blocks the conversation and records the blocker→blocked edge. The
    /// system note is written in the same transaction.
    pub async fn block(
        &self,
        conversation_id: i64,
        blocker_id: i64,
        reason: Option<&str>,
        note: &str,
    ) -> Result<(Conversation, Message)> {
        let mut tx = self.pool.begin().await?;

        let conversation = lock_in_tx(&mut tx, conversation_id).await?;
        let side = conversation.ensure_participant(blocker_id)?;
        let blocked_id = conversation.participant(side.other());

        sqlx::query(
            "INSERT INTO conversation_blocks (conversation_id, blocker_id, blocked_id, reason)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT ON CONSTRAINT conversation_blocks_unique
             DO UPDATE SET reason = EXCLUDED.reason, created_at = NOW()",
        )
        .bind(conversation_id)
        .bind(blocker_id)
        .bind(blocked_id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .bind(ConversationStatus::Blocked)
            .execute(&mut *tx)
            .await?;

        let (message, conversation) =
            message_repository::insert_in_tx(&mut tx, &system_note(conversation_id, note)).await?;

        tx.commit().await?;

        Ok((conversation, message))
    }

    /// Removes the caller's block edge. The conversation becomes active again
    /// only once no edge remains.
    pub async fn unblock(
        &self,
        conversation_id: i64,
        caller_id: i64,
        note: &str,
    ) -> Result<(Conversation, Message)> {
        let mut tx = self.pool.begin().await?;

        let conversation = lock_in_tx(&mut tx, conversation_id).await?;
        conversation.ensure_participant(caller_id)?;

        let removed = sqlx::query(
            "DELETE FROM conversation_blocks WHERE conversation_id = $1 AND blocker_id = $2",
        )
        .bind(conversation_id)
        .bind(caller_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            return Err(AppError::Forbidden(
                "Only the participant who blocked this conversation can unblock it".to_string(),
            ));
        }

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversation_blocks WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await?;

        if remaining == 0 {
            sqlx::query("UPDATE conversations SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(conversation_id)
                .bind(ConversationStatus::Active)
                .execute(&mut *tx)
                .await?;
        }

        let (message, conversation) =
            message_repository::insert_in_tx(&mut tx, &system_note(conversation_id, note)).await?;

        tx.commit().await?;

        Ok((conversation, message))
    }

    /// Archive/unarchive. Blocking has its own edge bookkeeping and is not
    /// reachable from here.
    pub async fn set_status(
        &self,
        conversation_id: i64,
        caller_id: i64,
        status: ConversationStatus,
        note: &str,
    ) -> Result<(Conversation, Message)> {
        if status == ConversationStatus::Blocked {
            return Err(AppError::BadRequest(
                "Use the block operation to block a conversation".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let conversation = lock_in_tx(&mut tx, conversation_id).await?;
        conversation.ensure_participant(caller_id)?;

        if conversation.status == ConversationStatus::Blocked {
            return Err(AppError::Conflict(
                "A blocked conversation must be unblocked first".to_string(),
            ));
        }

        sqlx::query("UPDATE conversations SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .bind(status)
            .execute(&mut *tx)
            .await?;

        let (message, conversation) =
            message_repository::insert_in_tx(&mut tx, &system_note(conversation_id, note)).await?;

        tx.commit().await?;

        Ok((conversation, message))
    }
}

fn system_note(conversation_id: i64, note: &str) -> NewMessage {
    NewMessage {
        conversation_id,
        sender_id: SYSTEM_SENDER_ID,
        content: note.to_string(),
        message_type: MessageType::System,
        reply_to_id: None,
        metadata: None,
    }
}
