use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

use super::message_models::{Message, MessageType, NewMessage, DELETED_PLACEHOLDER, SYSTEM_SENDER_ID};
use crate::{
    conversation::{
        conversation_models::{Conversation, ConversationStatus},
        conversation_repository::lock_in_tx,
    },
    error::{AppError, Result},
    reaction::{delivery_repository, reaction_models::DeliveryState},
};

/// Where a page of history starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    Offset(i64),
    /// Messages strictly older than this id.
    Before(i64),
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub query: String,
    pub conversation_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub message_type: Option<MessageType>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

/// Inserts a message and, in the same transaction, moves the conversation's
/// last-message pointer and bumps the unread counter of every participant
/// who did not send it. The conversation row is locked first so concurrent
/// sends and read-marks serialize on it.
///
/// Rejections (not a participant, blocked conversation, reply from another
/// conversation) happen before anything is written.
pub async fn insert_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewMessage,
) -> Result<(Message, Conversation)> {
    let conversation = lock_in_tx(tx, new.conversation_id).await?;

    if new.sender_id != SYSTEM_SENDER_ID {
        conversation.ensure_participant(new.sender_id)?;
        if conversation.status == ConversationStatus::Blocked {
            return Err(AppError::Forbidden(
                "This conversation is blocked".to_string(),
            ));
        }
    }

    if let Some(reply_to_id) = new.reply_to_id {
        let parent: Option<i64> =
            sqlx::query_scalar("SELECT conversation_id FROM messages WHERE id = $1")
                .bind(reply_to_id)
                .fetch_optional(&mut **tx)
                .await?;
        if parent != Some(new.conversation_id) {
            return Err(AppError::BadRequest(
                "Replies must reference a message in the same conversation".to_string(),
            ));
        }
    }

    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (conversation_id, sender_id, content, message_type, reply_to_id, metadata)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(new.conversation_id)
    .bind(new.sender_id)
    .bind(&new.content)
    .bind(new.message_type)
    .bind(new.reply_to_id)
    .bind(&new.metadata)
    .fetch_one(&mut **tx)
    .await?;

    // A system message is unread for both sides.
    let bump_buyer = new.sender_id != conversation.buyer_id;
    let bump_seller = new.sender_id != conversation.seller_id;

    let conversation = sqlx::query_as::<_, Conversation>(
        "UPDATE conversations SET
            last_message_id = $2,
            buyer_unread = buyer_unread + CASE WHEN $3 THEN 1 ELSE 0 END,
            seller_unread = seller_unread + CASE WHEN $4 THEN 1 ELSE 0 END,
            updated_at = NOW()
         WHERE id = $1
         RETURNING *",
    )
    .bind(new.conversation_id)
    .bind(message.id)
    .bind(bump_buyer)
    .bind(bump_seller)
    .fetch_one(&mut **tx)
    .await?;

    let recipients: Vec<i64> = conversation
        .participants()
        .into_iter()
        .filter(|id| *id != new.sender_id)
        .collect();
    for recipient in recipients {
        delivery_repository::advance_in_tx(tx, &[message.id], recipient, DeliveryState::Sent)
            .await?;
    }

    Ok((message, conversation))
}

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create(&self, new: &NewMessage) -> Result<(Message, Conversation)> {
        let mut tx = self.pool.begin().await?;
        let created = insert_in_tx(&mut tx, new).await?;
        tx.commit().await?;
        Ok(created)
    }

    pub async fn find_by_id(&self, message_id: i64) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    /// One page of history in chronological order. Rows are fetched newest
    /// first so that offsets and cursors count back from the latest message.
    pub async fn list_page(
        &self,
        conversation_id: i64,
        limit: i64,
        cursor: PageCursor,
    ) -> Result<Vec<Message>> {
        let mut messages = match cursor {
            PageCursor::Offset(offset) => {
                sqlx::query_as::<_, Message>(
                    "SELECT * FROM messages
                     WHERE conversation_id = $1
                     ORDER BY created_at DESC, id DESC
                     LIMIT $2 OFFSET $3",
                )
                .bind(conversation_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            PageCursor::Before(before_id) => {
                sqlx::query_as::<_, Message>(
                    "SELECT * FROM messages
                     WHERE conversation_id = $1 AND id < $2
                     ORDER BY created_at DESC, id DESC
                     LIMIT $3",
                )
                .bind(conversation_id)
                .bind(before_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        messages.reverse();
        Ok(messages)
    }

    pub async fn count_in_conversation(&self, conversation_id: i64) -> Result<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(total)
    }

    /// Distinct conversations the given messages belong to.
    pub async fn conversation_ids_of(&self, message_ids: &[i64]) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT conversation_id FROM messages WHERE id = ANY($1) ORDER BY conversation_id",
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// The sender and type guards are repeated in SQL so that a concurrent
    /// soft-delete cannot be overwritten by a late edit.
    pub async fn edit(&self, message_id: i64, sender_id: i64, content: &str) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "UPDATE messages SET content = $3, is_edited = TRUE, edited_at = NOW()
             WHERE id = $1 AND sender_id = $2 AND sender_id <> 0 AND message_type = 'text'
             RETURNING *",
        )
        .bind(message_id)
        .bind(sender_id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    pub async fn soft_delete(&self, message_id: i64, sender_id: i64) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "UPDATE messages SET
                content = $3,
                message_type = 'system',
                metadata = COALESCE(metadata, '{}'::JSONB)
                    || jsonb_build_object('deleted', TRUE, 'deleted_at', NOW(), 'original_type', message_type)
             WHERE id = $1 AND sender_id = $2 AND sender_id <> 0 AND message_type = 'text'
             RETURNING *",
        )
        .bind(message_id)
        .bind(sender_id)
        .bind(DELETED_PLACEHOLDER)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    /// Case-insensitive substring search over conversations `user_id` takes
    /// part in. Soft-deleted messages never match.
    pub async fn search(
        &self,
        user_id: i64,
        filters: &SearchFilters,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Message>, i64)> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT m.* ");
        push_search_scope(&mut query, user_id, filters);
        query
            .push(" ORDER BY m.created_at DESC, m.id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let messages = query
            .build_query_as::<Message>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) ");
        push_search_scope(&mut count, user_id, filters);

        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        Ok((messages, total))
    }
}

fn push_search_scope(query: &mut QueryBuilder<'_, Postgres>, user_id: i64, filters: &SearchFilters) {
    query
        .push("FROM messages m JOIN conversations c ON c.id = m.conversation_id WHERE (c.buyer_id = ")
        .push_bind(user_id)
        .push(" OR c.seller_id = ")
        .push_bind(user_id)
        .push(") AND m.content ILIKE ")
        .push_bind(like_pattern(&filters.query))
        .push(" ESCAPE '\\' AND COALESCE((m.metadata->>'deleted')::BOOLEAN, FALSE) = FALSE");

    if let Some(conversation_id) = filters.conversation_id {
        query.push(" AND m.conversation_id = ").push_bind(conversation_id);
    }
    if let Some(sender_id) = filters.sender_id {
        query.push(" AND m.sender_id = ").push_bind(sender_id);
    }
    if let Some(message_type) = filters.message_type {
        query.push(" AND m.message_type = ").push_bind(message_type);
    }
    if let Some(date_from) = filters.date_from {
        query.push(" AND m.created_at >= ").push_bind(date_from);
    }
    if let Some(date_to) = filters.date_to {
        query.push(" AND m.created_at <= ").push_bind(date_to);
    }
}

/// Wraps the search term for ILIKE, escaping its wildcards.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.trim().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("bike"), "%bike%");
        assert_eq!(like_pattern(" 50%_off "), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
