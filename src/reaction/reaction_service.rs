use tracing::debug;

use super::{
    delivery_repository::DeliveryRepository,
    reaction_models::{for_viewer, summarize, DeliveryState, DeliveryStatus, ReactionSummary},
    reaction_repository::ReactionRepository,
};
use crate::{
    conversation::{conversation_models::Conversation, conversation_repository::ConversationRepository},
    error::{AppError, Result},
    message::{message_models::Message, MessageRepository},
    realtime::broadcaster::Broadcaster,
};

#[derive(Clone)]
pub struct ReactionService {
    reactions: ReactionRepository,
    deliveries: DeliveryRepository,
    messages: MessageRepository,
    conversations: ConversationRepository,
    broadcaster: Broadcaster,
}

impl ReactionService {
    pub fn new(
        reactions: ReactionRepository,
        deliveries: DeliveryRepository,
        messages: MessageRepository,
        conversations: ConversationRepository,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            reactions,
            deliveries,
            messages,
            conversations,
            broadcaster,
        }
    }

    /// Loads a message and its conversation, failing unless `user_id`
    /// participates in it.
    async fn authorize(&self, message_id: i64, user_id: i64) -> Result<(Message, Conversation)> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or(AppError::NotFound("Message not found".to_string()))?;
        let conversation = self
            .conversations
            .find_by_id(message.conversation_id)
            .await?
            .ok_or(AppError::NotFound("Conversation not found".to_string()))?;
        conversation.ensure_participant(user_id)?;
        Ok((message, conversation))
    }

    pub async fn add(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<Vec<ReactionSummary>> {
        let emoji = normalize_emoji(emoji)?;
        let (message, _) = self.authorize(message_id, user_id).await?;
        if message.is_deleted() {
            return Err(AppError::Conflict("Cannot react to a deleted message".to_string()));
        }

        self.reactions.upsert(message_id, user_id, emoji).await?;
        debug!(message_id, user_id, emoji, "reaction added");

        self.publish(message.conversation_id, message_id, user_id).await
    }

    pub async fn remove(&self, message_id: i64, user_id: i64, emoji: &str) -> Result<Vec<ReactionSummary>> {
        let emoji = normalize_emoji(emoji)?;
        let (message, _) = self.authorize(message_id, user_id).await?;

        if !self.reactions.remove(message_id, user_id, emoji).await? {
            return Err(AppError::NotFound("Reaction not found".to_string()));
        }

        self.publish(message.conversation_id, message_id, user_id).await
    }

    pub async fn list(&self, message_id: i64, user_id: i64) -> Result<Vec<ReactionSummary>> {
        self.authorize(message_id, user_id).await?;
        let rows = self.reactions.for_message(message_id).await?;
        Ok(for_viewer(summarize(&rows), user_id))
    }

    async fn publish(&self, conversation_id: i64, message_id: i64, user_id: i64) -> Result<Vec<ReactionSummary>> {
        let summaries = summarize(&self.reactions.for_message(message_id).await?);
        self.broadcaster
            .reaction_update(conversation_id, message_id, user_id, summaries.clone())
            .await;
        Ok(for_viewer(summaries, user_id))
    }

    /// Records that `user_id` received the given messages. Their own
    /// messages, unknown ids and conversations they are not part of are
    /// skipped; rows already at `read` stay there.
    pub async fn mark_delivered(&self, message_ids: &[i64], user_id: i64) -> Result<u64> {
        let batch = delivery_batch(message_ids)?;
        if batch.is_empty() {
            return Ok(0);
        }
        self.deliveries
            .advance_received(&batch, user_id, DeliveryState::Delivered)
            .await
    }

    /// Per-recipient delivery progress of a message, visible to participants.
    pub async fn delivery_status(&self, message_id: i64, user_id: i64) -> Result<Vec<DeliveryStatus>> {
        self.authorize(message_id, user_id).await?;
        self.deliveries.for_message(message_id).await
    }
}

/// Most message ids one delivery acknowledgement may carry.
pub const MAX_DELIVERY_BATCH: usize = 500;

fn delivery_batch(message_ids: &[i64]) -> Result<Vec<i64>> {
    if message_ids.len() > MAX_DELIVERY_BATCH {
        return Err(AppError::BadRequest(format!(
            "At most {} messages can be acknowledged at once",
            MAX_DELIVERY_BATCH
        )));
    }
    let mut batch: Vec<i64> = message_ids.iter().copied().filter(|id| *id > 0).collect();
    batch.sort_unstable();
    batch.dedup();
    Ok(batch)
}

fn normalize_emoji(emoji: &str) -> Result<&str> {
    let emoji = emoji.trim();
    if emoji.is_empty() || emoji.chars().count() > 16 || emoji.chars().any(char::is_whitespace) {
        return Err(AppError::BadRequest("Invalid emoji".to_string()));
    }
    Ok(emoji)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_batch_is_deduplicated_and_capped() {
        assert_eq!(delivery_batch(&[3, 1, 3, 0, -2]).unwrap(), vec![1, 3]);
        assert!(delivery_batch(&[]).unwrap().is_empty());

        let too_many: Vec<i64> = (1..=MAX_DELIVERY_BATCH as i64 + 1).collect();
        assert!(matches!(delivery_batch(&too_many), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn emoji_is_trimmed_and_bounded() {
        assert_eq!(normalize_emoji(" 👍 ").unwrap(), "👍");
        assert_eq!(normalize_emoji("❤️").unwrap(), "❤️");
        assert!(normalize_emoji("").is_err());
        assert!(normalize_emoji("a b").is_err());
        assert!(normalize_emoji(&"x".repeat(17)).is_err());
    }
}
