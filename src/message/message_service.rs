use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    attachment::{attachment_models::{Attachment, AttachmentResponse}, attachment_repository::AttachmentRepository},
    conversation::{conversation_models::Conversation, conversation_repository::ConversationRepository},
    error::{AppError, Result},
    message::{
        message_dto::{
            EditMessageRequest, MarkReadResponse, MessageListQuery, SearchQuery, SendMessageRequest,
            SendOfferRequest,
        },
        message_models::{Message, MessageResponse, MessageType, NewMessage, SYSTEM_SENDER_ID},
        message_repository::{MessageRepository, PageCursor, SearchFilters},
        sanitize::{escape, Sanitizer},
    },
    notification::NotificationDispatcher,
    pagination::PaginatedResponse,
    reaction::{
        reaction_models::{for_viewer, summarize, Reaction},
        reaction_repository::ReactionRepository,
    },
    realtime::{broadcaster::Broadcaster, events::MessageUpdateAction},
};

#[derive(Clone)]
pub struct MessageService {
    messages: MessageRepository,
    conversations: ConversationRepository,
    reactions: ReactionRepository,
    attachments: AttachmentRepository,
    broadcaster: Broadcaster,
    dispatcher: NotificationDispatcher,
    sanitizer: Arc<Sanitizer>,
    max_length: usize,
}

impl MessageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        messages: MessageRepository,
        conversations: ConversationRepository,
        reactions: ReactionRepository,
        attachments: AttachmentRepository,
        broadcaster: Broadcaster,
        dispatcher: NotificationDispatcher,
        sanitizer: Arc<Sanitizer>,
        max_length: usize,
    ) -> Self {
        Self {
            messages,
            conversations,
            reactions,
            attachments,
            broadcaster,
            dispatcher,
            sanitizer,
            max_length,
        }
    }

    pub fn clean_text(&self, raw: &str) -> Result<String> {
        prepare_text(&self.sanitizer, raw, self.max_length)
    }

    pub async fn send(
        &self,
        conversation_id: i64,
        sender_id: i64,
        payload: SendMessageRequest,
    ) -> Result<MessageResponse> {
        let content = self.clean_text(&payload.content)?;

        let (message, conversation) = self
            .messages
            .create(&NewMessage {
                conversation_id,
                sender_id,
                content,
                message_type: MessageType::Text,
                reply_to_id: payload.reply_to_id,
                metadata: None,
            })
            .await?;

        debug!(message_id = message.id, conversation_id, sender_id, "message stored");

        let response = MessageResponse::from(message);
        self.publish_created(&conversation, &response).await;
        Ok(response)
    }

    /// Writes a platform message (sender 0). It counts as unread for both
    /// participants and bypasses the block check.
    pub async fn create_system_message(&self, conversation_id: i64, content: &str) -> Result<MessageResponse> {
        let (message, conversation) = self
            .messages
            .create(&NewMessage {
                conversation_id,
                sender_id: SYSTEM_SENDER_ID,
                content: escape(content),
                message_type: MessageType::System,
                reply_to_id: None,
                metadata: None,
            })
            .await?;

        let response = MessageResponse::from(message);
        self.publish_created(&conversation, &response).await;
        Ok(response)
    }

    pub async fn create_offer_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        payload: SendOfferRequest,
    ) -> Result<MessageResponse> {
        if !payload.amount.is_finite() {
            return Err(AppError::BadRequest("Offer amount must be a number".to_string()));
        }

        let content = match payload.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => self.clean_text(note)?,
            None => offer_content(payload.amount),
        };

        let (message, conversation) = self
            .messages
            .create(&NewMessage {
                conversation_id,
                sender_id,
                content,
                message_type: MessageType::Offer,
                reply_to_id: None,
                metadata: Some(serde_json::json!({
                    "amount": payload.amount,
                    "status": "pending",
                })),
            })
            .await?;

        info!(message_id = message.id, conversation_id, amount = payload.amount, "offer made");

        let response = MessageResponse::from(message);
        self.publish_created(&conversation, &response).await;
        Ok(response)
    }

    /// Post-commit side effects of a new message: realtime fan-out with badge
    /// totals, then notification dispatch off the request path.
    pub async fn publish_created(&self, conversation: &Conversation, message: &MessageResponse) {
        let recipients: Vec<i64> = conversation
            .participants()
            .into_iter()
            .filter(|id| *id != message.sender_id)
            .collect();

        let totals = match self.conversations.total_unread_for(&recipients).await {
            Ok(totals) => totals,
            Err(e) => {
                warn!(conversation_id = conversation.id, "could not compute unread totals: {}", e);
                HashMap::new()
            }
        };

        self.broadcaster.new_message(conversation, message, &totals).await;

        let dispatcher = self.dispatcher.clone();
        let conversation = conversation.clone();
        let message = message.clone();
        tokio::spawn(async move {
            dispatcher.on_new_message(&conversation, &message).await;
        });
    }

    pub async fn list_page(
        &self,
        conversation_id: i64,
        viewer_id: i64,
        query: &MessageListQuery,
    ) -> Result<PaginatedResponse<MessageResponse>> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or(AppError::NotFound("Conversation not found".to_string()))?;
        let side = conversation.ensure_participant(viewer_id)?;

        let params = query.page_params();
        let cursor = match query.before_id {
            Some(before_id) => PageCursor::Before(before_id),
            None => PageCursor::Offset(params.offset()),
        };

        let messages = self
            .messages
            .list_page(conversation_id, params.limit() as i64, cursor)
            .await?;
        let total = self.messages.count_in_conversation(conversation_id).await?;

        if let Err(e) = self.conversations.touch_last_seen(conversation_id, side).await {
            warn!(conversation_id, "failed to update last seen: {}", e);
        }

        let data = self.hydrate(messages, viewer_id).await?;
        Ok(PaginatedResponse::new(data, total, params.page(), params.limit()))
    }

    /// Attaches reaction summaries (as seen by `viewer_id`) and attachment
    /// descriptors to a batch of messages, preserving order.
    pub async fn hydrate(&self, messages: Vec<Message>, viewer_id: i64) -> Result<Vec<MessageResponse>> {
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        let reactions = self.reactions.for_messages(&ids).await?;
        let attachment_ids: Vec<i64> = messages
            .iter()
            .filter(|m| m.message_type.has_attachment())
            .map(|m| m.id)
            .collect();
        let attachments = self.attachments.for_messages(&attachment_ids).await?;

        Ok(assemble(messages, reactions, attachments, viewer_id))
    }

    /// Marks the given messages read for `reader_id`, grouped per
    /// conversation. Messages the reader sent themselves are never flipped.
    /// Either every conversation is updated or none is.
    pub async fn mark_many_read(&self, reader_id: i64, message_ids: &[i64]) -> Result<Vec<MarkReadResponse>> {
        let conversation_ids = self.messages.conversation_ids_of(message_ids).await?;
        if conversation_ids.is_empty() {
            return Err(AppError::NotFound("No such messages".to_string()));
        }

        let outcomes = self
            .conversations
            .mark_read_across(&conversation_ids, reader_id, message_ids)
            .await?;

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let conversation_id = outcome.conversation.id;
            let side = outcome.conversation.ensure_participant(reader_id)?;

            self.broadcaster
                .read_receipt(conversation_id, reader_id, outcome.message_ids.clone())
                .await;

            results.push(MarkReadResponse {
                conversation_id,
                message_ids: outcome.message_ids,
                unread_count: outcome.conversation.unread_for(side),
            });
        }

        Ok(results)
    }

    pub async fn edit(&self, message_id: i64, caller_id: i64, payload: EditMessageRequest) -> Result<MessageResponse> {
        let existing = self.find_mutable(message_id, caller_id).await?;
        let content = self.clean_text(&payload.content)?;

        let message = self
            .messages
            .edit(message_id, caller_id, &content)
            .await?
            .ok_or_else(|| AppError::Conflict("Message can no longer be edited".to_string()))?;

        self.broadcaster
            .message_update(existing.conversation_id, message_id, MessageUpdateAction::Edited, &message.content)
            .await;

        let mut hydrated = self.hydrate(vec![message], caller_id).await?;
        hydrated.pop().ok_or(AppError::InternalError)
    }

    pub async fn soft_delete(&self, message_id: i64, caller_id: i64) -> Result<MessageResponse> {
        let existing = self.find_mutable(message_id, caller_id).await?;

        let message = self
            .messages
            .soft_delete(message_id, caller_id)
            .await?
            .ok_or_else(|| AppError::Conflict("Message can no longer be deleted".to_string()))?;

        info!(message_id, caller_id, "message deleted");

        self.broadcaster
            .message_update(existing.conversation_id, message_id, MessageUpdateAction::Deleted, &message.content)
            .await;

        Ok(MessageResponse::from(message))
    }

    pub async fn search(&self, user_id: i64, query: SearchQuery) -> Result<PaginatedResponse<MessageResponse>> {
        let term = query.q.trim();
        if term.is_empty() {
            return Err(AppError::BadRequest("Search query must not be empty".to_string()));
        }
        if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
            if from > to {
                return Err(AppError::BadRequest("date_from must not be after date_to".to_string()));
            }
        }

        let params = query.page_params();
        let filters = SearchFilters {
            query: term.to_string(),
            conversation_id: query.conversation_id,
            sender_id: query.sender_id,
            message_type: query.message_type,
            date_from: query.date_from,
            date_to: query.date_to,
        };

        let (messages, total) = self
            .messages
            .search(user_id, &filters, params.limit() as i64, params.offset())
            .await?;
        let data = self.hydrate(messages, user_id).await?;

        Ok(PaginatedResponse::new(data, total, params.page(), params.limit()))
    }

    async fn find_mutable(&self, message_id: i64, caller_id: i64) -> Result<Message> {
        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or(AppError::NotFound("Message not found".to_string()))?;

        if message.is_deleted() {
            return Err(AppError::Conflict("Message was deleted".to_string()));
        }
        if !message.is_mutable_by(caller_id) {
            return Err(AppError::Forbidden(
                "Only the sender can change this message".to_string(),
            ));
        }
        Ok(message)
    }
}

/// Trims, bounds and sanitizes user text. Content that is empty once markup
/// is stripped is rejected.
pub fn prepare_text(sanitizer: &Sanitizer, raw: &str, max_length: usize) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Message content is required".to_string()));
    }
    if trimmed.chars().count() > max_length {
        return Err(AppError::PayloadTooLarge(format!(
            "Message content exceeds {} characters",
            max_length
        )));
    }

    let cleaned = sanitizer.clean(trimmed);
    if cleaned.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Message content is empty after removing markup".to_string(),
        ));
    }
    Ok(cleaned)
}

pub fn offer_content(amount: f64) -> String {
    format!("Offer: {:.2}", amount)
}

fn assemble(
    messages: Vec<Message>,
    reactions: Vec<Reaction>,
    attachments: Vec<Attachment>,
    viewer_id: i64,
) -> Vec<MessageResponse> {
    let mut reactions_by_message: HashMap<i64, Vec<Reaction>> = HashMap::new();
    for reaction in reactions {
        reactions_by_message.entry(reaction.message_id).or_default().push(reaction);
    }

    let mut attachment_by_message: HashMap<i64, Attachment> = HashMap::new();
    for attachment in attachments {
        attachment_by_message.entry(attachment.message_id).or_insert(attachment);
    }

    messages
        .into_iter()
        .map(|message| {
            let id = message.id;
            let mut response = MessageResponse::from(message);
            if let Some(rows) = reactions_by_message.get(&id) {
                response.reactions = for_viewer(summarize(rows), viewer_id);
            }
            response.attachment = attachment_by_message.remove(&id).map(AttachmentResponse::from);
            response
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::message_models::fixtures::message;
    use chrono::Utc;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new().unwrap()
    }

    #[test]
    fn text_is_trimmed_and_sanitized() {
        let cleaned = prepare_text(&sanitizer(), "  <b>Hi</b><script>x()</script>  ", 100).unwrap();
        assert_eq!(cleaned, "<b>Hi</b>");
    }

    #[test]
    fn blank_or_markup_only_content_is_rejected() {
        assert!(matches!(
            prepare_text(&sanitizer(), "   ", 100),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            prepare_text(&sanitizer(), "<script>alert(1)</script>", 100),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn overlong_content_is_rejected_by_characters() {
        assert!(prepare_text(&sanitizer(), "ééééé", 5).is_ok());
        assert!(matches!(
            prepare_text(&sanitizer(), "éééééé", 5),
            Err(AppError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn offer_without_note_gets_amount_content() {
        assert_eq!(offer_content(150.0), "Offer: 150.00");
        assert_eq!(offer_content(9.999), "Offer: 10.00");
    }

    #[test]
    fn assemble_attaches_reactions_and_attachments_in_order() {
        let messages = vec![
            message(1, 10, MessageType::Text, "hello"),
            message(2, 20, MessageType::Image, "photo.png"),
        ];
        let reactions = vec![Reaction {
            id: 1,
            message_id: 1,
            user_id: 20,
            emoji: "👍".to_string(),
            created_at: Utc::now(),
        }];
        let attachments = vec![Attachment {
            id: 7,
            message_id: 2,
            file_path: "images/a.png".to_string(),
            file_size: 10,
            mime_type: "image/png".to_string(),
            original_name: "photo.png".to_string(),
            width: Some(4),
            height: Some(4),
            thumbnail_path: Some("images/thumbs/a_thumb.png".to_string()),
            created_at: Utc::now(),
        }];

        let out = assemble(messages, reactions, attachments, 20);

        assert_eq!(out.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(out[0].reactions.len(), 1);
        assert!(out[0].reactions[0].user_reacted);
        assert!(out[0].attachment.is_none());
        let attachment = out[1].attachment.as_ref().unwrap();
        assert_eq!(attachment.url, "/uploads/images/a.png");
        assert!(out[1].reactions.is_empty());
    }
}
