use tracing::{error, info};

use super::{
    attachment_models::{AttachmentResponse, FileClass, IncomingFile, StoredFile},
    attachment_repository::{self, AttachmentOwnership, AttachmentRepository},
    attachment_storage::AttachmentStorage,
    attachment_validation::{self, SizeLimits},
};
use crate::{
    conversation::{
        conversation_models::{Conversation, ConversationStatus},
        conversation_repository::ConversationRepository,
    },
    error::{AppError, Result},
    message::{
        message_models::{MessageResponse, MessageType, NewMessage},
        message_repository,
        sanitize::escape,
        MessageService,
    },
};

#[derive(Clone)]
pub struct AttachmentService {
    storage: AttachmentStorage,
    limits: SizeLimits,
    attachments: AttachmentRepository,
    conversations: ConversationRepository,
    messages: MessageService,
}

impl AttachmentService {
    pub fn new(
        storage: AttachmentStorage,
        limits: SizeLimits,
        attachments: AttachmentRepository,
        conversations: ConversationRepository,
        messages: MessageService,
    ) -> Self {
        Self {
            storage,
            limits,
            attachments,
            conversations,
            messages,
        }
    }

    pub fn storage(&self) -> &AttachmentStorage {
        &self.storage
    }

    /// Validates, stores and attaches one upload as a new image or file
    /// message. Nothing is written before validation and access checks pass;
    /// if the message write fails, the stored files are removed again.
    pub async fn upload(
        &self,
        conversation_id: i64,
        sender_id: i64,
        file: IncomingFile,
        caption: Option<String>,
    ) -> Result<MessageResponse> {
        let validated = attachment_validation::validate(file, &self.limits)?;
        let caption = caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| self.messages.clean_text(c))
            .transpose()?;

        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or(AppError::NotFound("Conversation not found".to_string()))?;
        conversation.ensure_participant(sender_id)?;
        if conversation.status == ConversationStatus::Blocked {
            return Err(AppError::Forbidden("This conversation is blocked".to_string()));
        }

        let stored = self.storage.ingest(validated).await?;

        let written = self
            .attach_to_message(conversation_id, sender_id, &stored, caption)
            .await;
        if let Err(e) = &written {
            error!(conversation_id, path = %stored.file_path, "attachment rolled back: {}", e);
        }
        let (response, conversation) = self.storage.discard_on_error(&stored, written).await?;

        info!(
            message_id = response.id,
            conversation_id,
            size = stored.file_size,
            "attachment uploaded"
        );

        self.messages.publish_created(&conversation, &response).await;
        Ok(response)
    }

    /// Message row and attachment row commit together or not at all.
    async fn attach_to_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        stored: &StoredFile,
        caption: Option<String>,
    ) -> Result<(MessageResponse, Conversation)> {
        let message_type = match stored.class {
            FileClass::Image => MessageType::Image,
            FileClass::Document => MessageType::File,
        };

        let mut tx = self.conversations.pool().begin().await?;

        let (message, conversation) = message_repository::insert_in_tx(
            &mut tx,
            &NewMessage {
                conversation_id,
                sender_id,
                content: caption.unwrap_or_else(|| escape(&stored.original_name)),
                message_type,
                reply_to_id: None,
                metadata: None,
            },
        )
        .await?;
        let attachment = attachment_repository::insert_in_tx(&mut tx, message.id, stored).await?;

        tx.commit().await?;

        let mut response = MessageResponse::from(message);
        response.attachment = Some(AttachmentResponse::from(attachment));
        Ok((response, conversation))
    }

    /// Removes the attachment row, then its files. Allowed for the sender
    /// and for either participant of the conversation.
    pub async fn delete(&self, attachment_id: i64, caller_id: i64) -> Result<()> {
        let owned = self
            .attachments
            .find_with_ownership(attachment_id)
            .await?
            .ok_or(AppError::NotFound("Attachment not found".to_string()))?;

        if !may_delete(&owned, caller_id) {
            return Err(AppError::Forbidden(
                "You cannot delete this attachment".to_string(),
            ));
        }

        if !self.attachments.delete(attachment_id).await? {
            return Err(AppError::NotFound("Attachment not found".to_string()));
        }

        let mut paths = vec![owned.attachment.file_path.as_str()];
        if let Some(thumb) = owned.attachment.thumbnail_path.as_deref() {
            paths.push(thumb);
        }
        self.storage.remove(&paths).await;

        info!(attachment_id, caller_id, conversation_id = owned.conversation_id, "attachment deleted");
        Ok(())
    }
}

fn may_delete(owned: &AttachmentOwnership, caller_id: i64) -> bool {
    caller_id == owned.sender_id || caller_id == owned.buyer_id || caller_id == owned.seller_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::attachment_models::Attachment;
    use chrono::Utc;

    fn owned(sender_id: i64) -> AttachmentOwnership {
        AttachmentOwnership {
            attachment: Attachment {
                id: 1,
                message_id: 5,
                file_path: "files/x.pdf".to_string(),
                file_size: 10,
                mime_type: "application/pdf".to_string(),
                original_name: "x.pdf".to_string(),
                width: None,
                height: None,
                thumbnail_path: None,
                created_at: Utc::now(),
            },
            sender_id,
            conversation_id: 1,
            buyer_id: 10,
            seller_id: 20,
        }
    }

    #[test]
    fn participants_may_delete_outsiders_may_not() {
        let attachment = owned(10);
        assert!(may_delete(&attachment, 10));
        assert!(may_delete(&attachment, 20));
        assert!(!may_delete(&attachment, 30));
    }
}
