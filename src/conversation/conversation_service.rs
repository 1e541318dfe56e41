use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    conversation_dto::{ConversationView, LastMessagePreview},
    conversation_models::{Conversation, ConversationStatus},
    conversation_repository::{ConversationListRow, ConversationRepository},
};
use crate::{
    directory::{ArticleDirectory, ArticleSummary},
    error::{AppError, Result},
    message::{
        message_dto::MarkReadResponse, message_models::MessageResponse, sanitize::plain_text, MessageService,
    },
    pagination::{PageParams, PaginatedResponse},
    presence::{presence_models::PresenceStatus, ConnectionRegistry},
    realtime::broadcaster::Broadcaster,
};

const PREVIEW_CHARS: usize = 100;

#[derive(Clone)]
pub struct ConversationService {
    conversations: ConversationRepository,
    messages: MessageService,
    articles: Arc<dyn ArticleDirectory>,
    registry: ConnectionRegistry,
    broadcaster: Broadcaster,
}

impl ConversationService {
    pub fn new(
        conversations: ConversationRepository,
        messages: MessageService,
        articles: Arc<dyn ArticleDirectory>,
        registry: ConnectionRegistry,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            conversations,
            messages,
            articles,
            registry,
            broadcaster,
        }
    }

    /// Opens (or reopens) the caller's conversation with `seller_id` about
    /// `article_id`. The caller is always the buyer and `seller_id` must be
    /// the article's seller.
    pub async fn find_or_create(
        &self,
        buyer_id: i64,
        article_id: i64,
        seller_id: i64,
    ) -> Result<(ConversationView, bool)> {
        if buyer_id == seller_id {
            return Err(AppError::BadRequest(
                "You cannot start a conversation with yourself".to_string(),
            ));
        }
        let article = self
            .articles
            .summary(article_id)
            .await?
            .ok_or(AppError::NotFound("Article not found".to_string()))?;
        check_parties(&article, buyer_id, seller_id)?;

        let (conversation, created) = self
            .conversations
            .find_or_create(article_id, buyer_id, seller_id)
            .await?;
        if created {
            info!(conversation_id = conversation.id, article_id, buyer_id, seller_id, "conversation created");
        }

        let view = self.get(conversation.id, buyer_id).await?;
        Ok((view, created))
    }

    pub async fn get(&self, conversation_id: i64, user_id: i64) -> Result<ConversationView> {
        let row = self
            .conversations
            .find_row(conversation_id)
            .await?
            .ok_or(AppError::NotFound("Conversation not found".to_string()))?;
        row.conversation.ensure_participant(user_id)?;

        self.view(row, user_id).await
    }

    pub async fn list(&self, user_id: i64, params: PageParams) -> Result<PaginatedResponse<ConversationView>> {
        let (rows, total) = self
            .conversations
            .list_for_user(user_id, params.limit() as i64, params.offset())
            .await?;

        let views = join_all(rows.into_iter().map(|row| self.view(row, user_id)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        Ok(PaginatedResponse::new(views, total, params.page(), params.limit()))
    }

    /// Marks every unread message from the counterpart as read.
    pub async fn mark_read(&self, conversation_id: i64, reader_id: i64) -> Result<MarkReadResponse> {
        let outcome = self
            .conversations
            .mark_read(conversation_id, reader_id, None)
            .await?;
        let side = outcome.conversation.ensure_participant(reader_id)?;

        self.broadcaster
            .read_receipt(conversation_id, reader_id, outcome.message_ids.clone())
            .await;

        Ok(MarkReadResponse {
            conversation_id,
            message_ids: outcome.message_ids,
            unread_count: outcome.conversation.unread_for(side),
        })
    }

    pub async fn set_typing(&self, conversation_id: i64, user_id: i64, is_typing: bool) -> Result<()> {
        let conversation = self.participant_conversation(conversation_id, user_id).await?;
        let side = conversation.ensure_participant(user_id)?;

        self.conversations
            .set_typing(conversation_id, side, is_typing)
            .await?;
        self.broadcaster.typing(conversation_id, user_id, is_typing).await;
        Ok(())
    }

    pub async fn touch_last_seen(&self, conversation_id: i64, user_id: i64) -> Result<()> {
        let conversation = self.participant_conversation(conversation_id, user_id).await?;
        let side = conversation.ensure_participant(user_id)?;
        self.conversations.touch_last_seen(conversation_id, side).await
    }

    pub async fn block(
        &self,
        conversation_id: i64,
        blocker_id: i64,
        reason: Option<&str>,
    ) -> Result<ConversationView> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        let (conversation, note) = self
            .conversations
            .block(conversation_id, blocker_id, reason, "This conversation has been blocked.")
            .await?;

        info!(conversation_id, blocker_id, "conversation blocked");
        self.messages
            .publish_created(&conversation, &MessageResponse::from(note))
            .await;

        self.get(conversation_id, blocker_id).await
    }

    pub async fn unblock(&self, conversation_id: i64, caller_id: i64) -> Result<ConversationView> {
        let (conversation, note) = self
            .conversations
            .unblock(conversation_id, caller_id, "This conversation has been unblocked.")
            .await?;

        info!(conversation_id, caller_id, status = %conversation.status, "conversation unblocked");
        self.messages
            .publish_created(&conversation, &MessageResponse::from(note))
            .await;

        self.get(conversation_id, caller_id).await
    }

    pub async fn set_status(
        &self,
        conversation_id: i64,
        caller_id: i64,
        status: ConversationStatus,
    ) -> Result<ConversationView> {
        let note = match status {
            ConversationStatus::Archived => "This conversation has been archived.",
            ConversationStatus::Active => "This conversation has been restored.",
            ConversationStatus::Blocked => {
                return Err(AppError::BadRequest(
                    "Use the block operation to block a conversation".to_string(),
                ))
            }
        };

        let (conversation, note) = self
            .conversations
            .set_status(conversation_id, caller_id, status, note)
            .await?;

        self.messages
            .publish_created(&conversation, &MessageResponse::from(note))
            .await;

        self.get(conversation_id, caller_id).await
    }

    /// Every conversation the user takes part in, for realtime subscriptions.
    pub async fn conversation_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.conversations.conversation_ids_for_user(user_id).await
    }

    pub async fn ensure_access(&self, conversation_id: i64, user_id: i64) -> Result<()> {
        self.participant_conversation(conversation_id, user_id).await.map(|_| ())
    }

    async fn participant_conversation(&self, conversation_id: i64, user_id: i64) -> Result<Conversation> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or(AppError::NotFound("Conversation not found".to_string()))?;
        conversation.ensure_participant(user_id)?;
        Ok(conversation)
    }

    async fn article(&self, article_id: i64) -> Option<ArticleSummary> {
        match self.articles.summary(article_id).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(article_id, "article lookup failed: {}", e);
                None
            }
        }
    }

    async fn view(&self, row: ConversationListRow, viewer_id: i64) -> Result<ConversationView> {
        let side = row.conversation.ensure_participant(viewer_id)?;
        let counterpart_id = row.conversation.participant(side.other());

        let article = self.article(row.conversation.article_id).await;
        let presence = match self.registry.is_online(counterpart_id).await {
            Ok(presence) => presence,
            Err(e) => {
                warn!(user_id = counterpart_id, "presence lookup failed: {}", e);
                PresenceStatus {
                    user_id: counterpart_id,
                    is_online: false,
                    last_seen: None,
                }
            }
        };

        build_view(row, viewer_id, article, presence, Utc::now(), self.broadcaster.typing_ttl())
    }
}

pub(crate) fn build_view(
    row: ConversationListRow,
    viewer_id: i64,
    article: Option<ArticleSummary>,
    presence: PresenceStatus,
    now: DateTime<Utc>,
    typing_ttl: Duration,
) -> Result<ConversationView> {
    let conversation = row.conversation;
    let side = conversation.ensure_participant(viewer_id)?;
    let counterpart = side.other();

    let last_message = match (row.last_message_type, row.last_message_sender_id, row.last_message_at) {
        (Some(message_type), Some(sender_id), Some(created_at)) => Some(LastMessagePreview {
            preview: preview_text(row.last_message_content.as_deref().unwrap_or_default()),
            message_type,
            sender_id,
            created_at,
        }),
        _ => None,
    };

    Ok(ConversationView {
        id: conversation.id,
        article_id: conversation.article_id,
        article,
        status: conversation.status,
        role: side,
        counterpart_id: conversation.participant(counterpart),
        counterpart_online: presence.is_online,
        counterpart_last_seen: presence.last_seen.or(conversation.last_seen_for(counterpart)),
        counterpart_typing: conversation.is_typing(counterpart, now, typing_ttl),
        unread_count: conversation.unread_for(side),
        last_message,
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
    })
}

/// The seller side of a conversation is always the article's seller.
fn check_parties(article: &ArticleSummary, buyer_id: i64, seller_id: i64) -> Result<()> {
    if article.seller_id == buyer_id {
        return Err(AppError::BadRequest(
            "You cannot start a conversation about your own article".to_string(),
        ));
    }
    if article.seller_id != seller_id {
        return Err(AppError::BadRequest(
            "seller_id does not match the article's seller".to_string(),
        ));
    }
    Ok(())
}

fn preview_text(content: &str) -> String {
    let text = plain_text(content);
    if text.chars().count() <= PREVIEW_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::conversation_models::{fixtures::conversation, Side};
    use crate::message::message_models::MessageType;

    fn row(last_content: Option<&str>) -> ConversationListRow {
        let mut conv = conversation(10, 20);
        conv.buyer_unread = 2;
        conv.seller_unread = 5;
        ConversationListRow {
            conversation: conv,
            last_message_content: last_content.map(str::to_string),
            last_message_type: last_content.map(|_| MessageType::Text),
            last_message_sender_id: last_content.map(|_| 20),
            last_message_at: last_content.map(|_| Utc::now()),
        }
    }

    fn offline(user_id: i64) -> PresenceStatus {
        PresenceStatus {
            user_id,
            is_online: false,
            last_seen: None,
        }
    }

    #[test]
    fn view_is_relative_to_the_viewer() {
        let as_buyer = build_view(row(None), 10, None, offline(20), Utc::now(), Duration::seconds(10)).unwrap();
        assert_eq!(as_buyer.role, Side::Buyer);
        assert_eq!(as_buyer.counterpart_id, 20);
        assert_eq!(as_buyer.unread_count, 2);
        assert!(as_buyer.last_message.is_none());

        let as_seller = build_view(row(None), 20, None, offline(10), Utc::now(), Duration::seconds(10)).unwrap();
        assert_eq!(as_seller.role, Side::Seller);
        assert_eq!(as_seller.counterpart_id, 10);
        assert_eq!(as_seller.unread_count, 5);
    }

    #[test]
    fn outsiders_get_no_view() {
        let result = build_view(row(None), 99, None, offline(10), Utc::now(), Duration::seconds(10));
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn last_message_preview_is_plain_text() {
        let view = build_view(
            row(Some("<b>Is this</b> available?")),
            10,
            None,
            offline(20),
            Utc::now(),
            Duration::seconds(10),
        )
        .unwrap();
        let last = view.last_message.unwrap();
        assert_eq!(last.preview, "Is this available?");
        assert_eq!(last.sender_id, 20);
    }

    fn bike(seller_id: i64) -> ArticleSummary {
        ArticleSummary {
            id: 7,
            seller_id,
            title: "Road bike".to_string(),
            price: Some(250.0),
            status: "active".to_string(),
        }
    }

    #[test]
    fn seller_is_taken_from_the_article() {
        assert!(check_parties(&bike(20), 10, 20).is_ok());
        assert!(matches!(check_parties(&bike(20), 10, 30), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn seller_cannot_open_a_thread_on_own_article() {
        // the seller naming the buyer as "seller" would swap the roles
        assert!(matches!(check_parties(&bike(20), 20, 10), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn stale_typing_flag_reads_as_not_typing() {
        let now = Utc::now();
        let mut r = row(None);
        r.conversation.seller_typing = true;
        r.conversation.seller_typing_at = Some(now - Duration::seconds(30));

        let view = build_view(r, 10, None, offline(20), now, Duration::seconds(10)).unwrap();
        assert!(!view.counterpart_typing);
    }
}
