use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{
    channels::{ChannelOutcome, NotificationChannel},
    notification_models::{ChannelKind, NotificationKind, NotificationSettings, OutboundNotification},
    quiet_hours::{self, Suppression},
};
use crate::{
    conversation::conversation_models::Conversation,
    directory::{ArticleDirectory, UserDirectory},
    error::Result,
    message::{message_models::{MessageResponse, MessageType}, sanitize::plain_text},
};

const PREVIEW_CHARS: usize = 140;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Loads the user's settings, creating defaults on first use.
    async fn settings_for(&self, user_id: i64) -> Result<NotificationSettings>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub user_id: i64,
    pub suppressed: Option<Suppression>,
    pub delivered: Vec<ChannelKind>,
    pub skipped: Vec<ChannelKind>,
    pub failed: Vec<ChannelKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub attempted: usize,
    pub suppressed: usize,
    pub delivered: usize,
    pub batches: usize,
}

/// Content of a platform-wide notice sent through [`NotificationDispatcher::dispatch_bulk`].
#[derive(Debug, Clone)]
pub struct BulkNotice {
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub data: serde_json::Value,
}

/// Turns persisted messages (and bulk notices) into per-channel deliveries,
/// honoring each recipient's preferences.
#[derive(Clone)]
pub struct NotificationDispatcher {
    settings: Arc<dyn SettingsStore>,
    users: Arc<dyn UserDirectory>,
    articles: Arc<dyn ArticleDirectory>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    app_base_url: String,
    batch_size: usize,
    batch_pause: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        users: Arc<dyn UserDirectory>,
        articles: Arc<dyn ArticleDirectory>,
        app_base_url: &str,
    ) -> Self {
        Self {
            settings,
            users,
            articles,
            channels: Vec::new(),
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
            batch_size: 50,
            batch_pause: Duration::from_millis(500),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_batching(mut self, batch_size: usize, batch_pause: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_pause = batch_pause;
        self
    }

    pub async fn on_new_message(
        &self,
        conversation: &Conversation,
        message: &MessageResponse,
    ) -> Option<DispatchReport> {
        self.on_new_message_at(conversation, message, Utc::now()).await
    }

    /// System messages address both participants and are not notified; for
    /// everything else the recipient is the participant who did not send it.
    pub async fn on_new_message_at(
        &self,
        conversation: &Conversation,
        message: &MessageResponse,
        now: DateTime<Utc>,
    ) -> Option<DispatchReport> {
        if message.is_system {
            return None;
        }
        let recipient_id = conversation.counterpart_of(message.sender_id)?;

        let settings = match self.settings.settings_for(recipient_id).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(user_id = recipient_id, "could not load notification settings: {}", e);
                return None;
            }
        };

        if let Some(reason) = quiet_hours::evaluate(&settings, now) {
            debug!(user_id = recipient_id, ?reason, "notification suppressed");
            return Some(DispatchReport {
                user_id: recipient_id,
                suppressed: Some(reason),
                ..Default::default()
            });
        }

        let recipient = self.lookup_user(recipient_id).await;
        let sender_name = self
            .lookup_user(message.sender_id)
            .await
            .map(|u| u.username)
            .unwrap_or_else(|| "Someone".to_string());
        let article_title = match self.articles.summary(conversation.article_id).await {
            Ok(summary) => summary.map(|a| a.title),
            Err(e) => {
                warn!(article_id = conversation.article_id, "article lookup failed: {}", e);
                None
            }
        };

        let title = match article_title {
            Some(article) => format!("New message from {} about \"{}\"", sender_name, article),
            None => format!("New message from {}", sender_name),
        };

        let notification = OutboundNotification {
            user_id: recipient_id,
            email: recipient.as_ref().map(|u| u.email.clone()),
            recipient_name: recipient.map(|u| u.username),
            kind: NotificationKind::NewMessage,
            title,
            preview: preview_for(message),
            link: Some(format!("{}/messages/{}", self.app_base_url, conversation.id)),
            sound: settings.sound_enabled,
            data: serde_json::json!({
                "conversation_id": conversation.id,
                "message_id": message.id,
                "article_id": conversation.article_id,
                "message_type": message.message_type,
            }),
        };

        Some(self.deliver(&settings, &notification).await)
    }

    /// Sends one notice to many users in batches of `batch_size`, pausing
    /// between batches. Each user goes through the same gating and channels
    /// as a message notification.
    pub async fn dispatch_bulk(&self, user_ids: &[i64], notice: &BulkNotice) -> BulkReport {
        self.dispatch_bulk_at(user_ids, notice, Utc::now()).await
    }

    pub async fn dispatch_bulk_at(
        &self,
        user_ids: &[i64],
        notice: &BulkNotice,
        now: DateTime<Utc>,
    ) -> BulkReport {
        let mut report = BulkReport::default();
        let batches: Vec<&[i64]> = user_ids.chunks(self.batch_size).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let results = join_all(batch.iter().map(|user_id| self.notify_user(*user_id, notice, now))).await;

            for result in results.into_iter().flatten() {
                report.attempted += 1;
                if result.suppressed.is_some() {
                    report.suppressed += 1;
                } else if !result.delivered.is_empty() {
                    report.delivered += 1;
                }
            }
            report.batches += 1;

            if index + 1 < batch_count && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            suppressed = report.suppressed,
            batches = report.batches,
            "bulk notification finished"
        );
        report
    }

    async fn notify_user(
        &self,
        user_id: i64,
        notice: &BulkNotice,
        now: DateTime<Utc>,
    ) -> Option<DispatchReport> {
        let settings = match self.settings.settings_for(user_id).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(user_id, "could not load notification settings: {}", e);
                return None;
            }
        };

        if let Some(reason) = quiet_hours::evaluate(&settings, now) {
            return Some(DispatchReport {
                user_id,
                suppressed: Some(reason),
                ..Default::default()
            });
        }

        let recipient = self.lookup_user(user_id).await;
        let notification = OutboundNotification {
            user_id,
            email: recipient.as_ref().map(|u| u.email.clone()),
            recipient_name: recipient.map(|u| u.username),
            kind: NotificationKind::System,
            title: notice.title.clone(),
            preview: notice.body.clone(),
            link: notice.link.clone(),
            sound: settings.sound_enabled,
            data: notice.data.clone(),
        };

        Some(self.deliver(&settings, &notification).await)
    }

    /// Attempts every enabled channel. A failing channel is logged and
    /// recorded; it never stops the remaining channels.
    async fn deliver(
        &self,
        settings: &NotificationSettings,
        notification: &OutboundNotification,
    ) -> DispatchReport {
        let mut report = DispatchReport {
            user_id: notification.user_id,
            ..Default::default()
        };

        for channel in &self.channels {
            let kind = channel.kind();
            if !settings.channel_enabled(kind) {
                continue;
            }
            match channel.deliver(notification).await {
                Ok(ChannelOutcome::Delivered) => report.delivered.push(kind),
                Ok(ChannelOutcome::Skipped(reason)) => {
                    debug!(user_id = notification.user_id, channel = %kind, reason, "channel skipped");
                    report.skipped.push(kind);
                }
                Err(e) => {
                    warn!(user_id = notification.user_id, channel = %kind, "notification channel failed: {}", e);
                    report.failed.push(kind);
                }
            }
        }

        report
    }

    async fn lookup_user(&self, user_id: i64) -> Option<crate::directory::UserContact> {
        match self.users.contact(user_id).await {
            Ok(contact) => contact,
            Err(e) => {
                warn!(user_id, "user lookup failed: {}", e);
                None
            }
        }
    }
}

/// Human preview of a message, differing by message type.
pub fn preview_for(message: &MessageResponse) -> String {
    match message.message_type {
        MessageType::Text | MessageType::System => truncate(&plain_text(&message.content), PREVIEW_CHARS),
        MessageType::Image => "📷 Sent a photo".to_string(),
        MessageType::File => match &message.attachment {
            Some(attachment) => format!("📎 Sent a file: {}", attachment.original_name),
            None => "📎 Sent a file".to_string(),
        },
        MessageType::Offer => {
            let amount = message
                .metadata
                .as_ref()
                .and_then(|m| m.get("amount"))
                .and_then(|a| a.as_f64());
            match amount {
                Some(amount) => format!("💰 Made an offer: {:.2}", amount),
                None => "💰 Made an offer".to_string(),
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attachment::attachment_models::AttachmentResponse,
        conversation::conversation_models::fixtures::conversation,
        directory::{ArticleSummary, UserContact},
        error::AppError,
        message::message_models::fixtures::message,
        notification::notification_models::NotificationFrequency,
    };
    use chrono::{NaiveTime, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedSettings(Mutex<HashMap<i64, NotificationSettings>>);

    impl FixedSettings {
        fn with(settings: Vec<NotificationSettings>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                settings.into_iter().map(|s| (s.user_id, s)).collect(),
            )))
        }
    }

    #[async_trait]
    impl SettingsStore for FixedSettings {
        async fn settings_for(&self, user_id: i64) -> Result<NotificationSettings> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .entry(user_id)
                .or_insert_with(|| NotificationSettings::defaults(user_id))
                .clone())
        }
    }

    struct Users;

    #[async_trait]
    impl UserDirectory for Users {
        async fn contact(&self, user_id: i64) -> Result<Option<UserContact>> {
            Ok(Some(UserContact {
                id: user_id,
                username: format!("user{}", user_id),
                email: format!("user{}@example.com", user_id),
            }))
        }
    }

    struct Articles;

    #[async_trait]
    impl ArticleDirectory for Articles {
        async fn summary(&self, article_id: i64) -> Result<Option<ArticleSummary>> {
            Ok(Some(ArticleSummary {
                id: article_id,
                seller_id: 20,
                title: "Road bike".to_string(),
                price: Some(250.0),
                status: "active".to_string(),
            }))
        }
    }

    /// Records what it was asked to deliver; optionally always fails.
    struct RecordingChannel {
        kind: ChannelKind,
        fail: bool,
        seen: Mutex<Vec<OutboundNotification>>,
    }

    impl RecordingChannel {
        fn new(kind: ChannelKind, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn deliver(&self, notification: &OutboundNotification) -> Result<ChannelOutcome> {
            self.seen.lock().unwrap().push(notification.clone());
            if self.fail {
                Err(AppError::Email("smtp down".to_string()))
            } else {
                Ok(ChannelOutcome::Delivered)
            }
        }
    }

    fn dispatcher(settings: Arc<FixedSettings>) -> NotificationDispatcher {
        NotificationDispatcher::new(settings, Arc::new(Users), Arc::new(Articles), "https://market.example.com")
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn quiet(user_id: i64, start: u32, end: u32) -> NotificationSettings {
        let mut settings = NotificationSettings::defaults(user_id);
        settings.quiet_hours_start = NaiveTime::from_hms_opt(start, 0, 0);
        settings.quiet_hours_end = NaiveTime::from_hms_opt(end, 0, 0);
        settings
    }

    #[tokio::test]
    async fn buyer_message_emails_seller_with_preview() {
        let email = RecordingChannel::new(ChannelKind::Email, false);
        let dispatcher = dispatcher(FixedSettings::with(vec![])).with_channel(email.clone());
        let conv = conversation(10, 20);
        let msg = MessageResponse::from(message(1, 10, MessageType::Text, "Is this available?"));

        let report = dispatcher.on_new_message_at(&conv, &msg, at(12, 0)).await.unwrap();

        assert_eq!(report.user_id, 20);
        assert_eq!(report.delivered, vec![ChannelKind::Email]);
        let sent = email.seen.lock().unwrap();
        assert_eq!(sent[0].preview, "Is this available?");
        assert_eq!(sent[0].email.as_deref(), Some("user20@example.com"));
        assert_eq!(sent[0].title, "New message from user10 about \"Road bike\"");
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_the_others() {
        let email = RecordingChannel::new(ChannelKind::Email, true);
        let push = RecordingChannel::new(ChannelKind::Push, false);
        let in_app = RecordingChannel::new(ChannelKind::InApp, false);
        let dispatcher = dispatcher(FixedSettings::with(vec![]))
            .with_channel(email.clone())
            .with_channel(push.clone())
            .with_channel(in_app.clone());
        let conv = conversation(10, 20);
        let msg = MessageResponse::from(message(1, 20, MessageType::Text, "Yes it is"));

        let report = dispatcher.on_new_message_at(&conv, &msg, at(12, 0)).await.unwrap();

        assert_eq!(report.user_id, 10);
        assert_eq!(report.failed, vec![ChannelKind::Email]);
        assert_eq!(report.delivered, vec![ChannelKind::Push, ChannelKind::InApp]);
        assert_eq!(push.count(), 1);
        assert_eq!(in_app.count(), 1);
    }

    #[tokio::test]
    async fn quiet_hours_suppress_every_channel() {
        let email = RecordingChannel::new(ChannelKind::Email, false);
        let push = RecordingChannel::new(ChannelKind::Push, false);
        let dispatcher = dispatcher(FixedSettings::with(vec![quiet(20, 22, 6)]))
            .with_channel(email.clone())
            .with_channel(push.clone());
        let conv = conversation(10, 20);
        let msg = MessageResponse::from(message(1, 10, MessageType::Text, "late"));

        let late = dispatcher.on_new_message_at(&conv, &msg, at(23, 30)).await.unwrap();
        let early = dispatcher.on_new_message_at(&conv, &msg, at(5, 0)).await.unwrap();
        assert_eq!(late.suppressed, Some(Suppression::QuietHours));
        assert_eq!(early.suppressed, Some(Suppression::QuietHours));
        assert_eq!(email.count() + push.count(), 0);

        let noon = dispatcher.on_new_message_at(&conv, &msg, at(12, 0)).await.unwrap();
        assert!(noon.suppressed.is_none());
        assert_eq!(email.count(), 1);
    }

    #[tokio::test]
    async fn disabled_channels_and_never_frequency() {
        let email = RecordingChannel::new(ChannelKind::Email, false);
        let push = RecordingChannel::new(ChannelKind::Push, false);
        let mut no_email = NotificationSettings::defaults(20);
        no_email.email_enabled = false;
        let mut never = NotificationSettings::defaults(10);
        never.frequency = NotificationFrequency::Never;
        let dispatcher = dispatcher(FixedSettings::with(vec![no_email, never]))
            .with_channel(email.clone())
            .with_channel(push.clone());
        let conv = conversation(10, 20);

        let to_seller = MessageResponse::from(message(1, 10, MessageType::Text, "hi"));
        let report = dispatcher.on_new_message_at(&conv, &to_seller, at(12, 0)).await.unwrap();
        assert_eq!(report.delivered, vec![ChannelKind::Push]);
        assert_eq!(email.count(), 0);

        let to_buyer = MessageResponse::from(message(2, 20, MessageType::Text, "hello"));
        let report = dispatcher.on_new_message_at(&conv, &to_buyer, at(12, 0)).await.unwrap();
        assert_eq!(report.suppressed, Some(Suppression::FrequencyNever));
        assert_eq!(push.count(), 1);
    }

    #[tokio::test]
    async fn system_messages_are_not_notified() {
        let email = RecordingChannel::new(ChannelKind::Email, false);
        let dispatcher = dispatcher(FixedSettings::with(vec![])).with_channel(email.clone());
        let conv = conversation(10, 20);
        let msg = MessageResponse::from(message(1, 0, MessageType::System, "Conversation blocked"));

        assert!(dispatcher.on_new_message_at(&conv, &msg, at(12, 0)).await.is_none());
        assert_eq!(email.count(), 0);
    }

    #[tokio::test]
    async fn bulk_dispatch_runs_in_batches() {
        let in_app = RecordingChannel::new(ChannelKind::InApp, false);
        let dispatcher = dispatcher(FixedSettings::with(vec![quiet(3, 9, 17)]))
            .with_channel(in_app.clone())
            .with_batching(2, Duration::from_millis(1));
        let notice = BulkNotice {
            title: "Maintenance".to_string(),
            body: "Chat will be down tonight".to_string(),
            link: None,
            data: serde_json::json!({}),
        };

        let report = dispatcher.dispatch_bulk_at(&[1, 2, 3, 4, 5], &notice, at(12, 0)).await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.attempted, 5);
        assert_eq!(report.suppressed, 1);
        assert_eq!(report.delivered, 4);
        assert_eq!(in_app.count(), 4);
    }

    #[test]
    fn previews_differ_by_type() {
        let text = MessageResponse::from(message(1, 10, MessageType::Text, "<b>Tom &amp; Jerry</b>"));
        assert_eq!(preview_for(&text), "Tom & Jerry");

        let image = MessageResponse::from(message(2, 10, MessageType::Image, "photo.jpg"));
        assert_eq!(preview_for(&image), "📷 Sent a photo");

        let mut file = MessageResponse::from(message(3, 10, MessageType::File, "manual.pdf"));
        file.attachment = Some(AttachmentResponse {
            id: 1,
            message_id: 3,
            url: "/uploads/files/x.pdf".to_string(),
            thumbnail_url: None,
            file_size: 10,
            mime_type: "application/pdf".to_string(),
            original_name: "manual.pdf".to_string(),
            width: None,
            height: None,
        });
        assert_eq!(preview_for(&file), "📎 Sent a file: manual.pdf");

        let mut offer = MessageResponse::from(message(4, 10, MessageType::Offer, "Offer"));
        offer.metadata = Some(serde_json::json!({ "amount": 120.5, "status": "pending" }));
        assert_eq!(preview_for(&offer), "💰 Made an offer: 120.50");
    }

    #[test]
    fn long_previews_are_truncated() {
        let long = "a".repeat(200);
        let text = MessageResponse::from(message(1, 10, MessageType::Text, &long));
        let preview = preview_for(&text);
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 1);
        assert!(preview.ends_with('…'));
    }
}
