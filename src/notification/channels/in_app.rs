use async_trait::async_trait;

use super::{ChannelOutcome, NotificationChannel};
use crate::{
    error::Result,
    notification::{
        notification_models::{ChannelKind, OutboundNotification},
        notification_repository::NotificationRepository,
    },
};

#[derive(Clone)]
pub struct InAppChannel {
    repo: NotificationRepository,
}

impl InAppChannel {
    pub fn new(repo: NotificationRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    async fn deliver(&self, notification: &OutboundNotification) -> Result<ChannelOutcome> {
        self.repo
            .create(
                notification.user_id,
                notification.kind.as_str(),
                &notification.title,
                &notification.preview,
                Some(&notification.data),
            )
            .await?;

        Ok(ChannelOutcome::Delivered)
    }
}
