pub mod email;
pub mod in_app;
pub mod push;

use async_trait::async_trait;

use super::notification_models::{ChannelKind, OutboundNotification};
use crate::error::Result;

pub use email::{EmailChannel, EmailSettings};
pub use in_app::InAppChannel;
pub use push::{PushChannel, WebPushGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Delivered,
    /// Nothing to do on this channel, e.g. no address or no subscriptions.
    Skipped(&'static str),
}

/// One outbound delivery path. Implementations own their transport and
/// report failures as errors; the dispatcher keeps one channel's failure
/// from reaching the others.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn deliver(&self, notification: &OutboundNotification) -> Result<ChannelOutcome>;
}
