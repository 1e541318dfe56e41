use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::quiet_hours::QuietHours;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationFrequency {
    Instant,
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Push,
    InApp,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Push => write!(f, "push"),
            ChannelKind::InApp => write!(f, "in_app"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct NotificationSettings {
    pub user_id: i64,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub sound_enabled: bool,
    pub frequency: NotificationFrequency,
    #[schema(value_type = Option<String>, example = "22:00:00")]
    pub quiet_hours_start: Option<NaiveTime>,
    #[schema(value_type = Option<String>, example = "06:00:00")]
    pub quiet_hours_end: Option<NaiveTime>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationSettings {
    /// Same values as the column defaults.
    pub fn defaults(user_id: i64) -> Self {
        Self {
            user_id,
            email_enabled: true,
            push_enabled: true,
            in_app_enabled: true,
            sound_enabled: true,
            frequency: NotificationFrequency::Instant,
            quiet_hours_start: None,
            quiet_hours_end: None,
            updated_at: Utc::now(),
        }
    }

    pub fn channel_enabled(&self, channel: ChannelKind) -> bool {
        match channel {
            ChannelKind::Email => self.email_enabled,
            ChannelKind::Push => self.push_enabled,
            ChannelKind::InApp => self.in_app_enabled,
        }
    }

    pub fn quiet_hours(&self) -> Option<QuietHours> {
        match (self.quiet_hours_start, self.quiet_hours_end) {
            (Some(start), Some(end)) => Some(QuietHours::new(start, end)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct PushSubscription {
    pub id: i64,
    pub user_id: i64,
    pub endpoint: String,
    pub p256dh_key: String,
    pub auth_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted in-app notification.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewMessage,
    System,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::NewMessage => "new_message",
            NotificationKind::System => "system",
        }
    }
}

/// Everything a channel needs to deliver one notification to one user.
#[derive(Debug, Clone)]
pub struct OutboundNotification {
    pub user_id: i64,
    pub email: Option<String>,
    pub recipient_name: Option<String>,
    pub kind: NotificationKind,
    pub title: String,
    /// Human-readable preview, already reduced to plain text.
    pub preview: String,
    /// Deep link into the app, when one exists.
    pub link: Option<String>,
    /// Mirrors the recipient's sound toggle for clients that play one.
    pub sound: bool,
    pub data: serde_json::Value,
}
