use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::notification_models::{Notification, NotificationFrequency};
use crate::{
    error::{AppError, Result},
    pagination::PageParams,
};

/// Full replacement of a user's notification settings.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateSettingsRequest {
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub sound_enabled: bool,
    pub frequency: NotificationFrequency,
    #[schema(value_type = Option<String>, example = "22:00:00")]
    pub quiet_hours_start: Option<NaiveTime>,
    #[schema(value_type = Option<String>, example = "06:00:00")]
    pub quiet_hours_end: Option<NaiveTime>,
}

impl UpdateSettingsRequest {
    /// A quiet-hours window needs both bounds or neither.
    pub fn check(&self) -> Result<()> {
        match (self.quiet_hours_start, self.quiet_hours_end) {
            (Some(_), None) | (None, Some(_)) => Err(AppError::BadRequest(
                "quiet_hours_start and quiet_hours_end must be set together".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PushKeys {
    #[validate(length(min = 1))]
    pub p256dh: String,
    #[validate(length(min = 1))]
    pub auth: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PushSubscriptionRequest {
    #[validate(url)]
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PushUnsubscribeRequest {
    #[validate(length(min = 1))]
    pub endpoint: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct NotificationListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Only unread notifications
    #[serde(default)]
    pub unread_only: bool,
}

impl NotificationListQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationListResponse {
    pub data: Vec<Notification>,
    pub total: i64,
    pub unread_count: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: Option<u32>, end: Option<u32>) -> UpdateSettingsRequest {
        UpdateSettingsRequest {
            email_enabled: true,
            push_enabled: true,
            in_app_enabled: true,
            sound_enabled: false,
            frequency: NotificationFrequency::Instant,
            quiet_hours_start: start.and_then(|h| NaiveTime::from_hms_opt(h, 0, 0)),
            quiet_hours_end: end.and_then(|h| NaiveTime::from_hms_opt(h, 0, 0)),
        }
    }

    #[test]
    fn quiet_hours_must_be_set_together() {
        assert!(request(None, None).check().is_ok());
        assert!(request(Some(22), Some(6)).check().is_ok());
        assert!(request(Some(22), None).check().is_err());
    }

    #[test]
    fn push_endpoint_must_be_a_url() {
        let bad = PushSubscriptionRequest {
            endpoint: "not a url".to_string(),
            keys: PushKeys {
                p256dh: "key".to_string(),
                auth: "auth".to_string(),
            },
        };
        assert!(bad.validate().is_err());
    }
}
