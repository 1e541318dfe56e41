use super::{
    notification_dto::{
        NotificationListQuery, NotificationListResponse, PushSubscriptionRequest,
        UpdateSettingsRequest,
    },
    notification_models::{Notification, NotificationSettings, PushSubscription},
    notification_repository::NotificationRepository,
    push_subscription_repository::PushSubscriptionRepository,
    settings_repository::SettingsRepository,
};
use crate::{
    error::{AppError, Result},
    pagination::PaginatedResponse,
};

#[derive(Clone)]
pub struct NotificationService {
    settings: SettingsRepository,
    subscriptions: PushSubscriptionRepository,
    notifications: NotificationRepository,
}

impl NotificationService {
    pub fn new(
        settings: SettingsRepository,
        subscriptions: PushSubscriptionRepository,
        notifications: NotificationRepository,
    ) -> Self {
        Self {
            settings,
            subscriptions,
            notifications,
        }
    }

    pub async fn get_settings(&self, user_id: i64) -> Result<NotificationSettings> {
        self.settings.load_or_create(user_id).await
    }

    pub async fn update_settings(
        &self,
        user_id: i64,
        request: &UpdateSettingsRequest,
    ) -> Result<NotificationSettings> {
        request.check()?;
        self.settings.replace(user_id, request).await
    }

    pub async fn subscribe_push(
        &self,
        user_id: i64,
        request: &PushSubscriptionRequest,
    ) -> Result<PushSubscription> {
        self.subscriptions
            .upsert(user_id, &request.endpoint, &request.keys.p256dh, &request.keys.auth)
            .await
    }

    pub async fn unsubscribe_push(&self, user_id: i64, endpoint: &str) -> Result<()> {
        if !self.subscriptions.deactivate_endpoint(user_id, endpoint).await? {
            return Err(AppError::NotFound("Push subscription not found".to_string()));
        }
        Ok(())
    }

    pub async fn list(&self, user_id: i64, query: &NotificationListQuery) -> Result<NotificationListResponse> {
        let params = query.page_params();
        let (data, total) = self
            .notifications
            .list(user_id, query.unread_only, params.limit() as i64, params.offset())
            .await?;
        let unread_count = self.notifications.unread_count(user_id).await?;
        let page = PaginatedResponse::new(data, total, params.page(), params.limit());

        Ok(NotificationListResponse {
            data: page.data,
            total: page.total,
            unread_count,
            page: page.page,
            limit: page.limit,
            total_pages: page.total_pages,
        })
    }

    pub async fn mark_read(&self, user_id: i64, notification_id: i64) -> Result<Notification> {
        self.notifications
            .mark_read(notification_id, user_id)
            .await?
            .ok_or(AppError::NotFound("Notification not found".to_string()))
    }
}
