use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

use super::{
    notification_dto::{
        NotificationListQuery, NotificationListResponse, PushSubscriptionRequest,
        PushUnsubscribeRequest, UpdateSettingsRequest,
    },
    notification_models::{Notification, NotificationSettings, PushSubscription},
};
use crate::{error::Result, middleware::AuthUser, state::AppState};

/// Get the caller's notification settings
#[utoipa::path(
    get,
    path = "/api/notifications/settings",
    tag = "notifications",
    responses(
        (status = 200, description = "Notification settings", body = NotificationSettings),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_settings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse> {
    let settings = state.notification_service.get_settings(user_id).await?;
    Ok(Json(settings))
}

/// Replace the caller's notification settings
#[utoipa::path(
    put,
    path = "/api/notifications/settings",
    tag = "notifications",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings updated", body = NotificationSettings),
        (status = 400, description = "Invalid quiet hours"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_settings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateSettingsRequest>,
) -> Result<impl IntoResponse> {
    let settings = state
        .notification_service
        .update_settings(user_id, &payload)
        .await?;
    Ok(Json(settings))
}

/// Register (or reactivate) a web-push subscription
#[utoipa::path(
    post,
    path = "/api/notifications/push-subscriptions",
    tag = "notifications",
    request_body = PushSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription registered", body = PushSubscription),
        (status = 400, description = "Invalid subscription"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn subscribe_push(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<PushSubscriptionRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    payload.keys.validate()?;

    let subscription = state
        .notification_service
        .subscribe_push(user_id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// Deactivate a web-push subscription
#[utoipa::path(
    delete,
    path = "/api/notifications/push-subscriptions",
    tag = "notifications",
    request_body = PushUnsubscribeRequest,
    responses(
        (status = 204, description = "Subscription deactivated"),
        (status = 404, description = "Subscription not found"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn unsubscribe_push(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<PushUnsubscribeRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    state
        .notification_service
        .unsubscribe_push(user_id, &payload.endpoint)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List in-app notifications
#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "notifications",
    params(NotificationListQuery),
    responses(
        (status = 200, description = "Paginated notifications", body = NotificationListResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<NotificationListQuery>,
) -> Result<impl IntoResponse> {
    let response = state.notification_service.list(user_id, &query).await?;
    Ok(Json(response))
}

/// Mark an in-app notification as read
#[utoipa::path(
    patch,
    path = "/api/notifications/{id}/read",
    tag = "notifications",
    params(
        ("id" = i64, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Notification marked as read", body = Notification),
        (status = 404, description = "Notification not found"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn mark_notification_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(notification_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let notification = state
        .notification_service
        .mark_read(user_id, notification_id)
        .await?;
    Ok(Json(notification))
}
