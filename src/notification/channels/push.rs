use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{ChannelOutcome, NotificationChannel};
use crate::{
    error::{AppError, Result},
    notification::notification_models::{ChannelKind, OutboundNotification, PushSubscription},
};

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn active_subscriptions(&self, user_id: i64) -> Result<Vec<PushSubscription>>;

    async fn deactivate_subscription(&self, subscription_id: i64) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAttempt {
    Delivered,
    /// The push service no longer knows this subscription (404/410).
    Gone,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub sound: bool,
    pub data: serde_json::Value,
}

impl PushPayload {
    pub fn from_notification(notification: &OutboundNotification) -> Self {
        Self {
            title: notification.title.clone(),
            body: notification.preview.clone(),
            sound: notification.sound,
            data: notification.data.clone(),
        }
    }
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> PushAttempt;
}

#[derive(Serialize)]
struct GatewayKeys<'a> {
    p256dh: &'a str,
    auth: &'a str,
}

#[derive(Serialize)]
struct GatewaySubscription<'a> {
    endpoint: &'a str,
    keys: GatewayKeys<'a>,
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    subscription: GatewaySubscription<'a>,
    payload: &'a PushPayload,
}

/// Hands encrypted web-push delivery to an HTTP gateway, which relays the
/// push service's status code back.
#[derive(Clone)]
pub struct WebPushGateway {
    client: reqwest::Client,
    url: String,
}

impl WebPushGateway {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    fn classify(status: StatusCode) -> PushAttempt {
        if status.is_success() {
            PushAttempt::Delivered
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            PushAttempt::Gone
        } else {
            PushAttempt::Failed(format!("push gateway returned {}", status))
        }
    }
}

#[async_trait]
impl PushTransport for WebPushGateway {
    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> PushAttempt {
        let request = GatewayRequest {
            subscription: GatewaySubscription {
                endpoint: &subscription.endpoint,
                keys: GatewayKeys {
                    p256dh: &subscription.p256dh_key,
                    auth: &subscription.auth_key,
                },
            },
            payload,
        };

        match self.client.post(&self.url).json(&request).send().await {
            Ok(response) => Self::classify(response.status()),
            Err(e) => PushAttempt::Failed(e.to_string()),
        }
    }
}

/// Fans one notification out to every active subscription of the recipient.
/// A subscription reported gone is deactivated on its own; the others are
/// still attempted.
#[derive(Clone)]
pub struct PushChannel {
    transport: Option<Arc<dyn PushTransport>>,
    store: Arc<dyn SubscriptionStore>,
}

impl PushChannel {
    pub fn new(transport: Option<Arc<dyn PushTransport>>, store: Arc<dyn SubscriptionStore>) -> Self {
        if transport.is_none() {
            warn!("Push gateway not configured; push notifications will operate in no-op mode");
        }
        Self { transport, store }
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn deliver(&self, notification: &OutboundNotification) -> Result<ChannelOutcome> {
        let subscriptions = self.store.active_subscriptions(notification.user_id).await?;
        if subscriptions.is_empty() {
            return Ok(ChannelOutcome::Skipped("no active push subscriptions"));
        }

        let Some(transport) = &self.transport else {
            info!(
                user_id = notification.user_id,
                subscriptions = subscriptions.len(),
                "Push channel running in no-op mode; skipping actual send"
            );
            return Ok(ChannelOutcome::Skipped("push gateway not configured"));
        };

        let payload = PushPayload::from_notification(notification);
        let mut delivered = 0usize;
        let mut failures = Vec::new();

        for subscription in &subscriptions {
            match transport.send(subscription, &payload).await {
                PushAttempt::Delivered => delivered += 1,
                PushAttempt::Gone => {
                    warn!(
                        subscription_id = subscription.id,
                        user_id = subscription.user_id,
                        "push subscription gone; deactivating"
                    );
                    if let Err(e) = self.store.deactivate_subscription(subscription.id).await {
                        error!(subscription_id = subscription.id, "failed to deactivate push subscription: {}", e);
                    }
                }
                PushAttempt::Failed(reason) => {
                    warn!(subscription_id = subscription.id, "push delivery failed: {}", reason);
                    failures.push(reason);
                }
            }
        }

        debug!(
            user_id = notification.user_id,
            delivered,
            failed = failures.len(),
            "push fan-out finished"
        );

        if delivered > 0 {
            Ok(ChannelOutcome::Delivered)
        } else if !failures.is_empty() {
            Err(AppError::Push(failures.join("; ")))
        } else {
            Ok(ChannelOutcome::Skipped("all push subscriptions expired"))
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub fn subscription(id: i64, user_id: i64, endpoint: &str) -> PushSubscription {
        PushSubscription {
            id,
            user_id,
            endpoint: endpoint.to_string(),
            p256dh_key: "p256dh".to_string(),
            auth_key: "auth".to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[derive(Default)]
    pub struct MemorySubscriptions {
        pub rows: Mutex<Vec<PushSubscription>>,
    }

    #[async_trait]
    impl SubscriptionStore for MemorySubscriptions {
        async fn active_subscriptions(&self, user_id: i64) -> Result<Vec<PushSubscription>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.user_id == user_id && s.is_active)
                .cloned()
                .collect())
        }

        async fn deactivate_subscription(&self, subscription_id: i64) -> Result<()> {
            for row in self.rows.lock().unwrap().iter_mut() {
                if row.id == subscription_id {
                    row.is_active = false;
                }
            }
            Ok(())
        }
    }

    /// Answers per endpoint; unknown endpoints succeed.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub answers: HashMap<String, PushAttempt>,
        pub sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn send(&self, subscription: &PushSubscription, _payload: &PushPayload) -> PushAttempt {
            self.sent.lock().unwrap().push(subscription.endpoint.clone());
            self.answers
                .get(&subscription.endpoint)
                .cloned()
                .unwrap_or(PushAttempt::Delivered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::notification::notification_models::NotificationKind;

    fn notification(user_id: i64) -> OutboundNotification {
        OutboundNotification {
            user_id,
            email: None,
            recipient_name: None,
            kind: NotificationKind::NewMessage,
            title: "New message".to_string(),
            preview: "hello".to_string(),
            link: None,
            sound: false,
            data: serde_json::json!({ "conversation_id": 1 }),
        }
    }

    #[tokio::test]
    async fn gone_subscription_is_deactivated_without_affecting_others() {
        let store = Arc::new(MemorySubscriptions::default());
        store.rows.lock().unwrap().extend([
            subscription(1, 20, "https://push.example/a"),
            subscription(2, 20, "https://push.example/gone"),
            subscription(3, 20, "https://push.example/c"),
        ]);
        let mut transport = ScriptedTransport::default();
        transport
            .answers
            .insert("https://push.example/gone".to_string(), PushAttempt::Gone);
        let transport = Arc::new(transport);

        let channel = PushChannel::new(Some(transport.clone() as Arc<dyn PushTransport>), store.clone());
        let outcome = channel.deliver(&notification(20)).await.unwrap();

        assert_eq!(outcome, ChannelOutcome::Delivered);
        assert_eq!(transport.sent.lock().unwrap().len(), 3);

        let rows = store.rows.lock().unwrap();
        assert!(rows[0].is_active);
        assert!(!rows[1].is_active);
        assert!(rows[2].is_active);
    }

    #[tokio::test]
    async fn all_failures_surface_as_channel_error() {
        let store = Arc::new(MemorySubscriptions::default());
        store
            .rows
            .lock()
            .unwrap()
            .push(subscription(1, 20, "https://push.example/down"));
        let mut transport = ScriptedTransport::default();
        transport.answers.insert(
            "https://push.example/down".to_string(),
            PushAttempt::Failed("503".to_string()),
        );

        let transport: Arc<dyn PushTransport> = Arc::new(transport);
        let channel = PushChannel::new(Some(transport), store.clone());
        let result = channel.deliver(&notification(20)).await;

        assert!(matches!(result, Err(AppError::Push(_))));
        assert!(store.rows.lock().unwrap()[0].is_active);
    }

    #[tokio::test]
    async fn no_subscriptions_is_a_skip() {
        let store = Arc::new(MemorySubscriptions::default());
        let transport: Arc<dyn PushTransport> = Arc::new(ScriptedTransport::default());
        let channel = PushChannel::new(Some(transport), store);
        let outcome = channel.deliver(&notification(20)).await.unwrap();
        assert!(matches!(outcome, ChannelOutcome::Skipped(_)));
    }

    #[test]
    fn gateway_status_classification() {
        assert_eq!(WebPushGateway::classify(StatusCode::CREATED), PushAttempt::Delivered);
        assert_eq!(WebPushGateway::classify(StatusCode::GONE), PushAttempt::Gone);
        assert_eq!(WebPushGateway::classify(StatusCode::NOT_FOUND), PushAttempt::Gone);
        assert!(matches!(
            WebPushGateway::classify(StatusCode::BAD_GATEWAY),
            PushAttempt::Failed(_)
        ));
    }
}
