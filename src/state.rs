use anyhow::Context;
use std::sync::Arc;

use crate::{
    attachment::{attachment_repository::AttachmentRepository, AttachmentService, AttachmentStorage},
    cache::Cache,
    config::Config,
    conversation::{ConversationRepository, ConversationService},
    db::DbPool,
    directory::{ArticleDirectory, PgArticleDirectory, PgUserDirectory},
    message::{sanitize::Sanitizer, MessageRepository, MessageService},
    notification::{
        channels::{push::PushTransport, EmailChannel, InAppChannel, PushChannel, WebPushGateway},
        notification_repository::NotificationRepository,
        push_subscription_repository::PushSubscriptionRepository,
        settings_repository::SettingsRepository,
        NotificationDispatcher, NotificationService,
    },
    presence::{connection_repository::ConnectionRepository, ConnectionRegistry, PresenceMarkers},
    reaction::{
        delivery_repository::DeliveryRepository, reaction_repository::ReactionRepository, ReactionService,
    },
    realtime::{Broadcaster, EventBus},
};

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub bus: EventBus,
    pub connection_registry: ConnectionRegistry,
    pub conversation_service: ConversationService,
    pub message_service: MessageService,
    pub attachment_service: AttachmentService,
    pub reaction_service: ReactionService,
    pub notification_service: NotificationService,
}

impl AppState {
    /// Wires repositories, channels and services on top of the shared pool,
    /// cache and event bus.
    pub fn build(config: Arc<Config>, db: DbPool, cache: Cache, bus: EventBus) -> anyhow::Result<Self> {
        let broadcaster = Broadcaster::new(bus.clone(), config.typing_ttl());

        // Create repositories
        let conversation_repository = ConversationRepository::new(db.clone());
        let message_repository = MessageRepository::new(db.clone());
        let reaction_repository = ReactionRepository::new(db.clone());
        let delivery_repository = DeliveryRepository::new(db.clone());
        let attachment_repository = AttachmentRepository::new(db.clone());
        let connection_repository = ConnectionRepository::new(db.clone());
        let notification_repository = NotificationRepository::new(db.clone());
        let settings_repository = SettingsRepository::new(db.clone());
        let push_subscription_repository = PushSubscriptionRepository::new(db.clone());

        let articles: Arc<dyn ArticleDirectory> = Arc::new(PgArticleDirectory::new(
            db.clone(),
            cache.clone(),
            config.article_cache_ttl(),
        ));

        // Notification channels
        let mut dispatcher = NotificationDispatcher::new(
            Arc::new(settings_repository.clone()),
            Arc::new(PgUserDirectory::new(db.clone())),
            articles.clone(),
            &config.app_base_url,
        );
        if config.smtp_host.is_empty() {
            tracing::warn!("SMTP_HOST not set, email notifications disabled");
        } else {
            let email = EmailChannel::new(&config.email_settings()).context("invalid SMTP settings")?;
            dispatcher = dispatcher.with_channel(Arc::new(email));
        }
        let push_transport = config
            .push_gateway_url
            .as_ref()
            .map(|url| Arc::new(WebPushGateway::new(url.clone())) as Arc<dyn PushTransport>);
        if push_transport.is_none() {
            tracing::warn!("PUSH_GATEWAY_URL not set, push notifications disabled");
        }
        let dispatcher = dispatcher
            .with_channel(Arc::new(PushChannel::new(
                push_transport,
                Arc::new(push_subscription_repository.clone()),
            )))
            .with_channel(Arc::new(InAppChannel::new(notification_repository.clone())))
            .with_batching(config.notification_batch_size, config.notification_batch_pause());

        // Create services
        let sanitizer = Arc::new(Sanitizer::new().context("failed to compile sanitizer patterns")?);
        let message_service = MessageService::new(
            message_repository.clone(),
            conversation_repository.clone(),
            reaction_repository.clone(),
            attachment_repository.clone(),
            broadcaster.clone(),
            dispatcher,
            sanitizer,
            config.max_message_length,
        );

        let connection_registry = ConnectionRegistry::new(
            connection_repository,
            PresenceMarkers::new(cache, config.presence_ttl()),
            conversation_repository.clone(),
            broadcaster.clone(),
            config.stale_after(),
        );

        let conversation_service = ConversationService::new(
            conversation_repository.clone(),
            message_service.clone(),
            articles,
            connection_registry.clone(),
            broadcaster.clone(),
        );

        let storage = AttachmentStorage::new(
            &config.upload_dir,
            config.max_image_dimension,
            config.thumbnail_dimension,
        );
        let attachment_service = AttachmentService::new(
            storage,
            config.size_limits(),
            attachment_repository,
            conversation_repository.clone(),
            message_service.clone(),
        );

        let reaction_service = ReactionService::new(
            reaction_repository,
            delivery_repository,
            message_repository,
            conversation_repository,
            broadcaster.clone(),
        );

        let notification_service = NotificationService::new(
            settings_repository,
            push_subscription_repository,
            notification_repository,
        );

        Ok(Self {
            db,
            config,
            bus,
            connection_registry,
            conversation_service,
            message_service,
            attachment_service,
            reaction_service,
            notification_service,
        })
    }
}
