use crate::{
    attachment::{attachment_handlers, attachment_models::AttachmentResponse},
    conversation::{
        conversation_dto::{
            BlockRequest, ConversationView, CreateConversationRequest, LastMessagePreview, TypingRequest,
            UpdateStatusRequest,
        },
        conversation_handlers,
        conversation_models::{ConversationStatus, Side},
    },
    directory::ArticleSummary,
    message::{
        message_dto::{
            EditMessageRequest, MarkMessagesReadRequest, MarkReadResponse, SendMessageRequest, SendOfferRequest,
        },
        message_handlers,
        message_models::{MessageResponse, MessageType},
    },
    middleware::auth_middleware,
    notification::{
        notification_dto::{
            NotificationListResponse, PushKeys, PushSubscriptionRequest, PushUnsubscribeRequest,
            UpdateSettingsRequest,
        },
        notification_handlers,
        notification_models::{ChannelKind, Notification, NotificationFrequency, NotificationSettings, PushSubscription},
    },
    presence::{presence_handlers, presence_models::PresenceStatus},
    reaction::{
        reaction_dto::AddReactionRequest,
        reaction_handlers,
        reaction_models::{DeliveryState, DeliveryStatus, ReactionSummary},
    },
    realtime::{
        events::{
            EventEnvelope, EventKind, MessageUpdateAction, MessageUpdatePayload, NewMessagePayload,
            ReactionUpdatePayload, ReadReceiptPayload, TypingStatusPayload, UserStatusPayload,
        },
        sse_handler, ws_handler,
    },
    state::AppState,
};
use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::conversation::conversation_handlers::list_conversations,
        crate::conversation::conversation_handlers::create_conversation,
        crate::conversation::conversation_handlers::get_conversation,
        crate::conversation::conversation_handlers::mark_conversation_read,
        crate::conversation::conversation_handlers::set_typing,
        crate::conversation::conversation_handlers::block_conversation,
        crate::conversation::conversation_handlers::unblock_conversation,
        crate::conversation::conversation_handlers::update_status,
        crate::message::message_handlers::send_message,
        crate::message::message_handlers::send_offer,
        crate::message::message_handlers::list_messages,
        crate::message::message_handlers::mark_messages_read,
        crate::message::message_handlers::edit_message,
        crate::message::message_handlers::delete_message,
        crate::message::message_handlers::search_messages,
        crate::attachment::attachment_handlers::upload_attachment,
        crate::attachment::attachment_handlers::delete_attachment,
        crate::reaction::reaction_handlers::add_reaction,
        crate::reaction::reaction_handlers::remove_reaction,
        crate::reaction::reaction_handlers::list_reactions,
        crate::reaction::reaction_handlers::delivery_status,
        crate::notification::notification_handlers::get_settings,
        crate::notification::notification_handlers::update_settings,
        crate::notification::notification_handlers::subscribe_push,
        crate::notification::notification_handlers::unsubscribe_push,
        crate::notification::notification_handlers::list_notifications,
        crate::notification::notification_handlers::mark_notification_read,
        crate::presence::presence_handlers::get_presence,
        crate::realtime::ws_handler::ws_handler,
        crate::realtime::sse_handler::event_stream,
    ),
    components(
        schemas(
            CreateConversationRequest,
            TypingRequest,
            BlockRequest,
            UpdateStatusRequest,
            ConversationView,
            LastMessagePreview,
            ConversationStatus,
            Side,
            ArticleSummary,
            SendMessageRequest,
            SendOfferRequest,
            EditMessageRequest,
            MarkMessagesReadRequest,
            MarkReadResponse,
            MessageResponse,
            MessageType,
            AttachmentResponse,
            AddReactionRequest,
            ReactionSummary,
            DeliveryState,
            DeliveryStatus,
            UpdateSettingsRequest,
            PushKeys,
            PushSubscriptionRequest,
            PushUnsubscribeRequest,
            NotificationListResponse,
            NotificationSettings,
            NotificationFrequency,
            ChannelKind,
            Notification,
            PushSubscription,
            PresenceStatus,
            EventEnvelope,
            EventKind,
            NewMessagePayload,
            TypingStatusPayload,
            ReadReceiptPayload,
            MessageUpdateAction,
            MessageUpdatePayload,
            ReactionUpdatePayload,
            UserStatusPayload,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "conversations", description = "Buyer/seller conversations about an article"),
        (name = "messages", description = "Sending, editing and searching messages"),
        (name = "attachments", description = "Image and file uploads"),
        (name = "reactions", description = "Emoji reactions and delivery state"),
        (name = "notifications", description = "Notification settings, push subscriptions and in-app inbox"),
        (name = "presence", description = "Online status"),
        (name = "realtime", description = "WebSocket and Server-Sent Events streams")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let conversation_routes = Router::new()
        .route(
            "/",
            get(conversation_handlers::list_conversations).post(conversation_handlers::create_conversation),
        )
        .route("/:id", get(conversation_handlers::get_conversation))
        .route("/:id/read", post(conversation_handlers::mark_conversation_read))
        .route("/:id/typing", post(conversation_handlers::set_typing))
        .route("/:id/block", post(conversation_handlers::block_conversation))
        .route("/:id/unblock", post(conversation_handlers::unblock_conversation))
        .route("/:id/status", patch(conversation_handlers::update_status))
        .route(
            "/:id/messages",
            get(message_handlers::list_messages).post(message_handlers::send_message),
        )
        .route("/:id/offers", post(message_handlers::send_offer))
        .route(
            "/:id/attachments",
            post(attachment_handlers::upload_attachment)
                .layer(DefaultBodyLimit::max(state.config.upload_body_limit())),
        );

    let message_routes = Router::new()
        .route("/read", post(message_handlers::mark_messages_read))
        .route("/search", get(message_handlers::search_messages))
        .route(
            "/:id",
            patch(message_handlers::edit_message).delete(message_handlers::delete_message),
        )
        .route(
            "/:id/reactions",
            get(reaction_handlers::list_reactions)
                .post(reaction_handlers::add_reaction)
                .delete(reaction_handlers::remove_reaction),
        )
        .route("/:id/delivery", get(reaction_handlers::delivery_status));

    let attachment_routes = Router::new().route(
        "/:id",
        axum::routing::delete(attachment_handlers::delete_attachment),
    );

    let notification_routes = Router::new()
        .route("/", get(notification_handlers::list_notifications))
        .route(
            "/settings",
            get(notification_handlers::get_settings).put(notification_handlers::update_settings),
        )
        .route(
            "/push-subscriptions",
            post(notification_handlers::subscribe_push).delete(notification_handlers::unsubscribe_push),
        )
        .route("/:id/read", patch(notification_handlers::mark_notification_read));

    let presence_routes = Router::new().route("/:user_id", get(presence_handlers::get_presence));

    // Every API route requires a caller identity
    let api_routes = Router::new()
        .nest("/conversations", conversation_routes)
        .nest("/messages", message_routes)
        .nest("/attachments", attachment_routes)
        .nest("/notifications", notification_routes)
        .nest("/presence", presence_routes)
        .route("/ws", get(ws_handler::ws_handler))
        .route("/events", get(sse_handler::event_stream))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Stored files are only served to signed-in users
    let upload_files = Router::new()
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        .merge(upload_files)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
