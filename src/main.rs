use marketplace_chat::{
    cache::{Cache, RedisCache},
    config::Config,
    db::{create_pool, run_migrations},
    presence::start_sweeper,
    realtime::EventBus,
    routes::create_router,
    state::AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,marketplace_chat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Sanitize URL for logging (hide password)
    let url_for_logging = config
        .database_url
        .split('@')
        .next()
        .map(|part| format!("{}@<hidden>", part))
        .unwrap_or_else(|| "<invalid format>".to_string());

    tracing::info!("Connecting to database at {}...", url_for_logging);
    let db = create_pool(&config.database_url).await?;

    tracing::info!("Running migrations...");
    run_migrations(&db).await?;

    // Redis carries cross-node fan-out and presence markers; without it
    // everything stays in this process.
    let (cache, bus) = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let cache = match RedisCache::connect(&client, "chat").await {
                Ok(redis_cache) => Cache::new(Arc::new(redis_cache)),
                Err(e) => {
                    tracing::warn!("Redis cache unavailable, using in-memory cache: {}", e);
                    Cache::in_memory()
                }
            };
            (cache, EventBus::with_redis(client, BUS_CAPACITY).await)
        }
        None => {
            tracing::warn!("REDIS_URL not set, realtime fan-out is limited to this node");
            (Cache::in_memory(), EventBus::local(BUS_CAPACITY))
        }
    };

    let state = AppState::build(config.clone(), db, cache, bus)?;
    state.attachment_service.storage().ensure_dirs().await?;

    // Keep the scheduler alive for the lifetime of the server
    let _sweeper = start_sweeper(state.connection_registry.clone(), state.bus.clone()).await?;

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
