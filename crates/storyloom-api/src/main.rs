//! Storyloom API server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use storyloom_api::capabilities::Unconfigured;
use storyloom_api::error::AppError;
use storyloom_api::state::AppState;
use storyloom_core::capability::Cache;
use storyloom_core::clock::SystemClock;
use storyloom_orchestration::application::orchestrator::Capabilities;
use storyloom_orchestration::config::OrchestratorConfig;
use storyloom_store::MIGRATOR;
use storyloom_store::pg_store::PgStore;
use storyloom_store::redis_cache::{NoopCache, RedisCache};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Storyloom API server");

    // Read configuration from environment.
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| AppError::Config("DATABASE_URL environment variable must be set".into()))?;
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse()
        .map_err(|e| AppError::Config(format!("PORT must be a valid u16: {e}")))?;
    let max_connections: u32 = std::env::var("DB_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .map_err(|e| AppError::Config(format!("DB_MAX_CONNECTIONS must be a valid u32: {e}")))?;

    // Create database connection pool and bring the schema up to date.
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await?;
    MIGRATOR.run(&pool).await?;

    let cache: Arc<dyn Cache> = match std::env::var("REDIS_URL") {
        Ok(url) => Arc::new(RedisCache::connect(&url).await?),
        Err(_) => {
            tracing::warn!("REDIS_URL not set; context summaries will not be cached");
            Arc::new(NoopCache)
        }
    };

    // Build application state.
    let capabilities = Capabilities {
        generator: Arc::new(Unconfigured),
        scanner: Arc::new(Unconfigured),
        indexer: Arc::new(Unconfigured),
        cache,
    };
    let app_state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(SystemClock),
        capabilities,
        OrchestratorConfig::default(),
    );

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = storyloom_api::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server.
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
