use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

mod auth;
mod db;
pub mod error;
mod handlers;
mod ingest;
mod models;
mod pollers;
pub mod repository;
mod schema;

use auth::{AuthConfig, GoogleOAuthClient};
use db::DbPool;
use ingest::{DiscoveryConfig, SenderDirectory, SyncConfig, SyncEngine, TokenRefresher};
use pollers::{GmailClient, SyncPollerConfig};
use repository::PgStore;
use shared_types::GOOGLE_PROVIDER;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub store: Arc<PgStore>,
    pub auth_config: AuthConfig,
    pub oauth: Arc<GoogleOAuthClient>,
    pub sync: Arc<SyncEngine>,
    pub directory: Arc<SenderDirectory>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| error::ApiError::missing_env("DATABASE_URL"))?;
    let auth_config = AuthConfig::from_env().map_err(error::ApiError::Config)?;
    let sync_config = SyncConfig::from_env();
    let discovery_config = DiscoveryConfig::from_env();

    // Establish database connection pool
    let pool = db::establish_connection_pool(&database_url)?;
    let store = Arc::new(PgStore::new(pool.clone()));

    let gmail = Arc::new(GmailClient::new(sync_config.provider_timeout)?);
    let oauth = Arc::new(GoogleOAuthClient::new(
        &auth_config,
        sync_config.provider_timeout,
    )?);
    let refresher = Arc::new(TokenRefresher::new(
        store.clone(),
        oauth.clone(),
        GOOGLE_PROVIDER,
    ));

    let sync = Arc::new(SyncEngine::new(
        refresher.clone(),
        gmail.clone(),
        store.clone(),
        store.clone(),
        sync_config,
    ));
    let directory = Arc::new(SenderDirectory::new(
        refresher,
        gmail,
        store.clone(),
        discovery_config,
    ));

    // Start newsletter sync background task
    let poll_engine = sync.clone();
    let poll_store = store.clone();
    tokio::spawn(async move {
        pollers::start_sync_task(poll_engine, poll_store, SyncPollerConfig::from_env()).await;
    });

    let state = AppState {
        pool,
        store,
        auth_config,
        oauth,
        sync,
        directory,
    };

    let api = Router::new()
        // Newsletter routes
        .route("/newsletters", get(handlers::list_newsletters))
        .route("/newsletters/sync", post(handlers::sync_newsletters))
        .route("/newsletters/:id/read", post(handlers::mark_newsletter_read))
        // Sender discovery
        .route("/senders", get(handlers::discover_senders))
        // Subscription routes
        .route(
            "/subscriptions",
            get(handlers::list_subscriptions).put(handlers::set_subscription),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        // Auth routes
        .route("/auth/login", get(auth::auth_login))
        .route("/auth/callback", get(auth::auth_callback))
        .route("/auth/me", get(auth::auth_me))
        .route("/auth/logout", post(auth::auth_logout));

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
        .with_state(state);

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build CORS layer based on environment configuration.
///
/// If CORS_ALLOWED_ORIGINS is set, only those origins are allowed.
/// If not set, defaults to permissive CORS (for development only).
fn build_cors_layer() -> CorsLayer {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();

    match allowed_origins {
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                tracing::warn!(
                    "CORS_ALLOWED_ORIGINS is set but empty, using permissive CORS (not recommended for production)"
                );
                CorsLayer::permissive()
            } else {
                tracing::info!("CORS configured for origins: {:?}", origins);
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                    .allow_credentials(true)
            }
        }
        None => {
            tracing::warn!(
                "CORS_ALLOWED_ORIGINS not set, using permissive CORS (not recommended for production)"
            );
            CorsLayer::permissive()
        }
    }
}
