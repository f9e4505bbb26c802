mod audit;
mod auth;
mod chat;
mod config;
mod db;
mod errors;
mod gateway;
mod ledger;
mod models;
mod routes;
mod state;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::audit::PgInteractionLog;
use crate::auth::PgIdentityProvider;
use crate::chat::ChatInvoker;
use crate::config::Config;
use crate::db::create_pool;
use crate::gateway::{GeminiClient, ModelGateway};
use crate::ledger::policy::charge_policy_from_config;
use crate::ledger::PgTokenLedger;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (panics on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Karrio API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize the model gateway
    let gateway = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_api_url.clone(),
        Duration::from_secs(config.gemini_timeout_secs),
    ));
    info!("Model gateway initialized (model: {})", gateway.model());

    // Ledger, interaction log, and identity all share the pool
    let identity = Arc::new(PgIdentityProvider::new(db.clone()));
    let ledger = Arc::new(PgTokenLedger::new(db.clone()));
    let log = Arc::new(PgInteractionLog::new(db.clone()));

    // Charge strategy (default: charge before generate, no refund) —
    // swap via CHARGE_POLICY env
    let policy = charge_policy_from_config(&config.charge_policy)?;
    info!("Charge policy: {}", policy.name());

    let invoker = Arc::new(ChatInvoker::new(
        identity.clone(),
        ledger.clone(),
        gateway,
        log,
        policy,
    ));

    // Build app state
    let state = AppState {
        db,
        identity,
        ledger,
        invoker,
    };

    // CORS: the web client calls cross-origin with Authorization + JSON bodies
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
