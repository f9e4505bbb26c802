pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::chat::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Token-gated AI endpoints
        .route("/ai/generate", post(handlers::handle_generate))
        .route("/ai/generate-text", post(handlers::handle_generate_text))
        .route("/ai/balance", get(handlers::handle_balance))
        .route("/ai/usage", get(handlers::handle_usage))
        .with_state(state)
}
