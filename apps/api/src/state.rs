use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::IdentityProvider;
use crate::chat::ChatInvoker;
use crate::ledger::TokenLedger;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Session resolution for routes outside the invoker (balance, usage).
    pub identity: Arc<dyn IdentityProvider>,
    /// Ledger handle for balance read-back.
    pub ledger: Arc<dyn TokenLedger>,
    /// The token-gated invocation orchestrator.
    pub invoker: Arc<ChatInvoker>,
}
