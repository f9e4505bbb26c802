//! Session identity — resolves `Authorization: Bearer <token>` to a user.
//!
//! Session tokens are stored SHA-256 hashed in the `sessions` table; the
//! plaintext token never touches the database. The identity seam is a trait
//! so the invoker can be exercised with a fake provider in tests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::state::AppState;

/// A resolved, authenticated user identity.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: Uuid,
}

/// Infrastructure failure while consulting the session store. Not an
/// authentication verdict — must never be presented as a 401.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// The identity seam. `None` means no valid (unexpired) session.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: Option<&str>) -> Result<Option<SessionUser>, IdentityError>;
}

/// Postgres-backed identity provider over the `sessions` table.
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn resolve(&self, token: Option<&str>) -> Result<Option<SessionUser>, IdentityError> {
        let Some(token) = token else {
            return Ok(None);
        };

        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM sessions WHERE token_hash = $1 AND expires_at > now()",
        )
        .bind(hash_session_token(token))
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id.map(|id| SessionUser { id }))
    }
}

/// Extracts the bearer token from the `Authorization` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// SHA-256 of a session token, lowercase hex.
pub fn hash_session_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}

/// Authenticated-request extractor for routes outside the chat invoker
/// (balance and usage read-back). The invoker itself resolves identity
/// through its injected provider instead.
pub struct AuthUser(pub SessionUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers);
        match state.identity.resolve(token).await {
            Ok(Some(user)) => Ok(AuthUser(user)),
            Ok(None) => Err(AppError::Unauthorized),
            Err(e) => Err(AppError::IdentityUnavailable(e.to_string())),
        }
    }
}
