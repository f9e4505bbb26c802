use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// The wire shape is `{ "error": <human-readable>, "details": <technical, optional> }`.
/// Raw provider/store errors only ever appear in `details`, never in `error`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Insufficient tokens")]
    InsufficientTokens,

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Identity store unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, details) = match &self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid request: {msg}"),
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
                None,
            ),
            AppError::InsufficientTokens => (
                StatusCode::FORBIDDEN,
                "Insufficient tokens. Please upgrade your plan or purchase more tokens."
                    .to_string(),
                None,
            ),
            AppError::LedgerUnavailable(detail) => {
                tracing::error!("Token ledger unavailable: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The service is temporarily unavailable. Please try again.".to_string(),
                    Some(detail.clone()),
                )
            }
            AppError::IdentityUnavailable(detail) => {
                tracing::error!("Identity store unavailable: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The service is temporarily unavailable. Please try again.".to_string(),
                    Some(detail.clone()),
                )
            }
            AppError::GenerationFailed(detail) => {
                tracing::error!("Generation failed: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    // User-facing chat copy is German, like the rest of the product.
                    "Die KI-Antwort konnte nicht erstellt werden. Bitte versuche es später erneut."
                        .to_string(),
                    Some(detail.clone()),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                    None,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                    None,
                )
            }
        };

        let body = match details {
            Some(details) => Json(json!({ "error": message, "details": details })),
            None => Json(json!({ "error": message })),
        };

        (status, body).into_response()
    }
}
