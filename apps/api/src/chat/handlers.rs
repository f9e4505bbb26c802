//! Axum route handlers for the token-gated AI endpoints.
//!
//! The handlers only translate between the wire contract and the invoker:
//! request validation up front, the candidates envelope on the way out.

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};

use crate::auth::{bearer_token, AuthUser};
use crate::chat::invoker::{ChatReply, InvokeError};
use crate::errors::AppError;
use crate::gateway::{
    ChatMessage, GenerationParams, Role, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE,
    LEGACY_MAX_OUTPUT_TOKENS,
};
use crate::models::interaction::InteractionRow;
use crate::state::AppState;

/// Flow tags recorded in the interaction log, one per feature entry point.
pub const FLOW_CAREER_COACH: &str = "career-coach-chat";
pub const FLOW_QUICK_PROMPT: &str = "quick-prompt";

impl From<InvokeError> for AppError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::EmptyMessage => {
                AppError::Validation("message must not be empty".to_string())
            }
            InvokeError::AuthenticationRequired => AppError::Unauthorized,
            InvokeError::InsufficientTokens => AppError::InsufficientTokens,
            InvokeError::IdentityUnavailable(detail) => AppError::IdentityUnavailable(detail),
            InvokeError::LedgerUnavailable(detail) => AppError::LedgerUnavailable(detail),
            InvokeError::GenerationFailed(detail) => AppError::GenerationFailed(detail),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Full conversation, oldest first; the last entry is the new message.
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: Option<u32>,
}

/// Provider-shaped reply envelope, mirrored back to the web client.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Serialize)]
pub struct Candidate {
    pub content: CandidateContent,
    #[serde(rename = "finishReason")]
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct CandidateContent {
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Serialize)]
pub struct CandidatePart {
    pub text: String,
}

impl GenerateResponse {
    fn from_reply(reply: ChatReply) -> Self {
        Self {
            candidates: vec![Candidate {
                content: CandidateContent {
                    parts: vec![CandidatePart {
                        text: reply.message.content,
                    }],
                },
                finish_reason: reply.finish_reason,
            }],
        }
    }
}

/// Legacy single-prompt variant.
#[derive(Debug, Deserialize)]
pub struct GenerateTextRequest {
    pub prompt: String,
    pub temperature: Option<f32>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GenerateTextResponse {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub interactions: Vec<InteractionRow>,
}

// ────────────────────────────────────────────────────────────────────────────
// Validation helpers
// ────────────────────────────────────────────────────────────────────────────

/// Splits the wire conversation into prior history and the new user message.
fn split_conversation(messages: &[ChatMessage]) -> Result<(&[ChatMessage], &ChatMessage), AppError> {
    let Some((last, prior)) = messages.split_last() else {
        return Err(AppError::Validation("messages must not be empty".to_string()));
    };
    if last.role != Role::User {
        return Err(AppError::Validation(
            "the final message must have role 'user'".to_string(),
        ));
    }
    Ok((prior, last))
}

/// Applies defaults and bounds-checks the generation parameters.
fn generation_params(
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    default_max_tokens: u32,
) -> Result<GenerationParams, AppError> {
    let temperature = temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(AppError::Validation(
            "temperature must be between 0.0 and 2.0".to_string(),
        ));
    }
    let max_output_tokens = max_tokens.unwrap_or(default_max_tokens);
    if max_output_tokens == 0 {
        return Err(AppError::Validation(
            "maxTokens must be positive".to_string(),
        ));
    }
    Ok(GenerationParams {
        temperature,
        max_output_tokens,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /ai/generate
///
/// Token-gated conversational generation. The full conversation is replayed
/// to the provider; the reply comes back in the candidates envelope.
pub async fn handle_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let (prior, last) = split_conversation(&request.messages)?;
    let params = generation_params(
        request.temperature,
        request.max_tokens,
        DEFAULT_MAX_OUTPUT_TOKENS,
    )?;

    let reply = state
        .invoker
        .invoke(
            bearer_token(&headers),
            prior,
            &last.content,
            params,
            FLOW_CAREER_COACH,
        )
        .await?;

    Ok(Json(GenerateResponse::from_reply(reply)))
}

/// POST /ai/generate-text
///
/// Legacy single-prompt variant: no history, smaller output cap, plain
/// `{ text }` response. Same gating and logging as the chat endpoint.
pub async fn handle_generate_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateTextRequest>,
) -> Result<Json<GenerateTextResponse>, AppError> {
    let params = generation_params(
        request.temperature,
        request.max_tokens,
        LEGACY_MAX_OUTPUT_TOKENS,
    )?;

    let reply = state
        .invoker
        .invoke(
            bearer_token(&headers),
            &[],
            &request.prompt,
            params,
            FLOW_QUICK_PROMPT,
        )
        .await?;

    Ok(Json(GenerateTextResponse {
        text: reply.message.content,
    }))
}

/// GET /ai/balance
///
/// Current token balance for the authenticated user (UI header widget).
pub async fn handle_balance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state
        .ledger
        .balance(user.id)
        .await
        .map_err(|e| AppError::LedgerUnavailable(e.to_string()))?;

    Ok(Json(BalanceResponse { balance }))
}

/// GET /ai/usage
///
/// Most recent interaction-log entries for the authenticated user, for the
/// usage/billing page.
pub async fn handle_usage(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<UsageResponse>, AppError> {
    let interactions = sqlx::query_as::<_, InteractionRow>(
        "SELECT * FROM ai_interactions WHERE user_id = $1 ORDER BY created_at DESC LIMIT 20",
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(UsageResponse { interactions }))
}
