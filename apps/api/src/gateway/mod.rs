/// Model Gateway — the single point of entry for all Gemini API calls.
///
/// ARCHITECTURAL RULE: No other module may call the provider directly.
/// All generative-AI interactions MUST go through this module.
///
/// The gateway performs exactly one provider call per `generate()`; retry
/// policy, if any, belongs to the caller.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default sampling temperature when the client does not supply one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default output cap for the conversational endpoint.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;
/// Output cap for the legacy single-prompt endpoint.
pub const LEGACY_MAX_OUTPUT_TOKENS: u32 = 1024;

/// Shown as the model reply when the provider answers 200 with no usable
/// candidate. A degraded success: the user never sees a dead end.
pub const FALLBACK_REPLY: &str =
    "Es konnte leider keine Antwort generiert werden. Bitte versuche es erneut.";

// ────────────────────────────────────────────────────────────────────────────
// Conversation types
// ────────────────────────────────────────────────────────────────────────────

/// Who authored a conversation message. Serialized lowercase on the wire
/// ("user" / "model"), matching the provider's role vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A single conversation turn. Ordered oldest-first within a conversation;
/// the full sequence is replayed verbatim to the provider on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Generation parameters forwarded to the provider.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

/// A usable provider reply.
#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub finish_reason: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed provider response: {0}")]
    Parse(#[from] serde_json::Error),
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway trait
// ────────────────────────────────────────────────────────────────────────────

/// The model gateway seam. The invoker and handlers only ever see this trait;
/// tests substitute a scripted fake, production wires in `GeminiClient`.
///
/// Preconditions: `conversation` is non-empty and ends with a user-role
/// message. The HTTP layer validates this before the invoker runs.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate(
        &self,
        conversation: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Generated, GatewayError>;

    /// Model label recorded in interaction-log metadata.
    fn model(&self) -> &str;
}

// ────────────────────────────────────────────────────────────────────────────
// Gemini wire shapes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Gemini client
// ────────────────────────────────────────────────────────────────────────────

/// Production gateway backed by the Gemini `generateContent` endpoint.
///
/// Both the API key and the endpoint URL come from configuration; nothing is
/// defaulted in code.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    api_url: String,
    model_label: String,
}

impl GeminiClient {
    pub fn new(api_key: String, api_url: String, timeout: Duration) -> Self {
        let model_label = model_label_from_url(&api_url);
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            api_url,
            model_label,
        }
    }
}

#[async_trait]
impl ModelGateway for GeminiClient {
    async fn generate(
        &self,
        conversation: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Generated, GatewayError> {
        let request_body = GeminiRequest {
            contents: conversation
                .iter()
                .map(|m| GeminiContent {
                    role: m.role.as_str(),
                    parts: vec![GeminiPart { text: &m.content }],
                })
                .collect(),
            generation_config: GeminiGenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Try to parse the provider's error message; fall back to raw body
            let message = serde_json::from_str::<GeminiErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GeminiResponse = serde_json::from_str(&body)?;
        Ok(extract_reply(parsed))
    }

    fn model(&self) -> &str {
        &self.model_label
    }
}

/// Pulls the first candidate's text out of a 200 response.
///
/// Zero candidates (or a candidate with no text) is treated as a degraded
/// success carrying `FALLBACK_REPLY`, not as an error.
fn extract_reply(response: GeminiResponse) -> Generated {
    let Some(candidate) = response.candidates.into_iter().next() else {
        warn!("Provider returned no candidates; substituting fallback reply");
        return Generated {
            text: FALLBACK_REPLY.to_string(),
            finish_reason: "STOP".to_string(),
        };
    };

    let text: String = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        warn!("Provider candidate carried no text; substituting fallback reply");
        return Generated {
            text: FALLBACK_REPLY.to_string(),
            finish_reason: "STOP".to_string(),
        };
    }

    debug!("Provider reply extracted ({} chars)", text.len());
    Generated {
        text,
        finish_reason: candidate.finish_reason.unwrap_or_else(|| "STOP".to_string()),
    }
}

/// Extracts the model segment from a `…/models/<model>:generateContent` URL
/// for log metadata. Falls back to "gemini" for unrecognized shapes.
fn model_label_from_url(url: &str) -> String {
    url.rsplit_once("models/")
        .and_then(|(_, tail)| tail.split(':').next())
        .filter(|label| !label.is_empty() && !label.contains('/'))
        .map(str::to_string)
        .unwrap_or_else(|| "gemini".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server_uri: &str) -> GeminiClient {
        GeminiClient::new(
            "test-api-key".to_string(),
            format!("{server_uri}/v1beta/models/gemini-2.0-flash:generateContent"),
            Duration::from_secs(5),
        )
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("Wie optimiere ich meinen Lebenslauf?"),
            ChatMessage::model("Hier sind drei Tipps..."),
            ChatMessage::user("Und mein Anschreiben?"),
        ]
    }

    #[test]
    fn test_model_label_extracted_from_url() {
        let label = model_label_from_url(
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent",
        );
        assert_eq!(label, "gemini-2.0-flash");
    }

    #[test]
    fn test_model_label_falls_back_for_odd_urls() {
        assert_eq!(model_label_from_url("https://example.com/generate"), "gemini");
    }

    #[tokio::test]
    async fn test_generate_extracts_first_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Hier sind drei Tipps..." }] },
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let reply = test_client(&server.uri())
            .generate(&conversation(), &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(reply.text, "Hier sind drei Tipps...");
        assert_eq!(reply.finish_reason, "STOP");
    }

    #[tokio::test]
    async fn test_generate_replays_conversation_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "ok" }] },
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        test_client(&server.uri())
            .generate(&conversation(), &GenerationParams::default())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(
            contents[0]["parts"][0]["text"],
            "Wie optimiere ich meinen Lebenslauf?"
        );
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "Und mein Anschreiben?");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[tokio::test]
    async fn test_generate_zero_candidates_yields_fallback_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let reply = test_client(&server.uri())
            .generate(&conversation(), &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(reply.text, FALLBACK_REPLY);
        assert_eq!(reply.finish_reason, "STOP");
    }

    #[tokio::test]
    async fn test_generate_empty_parts_yields_fallback_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [] }, "finishReason": "MAX_TOKENS" }]
            })))
            .mount(&server)
            .await;

        let reply = test_client(&server.uri())
            .generate(&conversation(), &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(reply.text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_generate_surfaces_provider_error_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": { "message": "The model is overloaded." }
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .generate(&conversation(), &GenerationParams::default())
            .await
            .unwrap_err();

        match err {
            GatewayError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "The model is overloaded.");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_malformed_body_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .generate(&conversation(), &GenerationParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Parse(_)));
    }
}
