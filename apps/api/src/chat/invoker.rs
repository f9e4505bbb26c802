//! Usage-Gated Invoker — orchestrates one token-gated AI invocation.
//!
//! Flow: identity check → append user message → charge → provider call →
//!       interaction-log write → return reply or typed failure.
//!
//! Failure at any stage short-circuits the remaining stages EXCEPT the log
//! write, which runs for every attempt that consumed (or tried to consume)
//! a resource. Pre-flight rejections — blank input, no session, insufficient
//! balance — bill nothing and log nothing.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{InteractionLog, InteractionStatus, NewInteraction};
use crate::auth::IdentityProvider;
use crate::gateway::{ChatMessage, GenerationParams, ModelGateway};
use crate::ledger::policy::ChargePolicy;
use crate::ledger::TokenLedger;

/// Closed error taxonomy of the invocation protocol. The HTTP layer maps
/// these to wire responses; raw provider/store errors only ride along as
/// detail strings and are never shown as the user-facing message.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Blank input. Rejected before anything else happens.
    #[error("Message must not be empty")]
    EmptyMessage,

    /// No valid session. Not billed, not logged.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Balance too low. Not billed (no-op deduct), not logged.
    #[error("Insufficient token balance")]
    InsufficientTokens,

    /// Session store unreachable. Not billed, not logged (no identity to
    /// attribute a log row to).
    #[error("Identity store unavailable: {0}")]
    IdentityUnavailable(String),

    /// Ledger store unreachable during the charge. Not billed; the attempt
    /// is still logged best-effort as an error.
    #[error("Token ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The provider produced no usable reply. Under the default charge
    /// policy the token is already spent and stays spent.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
}

/// A successful invocation result: the model's reply message.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// The invocation orchestrator. All collaborators are injected — no ambient
/// session state, no globals — so the whole protocol runs against fakes in
/// tests.
pub struct ChatInvoker {
    identity: Arc<dyn IdentityProvider>,
    ledger: Arc<dyn TokenLedger>,
    gateway: Arc<dyn ModelGateway>,
    log: Arc<dyn InteractionLog>,
    policy: Arc<dyn ChargePolicy>,
}

impl ChatInvoker {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        ledger: Arc<dyn TokenLedger>,
        gateway: Arc<dyn ModelGateway>,
        log: Arc<dyn InteractionLog>,
        policy: Arc<dyn ChargePolicy>,
    ) -> Self {
        Self {
            identity,
            ledger,
            gateway,
            log,
            policy,
        }
    }

    /// Runs one invocation: `raw_message` is appended to `prior_conversation`
    /// and the full sequence is sent to the provider.
    pub async fn invoke(
        &self,
        session_token: Option<&str>,
        prior_conversation: &[ChatMessage],
        raw_message: &str,
        params: GenerationParams,
        flow_name: &str,
    ) -> Result<ChatReply, InvokeError> {
        // Pre-flight: blank input is a no-op, nothing below runs.
        let message = raw_message.trim();
        if message.is_empty() {
            return Err(InvokeError::EmptyMessage);
        }

        // Step 1: Resolve identity
        let user = match self.identity.resolve(session_token).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(InvokeError::AuthenticationRequired),
            Err(e) => return Err(InvokeError::IdentityUnavailable(e.to_string())),
        };

        // Step 2: Append the new user message
        let mut conversation = prior_conversation.to_vec();
        conversation.push(ChatMessage::user(message));

        // Step 3: Charge
        match self
            .policy
            .charge(self.ledger.as_ref(), user.id, flow_name)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(InvokeError::InsufficientTokens),
            Err(e) => {
                let detail = e.to_string();
                self.record(user.id, flow_name, InteractionStatus::Error, message, &detail)
                    .await;
                return Err(InvokeError::LedgerUnavailable(detail));
            }
        }

        // Steps 4-6: Generate, log the true outcome, settle, return
        match self.gateway.generate(&conversation, &params).await {
            Ok(reply) => {
                info!(
                    "Generated reply for user {} (flow: {flow_name}, {} chars)",
                    user.id,
                    reply.text.len()
                );
                self.record(
                    user.id,
                    flow_name,
                    InteractionStatus::Success,
                    message,
                    &reply.text,
                )
                .await;
                self.settle(user.id, flow_name, true).await;
                Ok(ChatReply {
                    message: ChatMessage::model(reply.text),
                    finish_reason: reply.finish_reason,
                })
            }
            Err(e) => {
                let detail = e.to_string();
                self.record(user.id, flow_name, InteractionStatus::Error, message, &detail)
                    .await;
                self.settle(user.id, flow_name, false).await;
                Err(InvokeError::GenerationFailed(detail))
            }
        }
    }

    /// Best-effort log write. A failure here must never overturn the result
    /// already decided — it is routed to the audit telemetry target instead.
    async fn record(
        &self,
        user_id: uuid::Uuid,
        flow_name: &str,
        status: InteractionStatus,
        input: &str,
        output: &str,
    ) {
        let entry = NewInteraction {
            user_id,
            flow_name,
            status,
            input,
            output,
            metadata: json!({
                "model": self.gateway.model(),
                "timestamp": Utc::now().to_rfc3339(),
            }),
        };

        if let Err(e) = self.log.record(entry).await {
            warn!(
                target: "audit",
                "Dropped {} interaction entry for user {user_id} (flow: {flow_name}): {e}",
                status.as_str()
            );
        }
    }

    /// Best-effort charge settlement (refund under `ChargeOnSuccess`).
    async fn settle(&self, user_id: uuid::Uuid, flow_name: &str, generated: bool) {
        if let Err(e) = self
            .policy
            .settle(self.ledger.as_ref(), user_id, flow_name, generated)
            .await
        {
            warn!("Charge settlement failed for user {user_id} (flow: {flow_name}): {e}");
        }
    }
}
