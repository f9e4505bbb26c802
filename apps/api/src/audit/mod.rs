//! Interaction Log — append-only record of every AI invocation attempt.
//!
//! One immutable row per attempt, success or error. Rows are the source of
//! truth for audit and billing reconciliation; the application never updates
//! or deletes them. Writes are best-effort from the invoker's point of view:
//! a failed write must never overturn the result already being returned.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Whether a usable model reply was produced and returned to the caller —
/// NOT merely whether the token deduction succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionStatus {
    Success,
    Error,
}

impl InteractionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionStatus::Success => "success",
            InteractionStatus::Error => "error",
        }
    }
}

/// Parameters for recording one invocation attempt.
pub struct NewInteraction<'a> {
    pub user_id: Uuid,
    pub flow_name: &'a str,
    pub status: InteractionStatus,
    /// The last user message of the invocation.
    pub input: &'a str,
    /// The generated reply on success, the error detail on failure.
    pub output: &'a str,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Interaction log write failed: {0}")]
    Write(#[from] sqlx::Error),
}

/// The interaction-log seam. Production wires in [`PgInteractionLog`].
#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Appends one immutable entry.
    async fn record(&self, entry: NewInteraction<'_>) -> Result<(), LogError>;
}

/// Postgres-backed log. Append-only INSERT into `ai_interactions`.
pub struct PgInteractionLog {
    pool: PgPool,
}

impl PgInteractionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InteractionLog for PgInteractionLog {
    async fn record(&self, entry: NewInteraction<'_>) -> Result<(), LogError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO ai_interactions
                (id, user_id, flow_name, status, input, output, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(entry.user_id)
        .bind(entry.flow_name)
        .bind(entry.status.as_str())
        .bind(entry.input)
        .bind(entry.output)
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await?;

        debug!(
            "Recorded {} interaction {id} for user {} (flow: {})",
            entry.status.as_str(),
            entry.user_id,
            entry.flow_name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_strings() {
        assert_eq!(InteractionStatus::Success.as_str(), "success");
        assert_eq!(InteractionStatus::Error.as_str(), "error");
    }
}
