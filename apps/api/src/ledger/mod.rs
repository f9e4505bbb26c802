//! Token Ledger — the per-user consumable AI-usage balance.
//!
//! The balance is the only mutable shared state in the chat core. It is
//! mutated exclusively through the guarded single-statement UPDATEs below;
//! no component anywhere reads-then-writes the balance.

pub mod policy;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Infrastructure failure while talking to the ledger store.
///
/// Deliberately distinct from the `false` ("insufficient balance") outcome of
/// [`TokenLedger::deduct`] — callers must never conflate the two.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Token ledger unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// The ledger seam. Production wires in [`PgTokenLedger`]; tests substitute
/// an in-memory fake with call counters.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Atomically deducts `amount` tokens if the balance covers it.
    ///
    /// Returns `true` on success (balance durably reduced), `false` if the
    /// balance is insufficient (balance untouched). `amount` must be > 0.
    /// Two concurrent deductions must never both succeed when only one is
    /// covered.
    async fn deduct(&self, user_id: Uuid, amount: u32, flow_name: &str)
        -> Result<bool, LedgerError>;

    /// Returns `amount` tokens to the user (refunds, billing top-ups).
    async fn credit(&self, user_id: Uuid, amount: u32, flow_name: &str)
        -> Result<(), LedgerError>;

    /// Current balance, for UI read-back.
    async fn balance(&self, user_id: Uuid) -> Result<i64, LedgerError>;
}

/// Postgres-backed ledger.
///
/// The check-and-decrement is a single guarded UPDATE — the row lock makes it
/// atomic with respect to concurrent deductions, so there is no window for a
/// double-spend between the check and the write.
pub struct PgTokenLedger {
    pool: PgPool,
}

impl PgTokenLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenLedger for PgTokenLedger {
    async fn deduct(
        &self,
        user_id: Uuid,
        amount: u32,
        flow_name: &str,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET token_balance = token_balance - $2
            WHERE id = $1 AND token_balance >= $2
            "#,
        )
        .bind(user_id)
        .bind(amount as i64)
        .execute(&self.pool)
        .await?;

        let deducted = result.rows_affected() == 1;
        debug!(
            "Deduct {amount} token(s) for user {user_id} (flow: {flow_name}): {}",
            if deducted { "ok" } else { "insufficient" }
        );
        Ok(deducted)
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: u32,
        flow_name: &str,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET token_balance = token_balance + $2
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("Credit of {amount} token(s) targeted unknown user {user_id} (flow: {flow_name})");
        } else {
            debug!("Credited {amount} token(s) to user {user_id} (flow: {flow_name})");
        }
        Ok(())
    }

    async fn balance(&self, user_id: Uuid) -> Result<i64, LedgerError> {
        let balance: i64 =
            sqlx::query_scalar("SELECT token_balance FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(balance)
    }
}
