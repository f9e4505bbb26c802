//! Charge policy — when in an invocation the token is actually spent.
//!
//! The product ships `ChargeBeforeGenerate`: the token is deducted before the
//! provider call and NOT refunded if generation fails, so failed provider
//! calls still consume quota. `ChargeOnSuccess` refunds the token when no
//! usable reply was produced. The invoker is identical under both; swap via
//! the `CHARGE_POLICY` env var.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::ledger::{LedgerError, TokenLedger};

/// Cost of one chat invocation, in tokens.
pub const TOKEN_COST: u32 = 1;

/// Strategy seam for the charge step. Carried in the invoker as
/// `Arc<dyn ChargePolicy>`, selected at startup.
#[async_trait]
pub trait ChargePolicy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Secures payment before the provider call. `Ok(false)` means the
    /// balance does not cover the invocation and nothing was spent.
    async fn charge(
        &self,
        ledger: &dyn TokenLedger,
        user_id: Uuid,
        flow_name: &str,
    ) -> Result<bool, LedgerError>;

    /// Settles after the provider call. `generated` tells whether a usable
    /// reply was produced and returned to the caller.
    async fn settle(
        &self,
        ledger: &dyn TokenLedger,
        user_id: Uuid,
        flow_name: &str,
        generated: bool,
    ) -> Result<(), LedgerError>;
}

/// Default policy: spend the token up front, keep it regardless of outcome.
/// Prevents free retries from draining provider quota.
#[derive(Debug)]
pub struct ChargeBeforeGenerate;

#[async_trait]
impl ChargePolicy for ChargeBeforeGenerate {
    fn name(&self) -> &'static str {
        "charge_before_generate"
    }

    async fn charge(
        &self,
        ledger: &dyn TokenLedger,
        user_id: Uuid,
        flow_name: &str,
    ) -> Result<bool, LedgerError> {
        ledger.deduct(user_id, TOKEN_COST, flow_name).await
    }

    async fn settle(
        &self,
        _ledger: &dyn TokenLedger,
        _user_id: Uuid,
        _flow_name: &str,
        _generated: bool,
    ) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Alternative policy: spend up front (the deduct is still the double-spend
/// guard), refund when generation fails.
#[derive(Debug)]
pub struct ChargeOnSuccess;

#[async_trait]
impl ChargePolicy for ChargeOnSuccess {
    fn name(&self) -> &'static str {
        "charge_on_success"
    }

    async fn charge(
        &self,
        ledger: &dyn TokenLedger,
        user_id: Uuid,
        flow_name: &str,
    ) -> Result<bool, LedgerError> {
        ledger.deduct(user_id, TOKEN_COST, flow_name).await
    }

    async fn settle(
        &self,
        ledger: &dyn TokenLedger,
        user_id: Uuid,
        flow_name: &str,
        generated: bool,
    ) -> Result<(), LedgerError> {
        if !generated {
            ledger.credit(user_id, TOKEN_COST, flow_name).await?;
        }
        Ok(())
    }
}

/// Resolves the configured policy name. Unknown names abort startup.
pub fn charge_policy_from_config(name: &str) -> anyhow::Result<Arc<dyn ChargePolicy>> {
    match name {
        "charge_before_generate" => Ok(Arc::new(ChargeBeforeGenerate)),
        "charge_on_success" => Ok(Arc::new(ChargeOnSuccess)),
        other => anyhow::bail!(
            "Unknown CHARGE_POLICY '{other}' (expected 'charge_before_generate' or 'charge_on_success')"
        ),
    }
}
