//! Crate-internal fakes for exercising the chat invocation protocol without
//! Postgres or the provider. Each fake counts its calls so tests can assert
//! what was — and was not — touched.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::audit::{InteractionLog, InteractionStatus, LogError, NewInteraction};
use crate::auth::{IdentityError, IdentityProvider, SessionUser};
use crate::gateway::{ChatMessage, Generated, GatewayError, GenerationParams, ModelGateway};
use crate::ledger::{LedgerError, TokenLedger};

// ────────────────────────────────────────────────────────────────────────────
// Identity
// ────────────────────────────────────────────────────────────────────────────

/// Resolves any bearer token to a fixed user; no token resolves to no user.
pub struct FakeIdentity {
    user_id: Uuid,
    unavailable: AtomicBool,
}

impl FakeIdentity {
    pub fn with_user(user_id: Uuid) -> Self {
        Self {
            user_id,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn resolve(&self, token: Option<&str>) -> Result<Option<SessionUser>, IdentityError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IdentityError::Unavailable(sqlx::Error::PoolClosed));
        }
        Ok(token.map(|_| SessionUser { id: self.user_id }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ledger
// ────────────────────────────────────────────────────────────────────────────

/// In-memory ledger. The mutex makes check-and-decrement atomic, mirroring
/// the guarded UPDATE of the Postgres implementation.
pub struct FakeLedger {
    balance: Mutex<i64>,
    deduct_calls: AtomicUsize,
    credit_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl FakeLedger {
    pub fn with_balance(balance: i64) -> Self {
        Self {
            balance: Mutex::new(balance),
            deduct_calls: AtomicUsize::new(0),
            credit_calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn balance_now(&self) -> i64 {
        *self.balance.lock().unwrap()
    }

    pub fn deduct_calls(&self) -> usize {
        self.deduct_calls.load(Ordering::SeqCst)
    }

    pub fn credit_calls(&self) -> usize {
        self.credit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenLedger for FakeLedger {
    async fn deduct(
        &self,
        _user_id: Uuid,
        amount: u32,
        _flow_name: &str,
    ) -> Result<bool, LedgerError> {
        self.deduct_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(sqlx::Error::PoolClosed));
        }
        let mut balance = self.balance.lock().unwrap();
        if *balance >= amount as i64 {
            *balance -= amount as i64;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn credit(
        &self,
        _user_id: Uuid,
        amount: u32,
        _flow_name: &str,
    ) -> Result<(), LedgerError> {
        self.credit_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(sqlx::Error::PoolClosed));
        }
        *self.balance.lock().unwrap() += amount as i64;
        Ok(())
    }

    async fn balance(&self, _user_id: Uuid) -> Result<i64, LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(sqlx::Error::PoolClosed));
        }
        Ok(self.balance_now())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway
// ────────────────────────────────────────────────────────────────────────────

pub enum ScriptedOutcome {
    Reply(String),
    Fail(String),
}

/// Scripted gateway: outcomes pop FIFO; an empty script yields a default
/// reply. Records every conversation it was sent, in call order.
pub struct FakeGateway {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    calls: AtomicUsize,
    conversations: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeGateway {
    pub fn with_script(script: Vec<ScriptedOutcome>) -> Self {
        Self {
            script: Mutex::new(VecDeque::from(script)),
            calls: AtomicUsize::new(0),
            conversations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies(replies: Vec<String>) -> Self {
        Self::with_script(replies.into_iter().map(ScriptedOutcome::Reply).collect())
    }

    /// Every call fails with the given provider error message.
    pub fn failing(message: &str) -> Self {
        Self::with_script(
            std::iter::repeat_with(|| ScriptedOutcome::Fail(message.to_string()))
                .take(8)
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn conversations(&self) -> Vec<Vec<ChatMessage>> {
        self.conversations.lock().unwrap().clone()
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::with_script(Vec::new())
    }
}

#[async_trait]
impl ModelGateway for FakeGateway {
    async fn generate(
        &self,
        conversation: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<Generated, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.conversations.lock().unwrap().push(conversation.to_vec());

        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedOutcome::Reply(text)) => Ok(Generated {
                text,
                finish_reason: "STOP".to_string(),
            }),
            Some(ScriptedOutcome::Fail(message)) => Err(GatewayError::Api {
                status: 500,
                message,
            }),
            None => Ok(Generated {
                text: "mock reply".to_string(),
                finish_reason: "STOP".to_string(),
            }),
        }
    }

    fn model(&self) -> &str {
        "gemini-test"
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Interaction log
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedInteraction {
    pub user_id: Uuid,
    pub flow_name: String,
    pub status: InteractionStatus,
    pub input: String,
    pub output: String,
    pub metadata: serde_json::Value,
}

/// Captures entries in memory; optionally fails every write.
pub struct FakeLog {
    entries: Mutex<Vec<RecordedInteraction>>,
    fail: bool,
}

impl FakeLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn entries(&self) -> Vec<RecordedInteraction> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl InteractionLog for FakeLog {
    async fn record(&self, entry: NewInteraction<'_>) -> Result<(), LogError> {
        if self.fail {
            return Err(LogError::Write(sqlx::Error::PoolClosed));
        }
        self.entries.lock().unwrap().push(RecordedInteraction {
            user_id: entry.user_id,
            flow_name: entry.flow_name.to_string(),
            status: entry.status,
            input: entry.input.to_string(),
            output: entry.output.to_string(),
            metadata: entry.metadata,
        });
        Ok(())
    }
}
