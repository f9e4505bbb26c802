// Token-gated AI chat.
// Implements: identity check → token charge → provider call → interaction log.
// All provider calls go through gateway — no direct Gemini calls here.

pub mod handlers;
pub mod invoker;

pub use invoker::{ChatInvoker, ChatReply, InvokeError};
