//! Chat sync engine and its building blocks.
//!
//! - `engine`: the engine holding conversations, selection and the visible message list.
//! - [`pending`]: optimistic placeholders and reconciliation by correlation token.
//! - [`retry`]: bounded exponential backoff for loads.
//! - [`typing`]: cancellable word-by-word reveal of agent replies.

mod engine;
pub mod pending;
pub mod retry;
pub mod typing;

pub use engine::{ChatSyncEngine, LoadOutcome, SendOutcome, SyncError};
pub use pending::{ChatEntry, CorrelationId};
pub use retry::RetryPolicy;
pub use typing::{TypingAnimator, TypingFrame};
