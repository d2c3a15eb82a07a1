//! Matchmaking error kinds.
//!
//! Each operation's contract names the conditions under which it fails and
//! how callers react; no hidden unwinding crosses a component boundary.

use thiserror::Error;

use crate::kernel::state_store::StoreError;

#[derive(Debug, Error)]
pub enum MatchmakingError {
    /// Request-level rejection: same-language pair, unknown language,
    /// malformed input. Surfaced to the client as a validation failure.
    #[error("{0}")]
    Invalid(String),

    /// A backing service was unreachable. Admission fails the request;
    /// workers pick the waiter up again on a later event.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Another matcher took the queue head first. The popped entry has been
    /// pushed back; retry on the next event.
    #[error("lost race for queue head: expected '{expected}', found '{found}'")]
    RaceLost { expected: String, found: String },

    /// Queue and user-data disagree. The affected waiter has been requeued
    /// where possible and the event is dropped.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

impl From<StoreError> for MatchmakingError {
    fn from(e: StoreError) -> Self {
        MatchmakingError::Transient(e.to_string())
    }
}
