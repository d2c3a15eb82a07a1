//! Shared state store abstraction for the matchmaking engine.
//!
//! All queue, user-data, and hold mutation funnels through this trait so the
//! engine can run against Redis in production and an in-memory backend in
//! tests. The capability set is deliberately narrow: ordered sequences,
//! a keyed user-data map, a hold set with TTL, fan-out topics, and an
//! all-or-nothing batch.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Key layout shared by every backend.
///
/// Restart recovery depends on these exact names, so they live in one place.
pub mod keys {
    /// Hash of `user_id -> serialized waiter entry`.
    pub const USERS_DATA: &str = "users:data";

    /// FIFO queue of user IDs waiting to practice `language`.
    pub fn queue(language: &str) -> String {
        format!("queue:{language}")
    }

    /// Set of user IDs currently held for `language`.
    pub fn hold_set(language: &str) -> String {
        format!("hold:{language}")
    }

    /// Hash carrying the held user's serialized entry under field `data`.
    pub fn hold_data(user_id: &str) -> String {
        format!("hold:data:{user_id}")
    }

    /// Fan-out topic that wakes the matcher worker for `language`.
    pub fn topic(language: &str) -> String {
        format!("matchmaking:{language}")
    }
}

/// Failure modes of the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    /// Callers treat this as transient and may retry.
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// A subscription stream could not be established.
    #[error("subscribe to topic '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

/// One mutation inside an atomic batch.
///
/// A batch executes so that no external observer sees an intermediate state
/// and no op is skipped on partial success.
#[derive(Debug, Clone)]
pub enum StateOp {
    /// Append `id` to the tail of `queue`.
    Append { queue: String, id: String },
    /// Push `id` onto the head of `queue`.
    PushHead { queue: String, id: String },
    /// Remove every occurrence of `id` from `queue`.
    RemoveValue { queue: String, id: String },
    /// Write the serialized waiter entry for `id`.
    PutUserData { id: String, entry: String },
    /// Delete the waiter entry for `id`.
    DeleteUserData { id: String },
    /// Add `id` to the hold set for `language` and store its entry, both
    /// guarded by `ttl`.
    AddHold {
        language: String,
        id: String,
        entry: String,
        ttl: Duration,
    },
    /// Remove `id` from the hold set for `language` and drop its hold data.
    RemoveHold { language: String, id: String },
    /// Publish `payload` onto `topic`.
    Publish { topic: String, payload: String },
}

/// Capability set required by the matchmaking engine.
///
/// Single-key operations are linearizable; [`StateStore::atomically`] groups
/// several of them into an all-or-nothing batch. TTL is a property of hold
/// entries only, never of queue entries.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn append(&self, queue: &str, id: &str) -> Result<(), StoreError>;

    async fn push_head(&self, queue: &str, id: &str) -> Result<(), StoreError>;

    async fn pop_head(&self, queue: &str) -> Result<Option<String>, StoreError>;

    async fn head(&self, queue: &str) -> Result<Option<String>, StoreError>;

    /// Remove every occurrence of `id`; returns how many were removed.
    async fn remove_value(&self, queue: &str, id: &str) -> Result<u64, StoreError>;

    async fn put_user_data(&self, id: &str, entry: &str) -> Result<(), StoreError>;

    async fn user_data(&self, id: &str) -> Result<Option<String>, StoreError>;

    async fn delete_user_data(&self, id: &str) -> Result<(), StoreError>;

    async fn user_data_exists(&self, id: &str) -> Result<bool, StoreError>;

    /// Read the serialized entry stored when `user_id` was put on hold.
    async fn hold_data(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    async fn remove_hold(&self, language: &str, user_id: &str) -> Result<(), StoreError>;

    /// Put `user_id` on hold for `language`. Equivalent to an atomic batch of
    /// one [`StateOp::AddHold`].
    async fn add_hold(
        &self,
        language: &str,
        user_id: &str,
        entry: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.atomically(vec![StateOp::AddHold {
            language: language.to_string(),
            id: user_id.to_string(),
            entry: entry.to_string(),
            ttl,
        }])
        .await
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribe to `topic`. Messages published after this call are delivered
    /// in publish order until the receiver is dropped.
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, StoreError>;

    /// Execute `ops` as an all-or-nothing group.
    async fn atomically(&self, ops: Vec<StateOp>) -> Result<(), StoreError>;

    /// Reachability probe used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::queue("English"), "queue:English");
        assert_eq!(keys::hold_set("English"), "hold:English");
        assert_eq!(keys::hold_data("u1"), "hold:data:u1");
        assert_eq!(keys::topic("Spanish"), "matchmaking:Spanish");
        assert_eq!(keys::USERS_DATA, "users:data");
    }
}
