//! Two-phase hold protocol.
//!
//! A hold moves the head of a language queue out of circulation while a
//! matcher tries to commit it, so the same waiter can never be handed to
//! two matchers. The hold either releases (commit) or restores (abort);
//! the TTL on hold state is a safety net against a crashed matcher, not
//! something correctness depends on.

use std::sync::Arc;
use std::time::Duration;

use crate::domains::matchmaking::entry::WaiterEntry;
use crate::domains::matchmaking::error::MatchmakingError;
use crate::kernel::state_store::{keys, StateOp, StateStore};

/// Upper bound on how long a waiter can sit in hold state.
pub const HOLD_TTL: Duration = Duration::from_secs(30);

pub struct HoldProtocol {
    store: Arc<dyn StateStore>,
}

impl HoldProtocol {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Atomically move `user_id` from the head of the `language` queue into
    /// hold state.
    ///
    /// Returns `Ok(None)` when the queue is empty. Fails with `RaceLost` when
    /// another matcher got there first (the popped id is pushed back), and
    /// with `Inconsistent` when the queue names a user the data map doesn't
    /// know (the id is pushed back and the event should be dropped).
    pub async fn put_on_hold(
        &self,
        user_id: &str,
        language: &str,
    ) -> Result<Option<WaiterEntry>, MatchmakingError> {
        let queue = keys::queue(language);

        let Some(popped) = self.store.pop_head(&queue).await? else {
            return Ok(None);
        };

        if popped != user_id {
            self.requeue_head(&queue, &popped).await;
            return Err(MatchmakingError::RaceLost {
                expected: user_id.to_string(),
                found: popped,
            });
        }

        let entry_json = match self.store.user_data(user_id).await {
            Ok(Some(json)) => json,
            Ok(None) => {
                self.requeue_head(&queue, user_id).await;
                return Err(MatchmakingError::Inconsistent(format!(
                    "queued user '{user_id}' has no user data"
                )));
            }
            Err(e) => {
                self.requeue_head(&queue, user_id).await;
                return Err(e.into());
            }
        };

        let entry = match WaiterEntry::from_json(&entry_json) {
            Ok(entry) => entry,
            Err(e) => {
                self.requeue_head(&queue, user_id).await;
                return Err(MatchmakingError::Inconsistent(format!(
                    "undecodable user data for '{user_id}': {e}"
                )));
            }
        };

        if let Err(e) = self
            .store
            .add_hold(language, user_id, &entry_json, HOLD_TTL)
            .await
        {
            self.requeue_head(&queue, user_id).await;
            return Err(e.into());
        }

        Ok(Some(entry))
    }

    /// Commit path: drop the hold and the waiter's user data. The waiter is
    /// now gone from the store.
    pub async fn release(&self, user_id: &str, language: &str) -> Result<(), MatchmakingError> {
        self.store
            .atomically(vec![
                StateOp::RemoveHold {
                    language: language.to_string(),
                    id: user_id.to_string(),
                },
                StateOp::DeleteUserData {
                    id: user_id.to_string(),
                },
            ])
            .await?;
        Ok(())
    }

    /// Abort path: put the waiter back into circulation.
    ///
    /// Re-enters at the tail; a persistently failing committer would loop at
    /// the head forever otherwise. When the hold already expired there is
    /// nothing to restore — the hold set is scrubbed best-effort and the
    /// waiter's next admission proceeds normally.
    pub async fn restore(&self, user_id: &str, language: &str) -> Result<(), MatchmakingError> {
        if self.store.hold_data(user_id).await?.is_none() {
            if let Err(e) = self.store.remove_hold(language, user_id).await {
                tracing::debug!(user_id = %user_id, error = %e, "hold-set scrub failed");
            }
            return Ok(());
        }

        self.store
            .atomically(vec![
                StateOp::Append {
                    queue: keys::queue(language),
                    id: user_id.to_string(),
                },
                StateOp::RemoveHold {
                    language: language.to_string(),
                    id: user_id.to_string(),
                },
            ])
            .await?;

        tracing::debug!(user_id = %user_id, language = %language, "waiter restored to queue");
        Ok(())
    }

    async fn requeue_head(&self, queue: &str, user_id: &str) {
        if let Err(e) = self.store.push_head(queue, user_id).await {
            tracing::warn!(user_id = %user_id, queue = %queue, error = %e, "failed to requeue popped head");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::memory_store::MemoryStore;

    async fn enqueue(store: &MemoryStore, user_id: &str, native: &str, practice: &str) {
        let entry = WaiterEntry::new(user_id, native, practice);
        store
            .put_user_data(user_id, &entry.to_json().unwrap())
            .await
            .unwrap();
        store
            .append(&keys::queue(practice), user_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_hold_on_empty_queue_is_none() {
        let store = MemoryStore::new();
        let holds = HoldProtocol::new(Arc::new(store));

        assert!(holds.put_on_hold("u1", "English").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hold_moves_head_out_of_queue() {
        let store = MemoryStore::new();
        enqueue(&store, "u1", "Spanish", "English").await;
        let holds = HoldProtocol::new(Arc::new(store.clone()));

        let entry = holds.put_on_hold("u1", "English").await.unwrap().unwrap();
        assert_eq!(entry.user_id, "u1");
        assert!(store.queue_snapshot(&keys::queue("English")).is_empty());
        assert!(store.is_held("English", "u1"));
        // user data survives until release
        assert!(store.user_data_exists("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unexpected_head_is_pushed_back() {
        let store = MemoryStore::new();
        enqueue(&store, "u2", "Spanish", "English").await;
        let holds = HoldProtocol::new(Arc::new(store.clone()));

        let err = holds.put_on_hold("u1", "English").await.unwrap_err();
        assert!(matches!(err, MatchmakingError::RaceLost { .. }));
        assert_eq!(
            store.queue_snapshot(&keys::queue("English")),
            vec!["u2".to_string()]
        );
        assert!(!store.is_held("English", "u2"));
    }

    #[tokio::test]
    async fn test_missing_user_data_requeues_and_reports_inconsistent() {
        let store = MemoryStore::new();
        store
            .append(&keys::queue("English"), "u1")
            .await
            .unwrap();
        let holds = HoldProtocol::new(Arc::new(store.clone()));

        let err = holds.put_on_hold("u1", "English").await.unwrap_err();
        assert!(matches!(err, MatchmakingError::Inconsistent(_)));
        assert_eq!(
            store.queue_snapshot(&keys::queue("English")),
            vec!["u1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_release_removes_hold_and_user_data() {
        let store = MemoryStore::new();
        enqueue(&store, "u1", "Spanish", "English").await;
        let holds = HoldProtocol::new(Arc::new(store.clone()));

        holds.put_on_hold("u1", "English").await.unwrap();
        holds.release("u1", "English").await.unwrap();

        assert!(!store.is_held("English", "u1"));
        assert!(store.hold_data("u1").await.unwrap().is_none());
        assert!(!store.user_data_exists("u1").await.unwrap());
        assert!(store.queue_snapshot(&keys::queue("English")).is_empty());
    }

    #[tokio::test]
    async fn test_restore_reenters_at_tail() {
        let store = MemoryStore::new();
        enqueue(&store, "u1", "Spanish", "English").await;
        let holds = HoldProtocol::new(Arc::new(store.clone()));

        holds.put_on_hold("u1", "English").await.unwrap();
        enqueue(&store, "u3", "Spanish", "English").await;
        holds.restore("u1", "English").await.unwrap();

        assert_eq!(
            store.queue_snapshot(&keys::queue("English")),
            vec!["u3".to_string(), "u1".to_string()]
        );
        assert!(!store.is_held("English", "u1"));
        assert!(store.hold_data("u1").await.unwrap().is_none());
        // still a waiter: user data intact
        assert!(store.user_data_exists("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_after_ttl_expiry_is_a_scrub() {
        let store = MemoryStore::new();
        let holds = HoldProtocol::new(Arc::new(store.clone()));

        // no hold data at all (expired and reclaimed)
        holds.restore("u1", "English").await.unwrap();
        assert!(store.queue_snapshot(&keys::queue("English")).is_empty());
    }
}
