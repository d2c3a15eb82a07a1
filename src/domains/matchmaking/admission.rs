//! Queue admission: joining and leaving the matchmaking queue.
//!
//! Admission is idempotent. A re-admission first purges any prior presence
//! of the user, so at most one waiter entry per user exists in the store at
//! any observable moment, whatever the client retried or switched to.

use std::sync::Arc;

use crate::domains::languages::{Language, LanguageCatalog};
use crate::domains::matchmaking::entry::WaiterEntry;
use crate::domains::matchmaking::error::MatchmakingError;
use crate::kernel::state_store::{keys, StateOp, StateStore};

pub struct AdmissionService {
    store: Arc<dyn StateStore>,
    catalog: Arc<dyn LanguageCatalog>,
}

impl AdmissionService {
    pub fn new(store: Arc<dyn StateStore>, catalog: Arc<dyn LanguageCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Admit `user_id` into the queue for `practice` and announce them on
    /// the `native` topic. Languages are canonicalized through the catalog,
    /// so short names land in the same queue as full names.
    pub async fn admit(
        &self,
        user_id: &str,
        native: &str,
        practice: &str,
    ) -> Result<WaiterEntry, MatchmakingError> {
        if native.eq_ignore_ascii_case(practice) {
            return Err(MatchmakingError::Invalid(
                "native language and practice language cannot be the same".to_string(),
            ));
        }

        let native_lang = self.resolve(native).await?;
        let practice_lang = self.resolve(practice).await?;

        self.purge_prior(user_id).await?;

        let entry = WaiterEntry::new(user_id, native_lang.name, practice_lang.name);
        let payload = entry.to_json().map_err(|e| {
            MatchmakingError::Transient(format!("failed to encode waiter entry: {e}"))
        })?;

        self.store
            .atomically(vec![
                StateOp::PutUserData {
                    id: entry.user_id.clone(),
                    entry: payload.clone(),
                },
                StateOp::Append {
                    queue: keys::queue(&entry.practice_language),
                    id: entry.user_id.clone(),
                },
                StateOp::Publish {
                    topic: keys::topic(&entry.native_language),
                    payload,
                },
            ])
            .await?;

        tracing::info!(
            user_id = %entry.user_id,
            native = %entry.native_language,
            practice = %entry.practice_language,
            "waiter admitted"
        );
        Ok(entry)
    }

    /// Remove `user_id` from the queue. A cancel for an unknown user is a
    /// no-op, not an error.
    pub async fn cancel(&self, user_id: &str) -> Result<(), MatchmakingError> {
        let Some(json) = self.store.user_data(user_id).await? else {
            tracing::debug!(user_id = %user_id, "cancel for absent waiter is a no-op");
            return Ok(());
        };

        let mut ops = vec![StateOp::DeleteUserData {
            id: user_id.to_string(),
        }];
        match WaiterEntry::from_json(&json) {
            Ok(entry) => ops.push(StateOp::RemoveValue {
                queue: keys::queue(&entry.practice_language),
                id: user_id.to_string(),
            }),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "dropping undecodable waiter entry on cancel");
            }
        }
        self.store.atomically(ops).await?;

        tracing::info!(user_id = %user_id, "waiter removed from queue");
        Ok(())
    }

    async fn resolve(&self, name: &str) -> Result<Language, MatchmakingError> {
        self.catalog
            .by_name(name)
            .await
            .map_err(|e| MatchmakingError::Transient(format!("language catalog lookup failed: {e}")))?
            .ok_or_else(|| MatchmakingError::Invalid(format!("unknown language '{name}'")))
    }

    /// Drop any earlier presence of `user_id` from its recorded queue and
    /// the user-data map. Makes admission idempotent.
    async fn purge_prior(&self, user_id: &str) -> Result<(), MatchmakingError> {
        let Some(json) = self.store.user_data(user_id).await? else {
            return Ok(());
        };

        let mut ops = vec![StateOp::DeleteUserData {
            id: user_id.to_string(),
        }];
        match WaiterEntry::from_json(&json) {
            Ok(prior) => {
                tracing::debug!(
                    user_id = %user_id,
                    practice = %prior.practice_language,
                    "purging prior queue presence before re-admission"
                );
                ops.push(StateOp::RemoveValue {
                    queue: keys::queue(&prior.practice_language),
                    id: user_id.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "purging undecodable waiter entry");
            }
        }
        self.store.atomically(ops).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::languages::StaticCatalog;
    use crate::kernel::memory_store::MemoryStore;

    fn service(store: &MemoryStore) -> AdmissionService {
        let catalog = StaticCatalog::new(&[
            ("English", "en"),
            ("Spanish", "es"),
            ("French", "fr"),
        ]);
        AdmissionService::new(Arc::new(store.clone()), Arc::new(catalog))
    }

    #[tokio::test]
    async fn test_same_language_is_rejected_case_insensitively() {
        let store = MemoryStore::new();
        let admission = service(&store);

        let err = admission.admit("u1", "English", "english").await.unwrap_err();
        assert!(matches!(err, MatchmakingError::Invalid(_)));
        assert!(!store.user_data_exists("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_language_is_rejected() {
        let store = MemoryStore::new();
        let admission = service(&store);

        let err = admission.admit("u1", "Klingon", "English").await.unwrap_err();
        assert!(matches!(err, MatchmakingError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_admit_enqueues_and_publishes() {
        let store = MemoryStore::new();
        let admission = service(&store);
        let mut topic = store.subscribe(&keys::topic("Spanish")).await.unwrap();

        let entry = admission.admit("u1", "Spanish", "English").await.unwrap();
        assert_eq!(entry.practice_language, "English");

        assert_eq!(
            store.queue_snapshot(&keys::queue("English")),
            vec!["u1".to_string()]
        );
        let stored = store.user_data("u1").await.unwrap().unwrap();
        assert_eq!(WaiterEntry::from_json(&stored).unwrap(), entry);

        let published = topic.recv().await.unwrap();
        assert_eq!(WaiterEntry::from_json(&published).unwrap(), entry);
    }

    #[tokio::test]
    async fn test_short_names_are_canonicalized() {
        let store = MemoryStore::new();
        let admission = service(&store);

        let entry = admission.admit("u1", "es", "en").await.unwrap();
        assert_eq!(entry.native_language, "Spanish");
        assert_eq!(entry.practice_language, "English");
        assert_eq!(
            store.queue_snapshot(&keys::queue("English")),
            vec!["u1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_readmission_leaves_exactly_one_entry() {
        let store = MemoryStore::new();
        let admission = service(&store);

        admission.admit("u1", "Spanish", "English").await.unwrap();
        admission.admit("u1", "Spanish", "French").await.unwrap();

        assert!(store.queue_snapshot(&keys::queue("English")).is_empty());
        assert_eq!(
            store.queue_snapshot(&keys::queue("French")),
            vec!["u1".to_string()]
        );
        let stored = store.user_data("u1").await.unwrap().unwrap();
        assert_eq!(
            WaiterEntry::from_json(&stored).unwrap().practice_language,
            "French"
        );
    }

    #[tokio::test]
    async fn test_cancel_is_noop_for_absent_waiter() {
        let store = MemoryStore::new();
        let admission = service(&store);

        admission.cancel("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_admit_then_cancel_leaves_no_trace() {
        let store = MemoryStore::new();
        let admission = service(&store);

        admission.admit("u1", "Spanish", "English").await.unwrap();
        admission.cancel("u1").await.unwrap();

        assert!(store.queue_snapshot(&keys::queue("English")).is_empty());
        assert!(!store.user_data_exists("u1").await.unwrap());
    }
}
