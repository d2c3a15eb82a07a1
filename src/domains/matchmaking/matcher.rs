//! Matcher workers: one cooperative worker per supported language.
//!
//! A worker subscribes to its language topic. Every event announces a waiter
//! whose native language is this worker's language; the worker answers it by
//! holding the oldest waiter practicing that language, committing the pair
//! as a session, notifying both sides, and releasing the hold. Any failure
//! before the commit restores the held waiter; after the commit the match
//! stands no matter what.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domains::matchmaking::entry::WaiterEntry;
use crate::domains::matchmaking::error::MatchmakingError;
use crate::domains::matchmaking::hold::HoldProtocol;
use crate::domains::sessions::{Session, SessionStore};
use crate::kernel::push_fabric::{Envelope, PushFabric, SendOutcome};
use crate::kernel::service_host::Service;
use crate::kernel::state_store::{keys, StateOp, StateStore};

/// Envelope type for a committed match.
pub const MATCH_FOUND: &str = "match_found";

/// Payload delivered to each side of a committed match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFoundPayload {
    pub partner_id: String,
    pub language: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

pub struct MatcherWorker {
    language: String,
    store: Arc<dyn StateStore>,
    holds: HoldProtocol,
    sessions: Arc<dyn SessionStore>,
    push: PushFabric,
    /// All supported languages, for the best-effort purge of the native side.
    languages: Vec<String>,
    events: Option<mpsc::UnboundedReceiver<String>>,
}

impl MatcherWorker {
    /// Create a worker for `language` and subscribe it to the language topic.
    ///
    /// The subscription is established here, before any worker runs, so an
    /// event published right after startup cannot slip past the fleet.
    pub async fn new(
        language: String,
        store: Arc<dyn StateStore>,
        sessions: Arc<dyn SessionStore>,
        push: PushFabric,
        languages: Vec<String>,
    ) -> Result<Self, crate::kernel::state_store::StoreError> {
        let events = store.subscribe(&keys::topic(&language)).await?;
        Ok(Self {
            language,
            holds: HoldProtocol::new(store.clone()),
            store,
            sessions,
            push,
            languages,
            events: Some(events),
        })
    }

    async fn handle_event(&self, payload: &str) {
        let native = match WaiterEntry::from_json(payload) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(language = %self.language, error = %e, "dropping undecodable topic event");
                return;
            }
        };

        tracing::debug!(
            language = %self.language,
            user_id = %native.user_id,
            "new native speaker announced"
        );

        if let Err(e) = self.try_match(&native).await {
            match e {
                MatchmakingError::RaceLost { .. } => {
                    tracing::debug!(language = %self.language, error = %e, "retry on next event");
                }
                other => {
                    tracing::warn!(language = %self.language, error = %other, "match attempt failed");
                }
            }
        }
    }

    async fn try_match(&self, native: &WaiterEntry) -> Result<(), MatchmakingError> {
        let language = &self.language;
        let queue = keys::queue(language);

        // A notifier who cancelled or was matched elsewhere leaves a stale
        // event behind; committing it would resurrect a gone waiter.
        if !self.store.user_data_exists(&native.user_id).await? {
            tracing::debug!(
                language = %language,
                user_id = %native.user_id,
                "notifier no longer waiting, dropping event"
            );
            return Ok(());
        }

        let Some(head) = self.store.head(&queue).await? else {
            tracing::debug!(language = %language, "no practice-side waiter, dropping event");
            return Ok(());
        };

        let Some(practice) = self.holds.put_on_hold(&head, language).await? else {
            return Ok(());
        };

        if practice.user_id == native.user_id {
            tracing::debug!(user_id = %practice.user_id, "refusing self-match, restoring");
            self.holds.restore(&practice.user_id, language).await?;
            return Ok(());
        }

        let session = match self
            .sessions
            .create(&practice.user_id, &native.user_id, language)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    language = %language,
                    practice_user = %practice.user_id,
                    error = %e,
                    "session commit failed, restoring practice waiter"
                );
                self.holds.restore(&practice.user_id, language).await?;
                return Ok(());
            }
        };

        tracing::info!(
            session_id = %session.id,
            language = %language,
            practice_user = %practice.user_id,
            native_user = %native.user_id,
            "match committed"
        );

        self.notify_both(&practice, native, &session).await;

        // The session exists; from here on nothing rolls back.
        if let Err(e) = self.holds.release(&practice.user_id, language).await {
            tracing::warn!(user_id = %practice.user_id, error = %e, "hold release failed, TTL will reclaim");
        }
        self.purge_native(native).await;

        Ok(())
    }

    async fn notify_both(&self, practice: &WaiterEntry, native: &WaiterEntry, session: &Session) {
        let to_practice = MatchFoundPayload {
            partner_id: native.user_id.clone(),
            language: self.language.clone(),
            message: format!(
                "Match found! You'll practice {} with {}",
                self.language, native.user_id
            ),
            session_id: Some(session.id),
        };
        let to_native = MatchFoundPayload {
            partner_id: practice.user_id.clone(),
            language: self.language.clone(),
            message: format!(
                "Match found! You'll help {} practice {}",
                practice.user_id, self.language
            ),
            session_id: Some(session.id),
        };

        for (user_id, payload) in [
            (&practice.user_id, to_practice),
            (&native.user_id, to_native),
        ] {
            let data = match serde_json::to_value(&payload) {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "failed to encode match notification");
                    continue;
                }
            };
            match self.push.send(user_id, Envelope::new(MATCH_FOUND, data)).await {
                SendOutcome::Sent => {
                    tracing::debug!(user_id = %user_id, "match notification delivered");
                }
                SendOutcome::NoReceiver => {
                    tracing::debug!(user_id = %user_id, "no live channel, client reconciles on reconnect");
                }
                SendOutcome::SendFailed => {
                    tracing::warn!(user_id = %user_id, "match notification failed, channel evicted");
                }
            }
        }
    }

    /// Scrub the native side from every queue and the user-data map so they
    /// cannot be matched again. Best-effort: the session is already durable.
    async fn purge_native(&self, native: &WaiterEntry) {
        let mut ops: Vec<StateOp> = self
            .languages
            .iter()
            .map(|lang| StateOp::RemoveValue {
                queue: keys::queue(lang),
                id: native.user_id.clone(),
            })
            .collect();
        ops.push(StateOp::DeleteUserData {
            id: native.user_id.clone(),
        });

        if let Err(e) = self.store.atomically(ops).await {
            tracing::warn!(
                user_id = %native.user_id,
                error = %e,
                "failed to purge native side (match already committed)"
            );
        }
    }
}

#[async_trait]
impl Service for MatcherWorker {
    fn name(&self) -> &'static str {
        "matcher-worker"
    }

    async fn run(mut self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut events = self
            .events
            .take()
            .expect("matcher worker started twice");

        tracing::info!(language = %self.language, "matcher worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => {
                    match event {
                        // The in-flight event drains fully before the next
                        // shutdown check.
                        Some(payload) => self.handle_event(&payload).await,
                        None => {
                            tracing::warn!(language = %self.language, "topic stream closed");
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!(language = %self.language, "matcher worker stopped");
        Ok(())
    }
}
