//! In-memory [`StateStore`] backend.
//!
//! Used by the test suite and for single-process development. One mutex
//! guards all state, so a batch applied under the lock is the atomic group.
//! Hold TTLs are enforced lazily: expired entries are pruned at the start of
//! every operation that touches hold state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::state_store::{StateOp, StateStore, StoreError};

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<String>>,
    users: HashMap<String, String>,
    /// language -> user_id -> expiry
    hold_sets: HashMap<String, HashMap<String, Instant>>,
    /// user_id -> (serialized entry, expiry)
    hold_data: HashMap<String, (String, Instant)>,
    topics: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl Inner {
    fn prune_expired(&mut self, now: Instant) {
        for members in self.hold_sets.values_mut() {
            members.retain(|_, expires| *expires > now);
        }
        self.hold_sets.retain(|_, members| !members.is_empty());
        self.hold_data.retain(|_, (_, expires)| *expires > now);
    }

    fn apply(&mut self, op: StateOp, now: Instant) {
        match op {
            StateOp::Append { queue, id } => {
                self.queues.entry(queue).or_default().push_back(id);
            }
            StateOp::PushHead { queue, id } => {
                self.queues.entry(queue).or_default().push_front(id);
            }
            StateOp::RemoveValue { queue, id } => {
                if let Some(q) = self.queues.get_mut(&queue) {
                    q.retain(|v| *v != id);
                }
            }
            StateOp::PutUserData { id, entry } => {
                self.users.insert(id, entry);
            }
            StateOp::DeleteUserData { id } => {
                self.users.remove(&id);
            }
            StateOp::AddHold {
                language,
                id,
                entry,
                ttl,
            } => {
                let expires = now + ttl;
                self.hold_sets
                    .entry(language)
                    .or_default()
                    .insert(id.clone(), expires);
                self.hold_data.insert(id, (entry, expires));
            }
            StateOp::RemoveHold { language, id } => {
                if let Some(members) = self.hold_sets.get_mut(&language) {
                    members.remove(&id);
                }
                self.hold_data.remove(&id);
            }
            StateOp::Publish { topic, payload } => {
                if let Some(subscribers) = self.topics.get_mut(&topic) {
                    subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
                }
            }
        }
    }
}

/// In-memory backend. Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether `user_id` is currently held for `language`. Test hook.
    pub fn is_held(&self, language: &str, user_id: &str) -> bool {
        let mut inner = self.lock();
        inner.prune_expired(Instant::now());
        inner
            .hold_sets
            .get(language)
            .map(|members| members.contains_key(user_id))
            .unwrap_or(false)
    }

    /// Snapshot of a queue's contents. Test hook.
    pub fn queue_snapshot(&self, queue: &str) -> Vec<String> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn append(&self, queue: &str, id: &str) -> Result<(), StoreError> {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(id.to_string());
        Ok(())
    }

    async fn push_head(&self, queue: &str, id: &str) -> Result<(), StoreError> {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_front(id.to_string());
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .queues
            .get_mut(queue)
            .and_then(|q| q.pop_front()))
    }

    async fn head(&self, queue: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .queues
            .get(queue)
            .and_then(|q| q.front().cloned()))
    }

    async fn remove_value(&self, queue: &str, id: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let Some(q) = inner.queues.get_mut(queue) else {
            return Ok(0);
        };
        let before = q.len();
        q.retain(|v| v != id);
        Ok((before - q.len()) as u64)
    }

    async fn put_user_data(&self, id: &str, entry: &str) -> Result<(), StoreError> {
        self.lock().users.insert(id.to_string(), entry.to_string());
        Ok(())
    }

    async fn user_data(&self, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().users.get(id).cloned())
    }

    async fn delete_user_data(&self, id: &str) -> Result<(), StoreError> {
        self.lock().users.remove(id);
        Ok(())
    }

    async fn user_data_exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock().users.contains_key(id))
    }

    async fn hold_data(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock();
        inner.prune_expired(Instant::now());
        Ok(inner.hold_data.get(user_id).map(|(entry, _)| entry.clone()))
    }

    async fn remove_hold(&self, language: &str, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.apply(
            StateOp::RemoveHold {
                language: language.to_string(),
                id: user_id.to_string(),
            },
            Instant::now(),
        );
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.apply(
            StateOp::Publish {
                topic: topic.to_string(),
                payload: payload.to_string(),
            },
            Instant::now(),
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn atomically(&self, ops: Vec<StateOp>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.prune_expired(now);
        for op in ops {
            inner.apply(op, now);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
