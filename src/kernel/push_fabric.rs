//! Push-notification fabric.
//!
//! Tracks at most one live push channel per user. Opening a second channel
//! for the same user closes the first. Sends are non-blocking and serialized
//! per channel through a bounded queue; a failed send evicts the channel and
//! is reported to the caller, never propagated as an error — a committed
//! match stands whether or not the notification got through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Buffered envelopes per channel before a send is considered failed.
const CHANNEL_CAPACITY: usize = 64;

/// Typed message envelope sent over a push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Result of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No live channel is bound for the user.
    NoReceiver,
    /// The channel was dead or saturated; it has been evicted.
    SendFailed,
}

/// Heartbeat cadence applied by the WebSocket transport.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub ping_interval: Duration,
    pub read_deadline: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            read_deadline: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
}

/// Point-in-time view of a channel's counters.
#[derive(Debug, Clone)]
pub struct ChannelMetrics {
    pub connected_at: DateTime<Utc>,
    pub messages_sent: u64,
    pub messages_received: u64,
}

struct ChannelHandle {
    tx: mpsc::Sender<Envelope>,
    closed: CancellationToken,
    generation: u64,
    connected_at: DateTime<Utc>,
    counters: Arc<Counters>,
}

/// The receiving half handed to the transport that serves the user.
pub struct BoundChannel {
    pub user_id: String,
    /// Identifies this binding; a later binding for the same user gets a
    /// higher generation, so a stale transport cannot unbind its successor.
    pub generation: u64,
    pub rx: mpsc::Receiver<Envelope>,
    /// Cancelled when the binding is replaced or evicted.
    pub closed: CancellationToken,
}

/// Registry of live push channels. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PushFabric {
    channels: Arc<RwLock<HashMap<String, ChannelHandle>>>,
    next_generation: Arc<AtomicU64>,
    heartbeat: HeartbeatConfig,
}

impl PushFabric {
    pub fn new() -> Self {
        Self::with_heartbeat(HeartbeatConfig::default())
    }

    pub fn with_heartbeat(heartbeat: HeartbeatConfig) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            heartbeat,
        }
    }

    pub fn heartbeat(&self) -> &HeartbeatConfig {
        &self.heartbeat
    }

    /// Bind a fresh channel for `user_id`, closing any prior one.
    pub async fn bind(&self, user_id: &str) -> BoundChannel {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let closed = CancellationToken::new();
        let handle = ChannelHandle {
            tx,
            closed: closed.clone(),
            generation,
            connected_at: Utc::now(),
            counters: Arc::new(Counters::default()),
        };

        let mut channels = self.channels.write().await;
        if let Some(previous) = channels.insert(user_id.to_string(), handle) {
            tracing::debug!(user_id = %user_id, "replacing existing push channel");
            previous.closed.cancel();
        }

        BoundChannel {
            user_id: user_id.to_string(),
            generation,
            rx,
            closed,
        }
    }

    /// Remove the binding for `user_id` if it still belongs to `generation`.
    pub async fn unbind(&self, user_id: &str, generation: u64) {
        let mut channels = self.channels.write().await;
        if channels
            .get(user_id)
            .map(|h| h.generation == generation)
            .unwrap_or(false)
        {
            if let Some(handle) = channels.remove(user_id) {
                handle.closed.cancel();
            }
        }
    }

    /// Deliver `envelope` to the user's live channel without blocking.
    pub async fn send(&self, user_id: &str, envelope: Envelope) -> SendOutcome {
        let (tx, counters, generation) = {
            let channels = self.channels.read().await;
            match channels.get(user_id) {
                Some(handle) => (
                    handle.tx.clone(),
                    handle.counters.clone(),
                    handle.generation,
                ),
                None => return SendOutcome::NoReceiver,
            }
        };

        match tx.try_send(envelope) {
            Ok(()) => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "push send failed, evicting channel");
                self.unbind(user_id, generation).await;
                SendOutcome::SendFailed
            }
        }
    }

    /// Record an inbound message from the user's transport.
    pub async fn note_received(&self, user_id: &str) {
        if let Some(handle) = self.channels.read().await.get(user_id) {
            handle.counters.received.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn is_bound(&self, user_id: &str) -> bool {
        self.channels.read().await.contains_key(user_id)
    }

    pub async fn connected_users(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    pub async fn metrics(&self, user_id: &str) -> Option<ChannelMetrics> {
        self.channels
            .read()
            .await
            .get(user_id)
            .map(|handle| ChannelMetrics {
                connected_at: handle.connected_at,
                messages_sent: handle.counters.sent.load(Ordering::Relaxed),
                messages_received: handle.counters.received.load(Ordering::Relaxed),
            })
    }
}

impl Default for PushFabric {
    fn default() -> Self {
        Self::new()
    }
}
