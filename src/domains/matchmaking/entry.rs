//! Waiter entry: the fingerprint of one user's intent to be matched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user waiting to be matched.
///
/// Serialized JSON of this struct is both the `users:data` value and the
/// topic payload, so the two are always in the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaiterEntry {
    pub user_id: String,
    pub native_language: String,
    pub practice_language: String,
    pub queued_at: DateTime<Utc>,
}

impl WaiterEntry {
    pub fn new(
        user_id: impl Into<String>,
        native_language: impl Into<String>,
        practice_language: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            native_language: native_language.into(),
            practice_language: practice_language.into(),
            queued_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
