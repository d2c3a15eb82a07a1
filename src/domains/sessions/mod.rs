//! Persistent session records.
//!
//! A session row is the durable evidence of a match; creating it is the
//! commit point of the matchmaking engine. The store trait carries the
//! narrow contract the engine needs plus the lookups a reconnecting client
//! uses to reconcile missed notifications.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Users matched, not yet connected.
    Matched,
    /// WebRTC negotiation in progress.
    Connecting,
    /// Audio call in progress.
    Active,
    /// Call ended normally.
    Completed,
    /// Connection failed.
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Matched => "matched",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "matched" => Ok(SessionStatus::Matched),
            "connecting" => Ok(SessionStatus::Connecting),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => bail!("unknown session status '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub practice_user_id: String,
    pub native_user_id: String,
    pub language: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i32>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session in `matched` state. This is the commit point.
    async fn create(
        &self,
        practice_user_id: &str,
        native_user_id: &str,
        language: &str,
    ) -> Result<Session>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>>;

    /// Latest session the user participates in, on either side.
    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<Session>>;

    async fn update_status(&self, id: Uuid, status: SessionStatus) -> Result<()>;
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    practice_user_id: String,
    native_user_id: String,
    language: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i32>,
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        let status = row
            .status
            .parse()
            .with_context(|| format!("session {} has invalid status", row.id))?;
        Ok(Session {
            id: row.id,
            practice_user_id: row.practice_user_id,
            native_user_id: row.native_user_id,
            language: row.language,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
        })
    }
}

const SESSION_COLUMNS: &str = "id, practice_user_id, native_user_id, language, status, \
     created_at, updated_at, ended_at, duration_seconds";

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        practice_user_id: &str,
        native_user_id: &str,
        language: &str,
    ) -> Result<Session> {
        let (id, created_at, updated_at): (Uuid, DateTime<Utc>, DateTime<Utc>) =
            sqlx::query_as(
                r#"
                INSERT INTO sessions (practice_user_id, native_user_id, language)
                VALUES ($1, $2, $3)
                RETURNING id, created_at, updated_at
                "#,
            )
            .bind(practice_user_id)
            .bind(native_user_id)
            .bind(language)
            .fetch_one(&self.pool)
            .await
            .context("failed to insert session")?;

        Ok(Session {
            id,
            practice_user_id: practice_user_id.to_string(),
            native_user_id: native_user_id.to_string(),
            language: language.to_string(),
            status: SessionStatus::Matched,
            created_at,
            updated_at,
            ended_at: None,
            duration_seconds: None,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE practice_user_id = $1 OR native_user_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn update_status(&self, id: Uuid, status: SessionStatus) -> Result<()> {
        sqlx::query("UPDATE sessions SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Recording session store for tests.
///
/// Tracks every created session and can be told to fail the next N create
/// calls to exercise the engine's abort path.
#[derive(Default)]
pub struct TestSessionStore {
    created: Mutex<Vec<Session>>,
    fail_remaining: AtomicUsize,
}

impl TestSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` create calls fail with a transient-looking error.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Session> {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn created_count(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl SessionStore for TestSessionStore {
    async fn create(
        &self,
        practice_user_id: &str,
        native_user_id: &str,
        language: &str,
    ) -> Result<Session> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("session store unavailable");
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            practice_user_id: practice_user_id.to_string(),
            native_user_id: native_user_id.to_string(),
            language: language.to_string(),
            status: SessionStatus::Matched,
            created_at: now,
            updated_at: now,
            ended_at: None,
            duration_seconds: None,
        };
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(session.clone());
        Ok(session)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self
            .created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn get_by_user_id(&self, user_id: &str) -> Result<Option<Session>> {
        Ok(self
            .created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|s| s.practice_user_id == user_id || s.native_user_id == user_id)
            .cloned())
    }

    async fn update_status(&self, id: Uuid, status: SessionStatus) -> Result<()> {
        let mut created = self.created.lock().unwrap_or_else(|e| e.into_inner());
        match created.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.status = status;
                session.updated_at = Utc::now();
                Ok(())
            }
            None => bail!("session {id} not found"),
        }
    }
}
