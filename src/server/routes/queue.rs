//! Queue join and leave endpoints.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::server::app::AppState;
use crate::server::routes::{error_response, matchmaking_error_response};

#[derive(Debug, Deserialize)]
pub struct JoinQueueRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub native_language: String,
    #[serde(default)]
    pub practice_language: String,
}

#[derive(Debug, Serialize)]
pub struct JoinQueueResponse {
    pub message: String,
    pub queued_at: DateTime<Utc>,
    pub websocket_url: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaveQueueRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub practice_language: String,
}

#[derive(Debug, Serialize)]
pub struct LeaveQueueResponse {
    pub message: String,
}

/// POST /queue — join the matchmaking queue.
pub async fn join_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JoinQueueRequest>,
) -> Response {
    if req.user_id.is_empty() || req.native_language.is_empty() || req.practice_language.is_empty()
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required fields: user_id, native_language, practice_language",
        );
    }

    match state
        .admission
        .admit(&req.user_id, &req.native_language, &req.practice_language)
        .await
    {
        Ok(entry) => (
            StatusCode::CREATED,
            Json(JoinQueueResponse {
                message: "Successfully joined matchmaking queue. Connect to the WebSocket URL \
                          to receive match notifications."
                    .to_string(),
                queued_at: entry.queued_at,
                websocket_url: websocket_url(&headers, &req.user_id),
            }),
        )
            .into_response(),
        Err(e) => matchmaking_error_response(e, "join queue"),
    }
}

/// DELETE /queue — leave the matchmaking queue.
pub async fn leave_queue(
    State(state): State<AppState>,
    Json(req): Json<LeaveQueueRequest>,
) -> Response {
    if req.user_id.is_empty() || req.practice_language.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required fields: user_id, practice_language",
        );
    }

    match state.catalog.by_name(&req.practice_language).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid practice language");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to validate practice language");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to leave queue",
            );
        }
    }

    match state.admission.cancel(&req.user_id).await {
        Ok(()) => Json(LeaveQueueResponse {
            message: "Successfully removed from matchmaking queue".to_string(),
        })
        .into_response(),
        Err(e) => matchmaking_error_response(e, "leave queue"),
    }
}

/// Derive the push-channel URL from the request host and TLS disposition.
fn websocket_url(headers: &HeaderMap, user_id: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|proto| if proto == "https" { "wss" } else { "ws" })
        .unwrap_or("ws");

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost:8080");

    format!("{scheme}://{host}/ws?user_id={user_id}")
}
