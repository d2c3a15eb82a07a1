pub mod health;
pub mod languages;
pub mod queue;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domains::matchmaking::MatchmakingError;

/// JSON error body shared by all routes.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Map an engine error onto the HTTP contract: validation failures surface
/// verbatim as 400s, everything else is an opaque 500.
pub(crate) fn matchmaking_error_response(e: MatchmakingError, action: &str) -> Response {
    match e {
        MatchmakingError::Invalid(message) => error_response(StatusCode::BAD_REQUEST, message),
        other => {
            tracing::error!(error = %other, "{action} failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to {action}"))
        }
    }
}
