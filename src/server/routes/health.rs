use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: String,
    state_store: String,
}

/// Health check endpoint: database and state-store reachability.
pub async fn health_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_status = match sqlx::query("SELECT 1").execute(&state.db_pool).await {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    let store_status = match state.store.ping().await {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    let healthy = db_status == "ok" && store_status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            database: db_status.to_string(),
            state_store: store_status.to_string(),
        }),
    )
}
