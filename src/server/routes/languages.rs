use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::server::app::AppState;
use crate::server::routes::error_response;

#[derive(Serialize)]
pub struct LanguagesResponse {
    languages: Vec<LanguageSummary>,
}

#[derive(Serialize)]
pub struct LanguageSummary {
    name: String,
    short_name: String,
}

/// List the supported languages.
pub async fn list_languages(State(state): State<AppState>) -> Response {
    match state.catalog.all().await {
        Ok(languages) => Json(LanguagesResponse {
            languages: languages
                .into_iter()
                .map(|l| LanguageSummary {
                    name: l.name,
                    short_name: l.short_name,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to load language catalog");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load languages",
            )
        }
    }
}
