//! Application setup and router configuration.

use std::sync::Arc;

use axum::http::{header::CONTENT_TYPE, Method};
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domains::languages::LanguageCatalog;
use crate::domains::matchmaking::AdmissionService;
use crate::kernel::push_fabric::PushFabric;
use crate::kernel::state_store::StateStore;
use crate::server::routes;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub store: Arc<dyn StateStore>,
    pub admission: Arc<AdmissionService>,
    pub catalog: Arc<dyn LanguageCatalog>,
    pub push: PushFabric,
}

/// Build the axum application router.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/languages", get(routes::languages::list_languages))
        .route(
            "/queue",
            post(routes::queue::join_queue).delete(routes::queue::leave_queue),
        )
        .route("/ws", get(routes::ws::ws_handler))
        .route("/health", get(routes::health::health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
