//! Main entry point for the matchmaking server.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tandem_server::domains::languages::{LanguageCatalog, PgLanguageCatalog};
use tandem_server::domains::matchmaking::{AdmissionService, MatcherWorker};
use tandem_server::domains::sessions::{PgSessionStore, SessionStore};
use tandem_server::kernel::push_fabric::PushFabric;
use tandem_server::kernel::redis_store::RedisStore;
use tandem_server::kernel::service_host::ServiceHost;
use tandem_server::kernel::state_store::StateStore;
use tandem_server::server::{build_app, AppState};
use tandem_server::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tandem_server=debug,sqlx=warn,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting language exchange matchmaking server");

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url())
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    tracing::info!("Connecting to state store...");
    let store: Arc<dyn StateStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .context("Failed to connect to Redis")?,
    );

    let catalog: Arc<dyn LanguageCatalog> = Arc::new(PgLanguageCatalog::new(pool.clone()));
    let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool.clone()));
    let push = PushFabric::new();

    let languages = catalog
        .all()
        .await
        .context("Failed to load language catalog")?;
    let language_names: Vec<String> = languages.iter().map(|l| l.name.clone()).collect();

    // One matcher worker per supported language; subscriptions are
    // established before any admission can publish.
    let mut host = ServiceHost::new();
    for name in &language_names {
        let worker = MatcherWorker::new(
            name.clone(),
            store.clone(),
            sessions.clone(),
            push.clone(),
            language_names.clone(),
        )
        .await
        .with_context(|| format!("Failed to subscribe matcher for {name}"))?;
        host.spawn(worker);
    }
    tracing::info!(languages = language_names.len(), "matcher fleet started");

    let admission = Arc::new(AdmissionService::new(store.clone(), catalog.clone()));
    let app = build_app(AppState {
        db_pool: pool,
        store,
        admission,
        catalog,
        push,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    host.shutdown().await;
    Ok(())
}
