use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pricewatch_engine::Engine;
use pricewatch_engine::config::EngineConfig;
use pricewatch_engine::sink::JsonReportSink;
use pricewatch_engine::store::{InMemoryJobStore, JobStore};

pub mod api;
pub mod db;
pub mod repository;
pub mod state;

use crate::repository::PgJobStore;
use crate::state::{AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pricewatch_server=info,pricewatch_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pricewatch server...");

    let config = ServerConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping jobs in memory");
            Arc::new(InMemoryJobStore::new())
        }
    };

    let sink = Arc::new(JsonReportSink::new(config.results_dir.clone()));
    let engine = Arc::new(Engine::new(engine_config, Arc::clone(&store), sink)?);
    engine.start();

    let app = api::create_router(AppState::new(
        Arc::clone(&engine),
        store,
        config.max_concurrent_jobs,
    ));

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
