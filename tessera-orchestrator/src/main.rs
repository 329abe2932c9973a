//! Tessera Orchestrator
//!
//! HTTP API for submitting, querying and cancelling prediction jobs and
//! batches. Jobs are persisted in PostgreSQL and handed to workers through
//! the dispatch queue.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_core::service::Orchestrator;
use tessera_store::{PgStateStore, PgTaskQueue, db};

use crate::config::Config;

pub mod api;
pub mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_orchestrator=debug,tessera_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tessera Orchestrator...");

    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Connecting to database...");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    // Run migrations
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let orchestrator = Orchestrator::new(
        Arc::new(PgStateStore::new(pool.clone())),
        Arc::new(PgTaskQueue::new(pool)),
        Arc::new(config.engine.clone()),
    );

    // Build router with all API endpoints
    let app = api::create_router(Arc::new(orchestrator));

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
