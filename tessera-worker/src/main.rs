//! Tessera Worker
//!
//! A stateless worker that leases dispatch messages, runs each job on the
//! compute executor and records the outcome.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Executor: HTTP client for the remote prediction model
//! - Scheduler: Consumer pool driving the engine's dispatcher
//!
//! Any number of workers may run against the same database; the queue lease
//! and the conditional job claim keep each message to one executor call.

mod config;
mod executor;
mod scheduler;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_core::service::Dispatcher;
use tessera_store::{FsObjectStore, PgPool, PgStateStore, PgTaskQueue, db};

use crate::config::Config;
use crate::executor::HttpExecutor;
use crate::scheduler::JobPoller;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_worker=info,tessera_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tessera Worker");

    let config = Config::from_env()?;
    config.validate()?;
    info!(
        "Loaded configuration: worker_id={}, executor_url={}, concurrency={}",
        config.worker_id, config.executor_url, config.concurrency
    );

    let pool = connect_with_retry(&config).await?;
    info!("Database connection pool created");

    let executor = HttpExecutor::with_timeout(&config.executor_url, config.engine.execution_timeout)
        .context("Failed to build executor client")?;

    let dispatcher = Dispatcher::new(
        Arc::new(PgStateStore::new(pool.clone())),
        Arc::new(PgTaskQueue::new(pool)),
        Arc::new(FsObjectStore::new(config.object_store_root.clone())),
        Arc::new(executor),
        Arc::new(config.engine.clone()),
    );

    let poller = JobPoller::new(dispatcher, config.concurrency, config.poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing in-flight jobs"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("Worker initialized successfully");

    if let Err(e) = poller.run(shutdown_rx).await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Connect to the database with retry logic and exponential backoff
///
/// This handles the case where the database may not be ready yet when
/// the worker starts (common in container environments).
async fn connect_with_retry(config: &Config) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match db::create_pool(&config.database_url, config.db_max_connections).await {
            Ok(pool) => {
                if attempt > 1 {
                    info!("Connected to database after {} attempt(s)", attempt);
                }
                return Ok(pool);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to connect to database after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!("Failed to connect to database: {}", e));
                }

                warn!(
                    "Failed to connect to database (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
