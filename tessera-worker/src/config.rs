//! Worker configuration
//!
//! Connection settings for the state store, dispatch queue, object store and
//! compute executor, plus the dispatch timings handed to the engine.

use std::path::PathBuf;
use std::time::Duration;
use tessera_core::EngineConfig;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier for this worker instance, used in logs
    pub worker_id: String,

    /// PostgreSQL connection string (state store and dispatch queue)
    pub database_url: String,

    /// Base URL of the compute executor (e.g., "http://localhost:9000")
    pub executor_url: String,

    /// Root directory of the object store
    pub object_store_root: PathBuf,

    /// How long an idle consumer waits before leasing again
    pub poll_interval: Duration,

    /// Number of messages processed concurrently
    pub concurrency: usize,

    /// Maximum database connections held by the pool
    pub db_max_connections: u32,

    /// Retry, timeout and lease settings for the dispatcher
    pub engine: EngineConfig,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, database_url: String, executor_url: String) -> Self {
        Self {
            worker_id,
            database_url,
            executor_url,
            object_store_root: PathBuf::from("./objects"),
            poll_interval: Duration::from_secs(1),
            concurrency: 4,
            db_max_connections: 5,
            engine: EngineConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DATABASE_URL (required)
    /// - EXECUTOR_URL (required)
    /// - WORKER_ID (optional, default: random)
    /// - OBJECT_STORE_ROOT (optional, default: ./objects)
    /// - POLL_INTERVAL (optional, milliseconds, default: 1000)
    /// - WORKER_CONCURRENCY (optional, default: 4)
    /// - DB_MAX_CONNECTIONS (optional, default: 5)
    /// - MAX_ATTEMPTS (optional, default: 3)
    /// - RETRY_BASE_DELAY / RETRY_MAX_DELAY (optional, seconds, default: 2 / 60)
    /// - EXECUTION_TIMEOUT (optional, seconds, default: 900)
    /// - VISIBILITY_TIMEOUT (optional, seconds, default: 60)
    /// - CANCEL_POLL_INTERVAL (optional, seconds, default: 5)
    /// - INLINE_OUTPUT_LIMIT (optional, bytes, default: 65536)
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable not set"))?;

        let executor_url = std::env::var("EXECUTOR_URL")
            .map_err(|_| anyhow::anyhow!("EXECUTOR_URL environment variable not set"))?;

        let worker_id =
            std::env::var("WORKER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let mut config = Self::new(worker_id, database_url, executor_url);

        if let Ok(root) = std::env::var("OBJECT_STORE_ROOT") {
            config.object_store_root = PathBuf::from(root);
        }
        if let Some(ms) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse("WORKER_CONCURRENCY") {
            config.concurrency = n;
        }
        if let Some(n) = env_parse("DB_MAX_CONNECTIONS") {
            config.db_max_connections = n;
        }

        let engine = &mut config.engine;
        if let Some(n) = env_parse("MAX_ATTEMPTS") {
            engine.max_attempts = n;
        }
        if let Some(d) = env_secs("RETRY_BASE_DELAY") {
            engine.retry_base_delay = d;
        }
        if let Some(d) = env_secs("RETRY_MAX_DELAY") {
            engine.retry_max_delay = d;
        }
        if let Some(d) = env_secs("EXECUTION_TIMEOUT") {
            engine.execution_timeout = d;
        }
        if let Some(d) = env_secs("VISIBILITY_TIMEOUT") {
            engine.visibility_timeout = d;
        }
        if let Some(d) = env_secs("CANCEL_POLL_INTERVAL") {
            engine.cancel_poll_interval = d;
        }
        if let Some(n) = env_parse("INLINE_OUTPUT_LIMIT") {
            engine.inline_output_limit = n;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            anyhow::bail!("database_url must start with postgres:// or postgresql://");
        }

        if !self.executor_url.starts_with("http://") && !self.executor_url.starts_with("https://")
        {
            anyhow::bail!("executor_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.db_max_connections == 0 {
            anyhow::bail!("db_max_connections must be greater than 0");
        }

        self.engine.validate().map_err(anyhow::Error::msg)?;

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
