//! Server configuration and shared handler state

use pricewatch_engine::Engine;
use pricewatch_engine::store::JobStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Server settings read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Postgres connection string; jobs are kept in memory when absent
    pub database_url: Option<String>,
    pub bind_addr: String,
    /// Jobs allowed to run at once across all users
    pub max_concurrent_jobs: usize,
    pub results_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            max_concurrent_jobs: 5,
            results_dir: PathBuf::from("results"),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables
    ///
    /// Environment variables:
    /// - DATABASE_URL (optional)
    /// - PRICEWATCH_BIND_ADDR (default: 0.0.0.0:8080)
    /// - PRICEWATCH_MAX_CONCURRENT_JOBS (default: 5)
    /// - PRICEWATCH_RESULTS_DIR (default: results)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            ..Self::default()
        };

        if let Ok(addr) = std::env::var("PRICEWATCH_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Ok(max) = std::env::var("PRICEWATCH_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = max.parse().map_err(|e| {
                anyhow::anyhow!("Invalid PRICEWATCH_MAX_CONCURRENT_JOBS '{}': {}", max, e)
            })?;
        }

        if let Ok(dir) = std::env::var("PRICEWATCH_RESULTS_DIR") {
            config.results_dir = PathBuf::from(dir);
        }

        if config.max_concurrent_jobs == 0 {
            anyhow::bail!("PRICEWATCH_MAX_CONCURRENT_JOBS must be greater than 0");
        }

        Ok(config)
    }
}

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn JobStore>,
    pub max_concurrent_jobs: usize,
    /// Serializes the concurrency check with the submission it guards
    pub submit_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, store: Arc<dyn JobStore>, max_concurrent_jobs: usize) -> Self {
        Self {
            engine,
            store,
            max_concurrent_jobs,
            submit_lock: Arc::new(Mutex::new(())),
        }
    }
}
