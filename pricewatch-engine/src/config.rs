//! Engine configuration
//!
//! Defines all configurable parameters of the crawling engine: session pool
//! limits, memory thresholds, retry and breaker policies, batching and fetch
//! timeouts. Every value has a default tuned for a small host (4GB RAM,
//! 2 vCPU) and can be overridden through `PRICEWATCH_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::memory::MemoryConfig;
use crate::resilience::breaker::BreakerConfig;
use crate::resilience::retry::RetryPolicy;
use crate::session::pool::PoolConfig;

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub memory: MemoryConfig,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub batch: BatchConfig,
    pub fetch: FetchConfig,
}

/// Job batching parameters
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Number of work items per batch
    pub batch_size: usize,

    /// Parallel workers inside one batch
    pub max_workers: usize,

    /// Pause between two consecutive batches
    pub batch_pause: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_workers: 2,
            batch_pause: Duration::from_millis(200),
        }
    }
}

/// Page fetching parameters
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Timeout of a plain HTTP fetch
    pub http_timeout: Duration,

    /// How long to wait for a pooled browser session
    pub acquire_timeout: Duration,

    /// Timeout of a single browser navigation, settle time included
    pub navigate_timeout: Duration,

    /// Path of the WebDriver server binary (chromedriver compatible)
    pub webdriver_path: String,

    /// Run the browser without a window
    pub headless: bool,

    /// User agent sent by plain HTTP fetches
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(60),
            navigate_timeout: Duration::from_secs(60),
            webdriver_path: "chromedriver".to_string(),
            headless: true,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                .to_string(),
        }
    }
}

impl EngineConfig {
    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to its default:
    /// - PRICEWATCH_MAX_SESSIONS (default: 2)
    /// - PRICEWATCH_MAX_REQUESTS_PER_SESSION (default: 30)
    /// - PRICEWATCH_SESSION_MAX_AGE (seconds, default: 300)
    /// - PRICEWATCH_SESSION_IDLE_TIMEOUT (seconds, default: 60)
    /// - PRICEWATCH_SWEEP_INTERVAL (seconds, default: 30)
    /// - PRICEWATCH_MEMORY_WARNING_MB (default: 2500)
    /// - PRICEWATCH_MEMORY_CRITICAL_MB (default: 3200)
    /// - PRICEWATCH_MEMORY_CHECK_INTERVAL (seconds, default: 5)
    /// - PRICEWATCH_BATCH_SIZE (default: 10)
    /// - PRICEWATCH_MAX_WORKERS (default: 2)
    /// - PRICEWATCH_RETRY_ATTEMPTS (default: 3)
    /// - PRICEWATCH_RETRY_DELAY_MS (default: 1000)
    /// - PRICEWATCH_RETRY_BACKOFF (default: 2.0)
    /// - PRICEWATCH_RETRY_MAX_DELAY (seconds, default: 30)
    /// - PRICEWATCH_BREAKER_FAILURES (default: 5)
    /// - PRICEWATCH_BREAKER_RECOVERY (seconds, default: 60)
    /// - PRICEWATCH_BREAKER_HALF_OPEN_REQUESTS (default: 3)
    /// - PRICEWATCH_ACQUIRE_TIMEOUT (seconds, default: 60)
    /// - PRICEWATCH_HTTP_TIMEOUT (seconds, default: 30)
    /// - PRICEWATCH_WEBDRIVER_PATH (default: chromedriver)
    /// - PRICEWATCH_HEADLESS (default: true)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        override_with(&mut config.pool.max_sessions, "PRICEWATCH_MAX_SESSIONS");
        override_with(
            &mut config.pool.max_requests_per_session,
            "PRICEWATCH_MAX_REQUESTS_PER_SESSION",
        );
        override_secs(&mut config.pool.max_age, "PRICEWATCH_SESSION_MAX_AGE");
        override_secs(&mut config.pool.idle_timeout, "PRICEWATCH_SESSION_IDLE_TIMEOUT");
        override_secs(&mut config.pool.sweep_interval, "PRICEWATCH_SWEEP_INTERVAL");

        override_with(
            &mut config.memory.warning_threshold_mb,
            "PRICEWATCH_MEMORY_WARNING_MB",
        );
        override_with(
            &mut config.memory.critical_threshold_mb,
            "PRICEWATCH_MEMORY_CRITICAL_MB",
        );
        override_secs(
            &mut config.memory.check_interval,
            "PRICEWATCH_MEMORY_CHECK_INTERVAL",
        );

        override_with(&mut config.batch.batch_size, "PRICEWATCH_BATCH_SIZE");
        override_with(&mut config.batch.max_workers, "PRICEWATCH_MAX_WORKERS");

        override_with(&mut config.retry.max_attempts, "PRICEWATCH_RETRY_ATTEMPTS");
        if let Some(ms) = env_parse::<u64>("PRICEWATCH_RETRY_DELAY_MS") {
            config.retry.delay = Duration::from_millis(ms);
        }
        override_with(&mut config.retry.backoff, "PRICEWATCH_RETRY_BACKOFF");
        override_secs(&mut config.retry.max_delay, "PRICEWATCH_RETRY_MAX_DELAY");

        override_with(
            &mut config.breaker.failure_threshold,
            "PRICEWATCH_BREAKER_FAILURES",
        );
        override_secs(
            &mut config.breaker.recovery_timeout,
            "PRICEWATCH_BREAKER_RECOVERY",
        );
        override_with(
            &mut config.breaker.half_open_requests,
            "PRICEWATCH_BREAKER_HALF_OPEN_REQUESTS",
        );

        override_secs(&mut config.fetch.acquire_timeout, "PRICEWATCH_ACQUIRE_TIMEOUT");
        override_secs(&mut config.fetch.http_timeout, "PRICEWATCH_HTTP_TIMEOUT");
        if let Ok(path) = std::env::var("PRICEWATCH_WEBDRIVER_PATH") {
            config.fetch.webdriver_path = path;
        }
        override_with(&mut config.fetch.headless, "PRICEWATCH_HEADLESS");

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool.max_sessions == 0 {
            anyhow::bail!("max_sessions must be greater than 0");
        }

        if self.pool.max_requests_per_session == 0 {
            anyhow::bail!("max_requests_per_session must be greater than 0");
        }

        let memory = &self.memory;
        if !memory.warning_threshold_mb.is_finite() || !memory.critical_threshold_mb.is_finite() {
            anyhow::bail!("memory thresholds must be finite");
        }

        if memory.warning_threshold_mb >= memory.critical_threshold_mb {
            anyhow::bail!("memory warning threshold must be below the critical threshold");
        }

        if self.memory.check_interval.is_zero() {
            anyhow::bail!("memory check_interval must be greater than 0");
        }

        if self.batch.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.batch.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry max_attempts must be greater than 0");
        }

        if !self.retry.backoff.is_finite() || self.retry.backoff < 1.0 {
            anyhow::bail!("retry backoff must be a finite number of at least 1.0");
        }

        let multiplier = self.retry.bot_backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            anyhow::bail!("bot backoff multiplier must be a finite number of at least 1.0");
        }

        if self.breaker.failure_threshold == 0 || self.breaker.half_open_requests == 0 {
            anyhow::bail!("breaker thresholds must be greater than 0");
        }

        if self.fetch.webdriver_path.is_empty() {
            anyhow::bail!("webdriver_path cannot be empty");
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn override_with<T: FromStr>(slot: &mut T, key: &str) {
    if let Some(value) = env_parse::<T>(key) {
        *slot = value;
    }
}

fn override_secs(slot: &mut Duration, key: &str) {
    if let Some(secs) = env_parse::<u64>(key) {
        *slot = Duration::from_secs(secs);
    }
}
