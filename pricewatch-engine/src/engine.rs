//! Composition root
//!
//! [`Engine`] builds exactly one session pool, one memory monitor and one
//! orchestrator and wires them together: memory pressure shrinks the pool,
//! every adapter fetches through the shared pool, and system status reports
//! all three. Nothing here is global; binaries own the engine and call
//! [`Engine::start`] and [`Engine::shutdown`] explicitly.

use anyhow::Context;
use async_trait::async_trait;
use pricewatch_core::dto::system::{MemorySnapshot, SystemStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapter::fetcher::PageFetcher;
use crate::adapter::profile::SiteProfile;
use crate::adapter::registry::AdapterRegistry;
use crate::config::EngineConfig;
use crate::memory::sampler::{MemorySampler, ProcfsSampler};
use crate::memory::{MemoryMonitor, PressureHandler};
use crate::orchestrator::CrawlOrchestrator;
use crate::resilience::retry::Retrier;
use crate::session::pool::SessionPool;
use crate::session::webdriver::WebDriverFactory;
use crate::sink::ResultSink;
use crate::store::JobStore;

/// Evicts idle sessions on every reclamation pass and drains the pool when
/// memory turns critical
pub struct PoolPressureHandler {
    pool: SessionPool,
}

impl PoolPressureHandler {
    pub fn new(pool: SessionPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PressureHandler for PoolPressureHandler {
    async fn reclaim(&self) -> anyhow::Result<()> {
        let evicted = self.pool.sweep_idle().await;
        debug!("Reclamation pass evicted {} session(s)", evicted);
        Ok(())
    }

    async fn on_warning(&self, snapshot: &MemorySnapshot) -> anyhow::Result<()> {
        warn!(
            "Memory warning: {:.0}MB RSS with {} live session(s)",
            snapshot.rss_mb,
            self.pool.live_count()
        );
        Ok(())
    }

    async fn on_critical(&self, snapshot: &MemorySnapshot) -> anyhow::Result<()> {
        warn!("Memory critical: {:.0}MB RSS, draining session pool", snapshot.rss_mb);
        self.pool.drain().await;
        Ok(())
    }
}

pub struct Engine {
    pool: SessionPool,
    monitor: MemoryMonitor,
    orchestrator: CrawlOrchestrator,
}

impl Engine {
    /// Builds the engine with WebDriver sessions and the built-in site profiles
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        sink: Arc<dyn ResultSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let factory = Arc::new(WebDriverFactory::new(&config.fetch));
        let pool = SessionPool::new(config.pool.clone(), factory);
        let fetcher = PageFetcher::new(config.fetch.clone(), Some(pool.clone()))
            .context("Failed to build page fetcher")?;
        let registry = AdapterRegistry::with_profiles(
            SiteProfile::builtin(),
            fetcher,
            config.breaker.clone(),
        );

        Ok(Self::with_parts(
            &config,
            store,
            sink,
            pool,
            Arc::new(ProcfsSampler),
            registry,
        ))
    }

    /// Builds the engine from explicit collaborators
    pub fn with_parts(
        config: &EngineConfig,
        store: Arc<dyn JobStore>,
        sink: Arc<dyn ResultSink>,
        pool: SessionPool,
        sampler: Arc<dyn MemorySampler>,
        registry: AdapterRegistry,
    ) -> Self {
        let monitor = MemoryMonitor::new(config.memory.clone(), sampler);
        monitor.register_handler(Arc::new(PoolPressureHandler::new(pool.clone())));

        let orchestrator = CrawlOrchestrator::new(
            store,
            sink,
            Arc::new(registry),
            monitor.clone(),
            Retrier::new(config.retry.clone()),
            config.batch.clone(),
        );

        Self {
            pool,
            monitor,
            orchestrator,
        }
    }

    /// Starts the idle sweep and the memory sampling loop
    pub fn start(&self) {
        self.pool.start();
        self.monitor.start();
        info!(
            "Engine started (max {} sessions, sites: {})",
            self.pool.config().max_sessions,
            self.orchestrator.registry().site_keys().join(", ")
        );
    }

    pub fn orchestrator(&self) -> &CrawlOrchestrator {
        &self.orchestrator
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn monitor(&self) -> &MemoryMonitor {
        &self.monitor
    }

    pub fn system_status(&self) -> SystemStatus {
        let job_ids = self.orchestrator.active_jobs();
        SystemStatus {
            active_jobs: job_ids.len(),
            job_ids,
            memory: self.monitor.get_stats(),
            pool: self.pool.stats(),
        }
    }

    /// Cancels running jobs, closes the pool and stops sampling
    pub async fn shutdown(&self) {
        let cancelled = self.orchestrator.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} running job(s)", cancelled);
        }
        self.pool.shutdown().await;
        self.monitor.stop();
        info!("Engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::FakeFactory;
    use crate::sink::MemorySink;
    use crate::store::InMemoryJobStore;
    use pricewatch_core::dto::system::MemoryStatus;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct FixedSampler;

    impl MemorySampler for FixedSampler {
        fn sample(&self) -> anyhow::Result<MemorySnapshot> {
            Ok(snapshot(100.0))
        }
    }

    fn snapshot(rss_mb: f64) -> MemorySnapshot {
        MemorySnapshot {
            timestamp: chrono::Utc::now(),
            rss_mb,
            vms_mb: rss_mb * 2.0,
            system_percent: 40.0,
            available_mb: 1024.0,
        }
    }

    fn engine(factory: Arc<FakeFactory>) -> Engine {
        let config = EngineConfig::default();
        let pool = SessionPool::new(config.pool.clone(), factory);
        Engine::with_parts(
            &config,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(MemorySink::new()),
            pool,
            Arc::new(FixedSampler),
            AdapterRegistry::new(config.breaker.clone()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_memory_drains_pool() {
        let factory = FakeFactory::new("<html></html>");
        let engine = engine(factory.clone());

        let session = engine.pool().acquire(Duration::from_secs(1)).await.unwrap();
        drop(session);
        assert_eq!(engine.pool().live_count(), 1);

        let status = engine.monitor().observe(snapshot(3300.0)).await;
        assert_eq!(status, MemoryStatus::Critical);
        assert_eq!(engine.pool().live_count(), 0);
        assert_eq!(factory.counters.quit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_status_reports_components() {
        let engine = engine(FakeFactory::new("<html></html>"));
        engine.start();

        let status = engine.system_status();
        assert_eq!(status.active_jobs, 0);
        assert!(status.job_ids.is_empty());
        assert_eq!(status.pool.max_sessions, 2);
        assert_eq!(status.memory.warning_threshold_mb, 2500.0);

        engine.shutdown().await;
        engine.shutdown().await;
        assert!(engine.pool().is_closed());
        assert!(!engine.monitor().is_running());
    }
}
