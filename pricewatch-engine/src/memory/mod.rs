//! Memory pressure monitor
//!
//! Samples process memory on an interval, classifies it against two
//! thresholds and reacts when pressure rises:
//! - entering `warning`: one reclamation pass, then the warning callbacks
//! - entering `critical`: two reclamation passes, then the critical callbacks
//!
//! Reactions are edge-triggered, so a long critical episode fires once.
//! The monitor knows nothing about the session pool or jobs; what a
//! reclamation pass actually frees is decided by the injected
//! [`PressureHandler`]s.

pub mod sampler;

use async_trait::async_trait;
use pricewatch_core::dto::system::{MemorySnapshot, MemoryStats, MemoryStatus, MemoryUsage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sampler::MemorySampler;

/// Memory monitor thresholds and sampling
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// RSS at or above which pressure is `warning`
    pub warning_threshold_mb: f64,

    /// RSS at or above which pressure is `critical`
    pub critical_threshold_mb: f64,

    pub check_interval: Duration,

    /// Snapshots retained for [`MemoryMonitor::get_history`]
    pub history_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_threshold_mb: 2500.0,
            critical_threshold_mb: 3200.0,
            check_interval: Duration::from_secs(5),
            history_size: 60,
        }
    }
}

impl MemoryConfig {
    pub fn classify(&self, rss_mb: f64) -> MemoryStatus {
        if rss_mb >= self.critical_threshold_mb {
            MemoryStatus::Critical
        } else if rss_mb >= self.warning_threshold_mb {
            MemoryStatus::Warning
        } else {
            MemoryStatus::Normal
        }
    }
}

/// Reacts to memory pressure
///
/// Errors are logged by the monitor and never stop it.
#[async_trait]
pub trait PressureHandler: Send + Sync {
    /// Releases whatever native resources can be released cheaply
    async fn reclaim(&self) -> anyhow::Result<()>;

    async fn on_warning(&self, _snapshot: &MemorySnapshot) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_critical(&self, _snapshot: &MemorySnapshot) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Periodic memory sampler with pressure callbacks
///
/// Cheap to clone; clones share state and the sampling loop.
#[derive(Clone)]
pub struct MemoryMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MemoryConfig,
    sampler: Arc<dyn MemorySampler>,
    handlers: Mutex<Vec<Arc<dyn PressureHandler>>>,
    state: Mutex<MonitorState>,
    running: Mutex<Option<CancellationToken>>,
}

struct MonitorState {
    history: VecDeque<MemorySnapshot>,
    status: MemoryStatus,
    current_rss_mb: f64,
    peak_rss_mb: f64,
    peak_time: Option<chrono::DateTime<chrono::Utc>>,
    warning_count: u64,
    critical_count: u64,
    reclaim_count: u64,
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig, sampler: Arc<dyn MemorySampler>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                sampler,
                handlers: Mutex::new(Vec::new()),
                state: Mutex::new(MonitorState {
                    history: VecDeque::new(),
                    status: MemoryStatus::Normal,
                    current_rss_mb: 0.0,
                    peak_rss_mb: 0.0,
                    peak_time: None,
                    warning_count: 0,
                    critical_count: 0,
                    reclaim_count: 0,
                }),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    pub fn register_handler(&self, handler: Arc<dyn PressureHandler>) {
        lock(&self.inner.handlers).push(handler);
    }

    /// Starts the sampling loop; a second call while running is a no-op
    pub fn start(&self) {
        let token = {
            let mut running = lock(&self.inner.running);
            if running.is_some() {
                return;
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        let monitor = self.clone();
        let every = self.inner.config.check_interval;
        info!(
            "Memory monitor started (warning {} MB, critical {} MB, every {:?})",
            self.inner.config.warning_threshold_mb, self.inner.config.critical_threshold_mb, every
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.sample_once().await {
                            warn!("Memory sampling failed: {:#}", e);
                        }
                    }
                }
            }
            debug!("Memory monitor stopped");
        });
    }

    /// Stops the sampling loop; safe to call when not running
    pub fn stop(&self) {
        if let Some(token) = lock(&self.inner.running).take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    /// Takes one sample and reacts to it
    pub async fn sample_once(&self) -> anyhow::Result<MemoryStatus> {
        let snapshot = self.inner.sampler.sample()?;
        Ok(self.observe(snapshot).await)
    }

    /// Records a snapshot, updating history and counters, and fires
    /// reclamation and callbacks on entering a higher pressure level
    pub async fn observe(&self, snapshot: MemorySnapshot) -> MemoryStatus {
        let (status, entered) = {
            let mut state = lock(&self.inner.state);
            let status = self.inner.config.classify(snapshot.rss_mb);

            state.history.push_back(snapshot.clone());
            while state.history.len() > self.inner.config.history_size.max(1) {
                state.history.pop_front();
            }

            state.current_rss_mb = snapshot.rss_mb;
            if snapshot.rss_mb > state.peak_rss_mb {
                state.peak_rss_mb = snapshot.rss_mb;
                state.peak_time = Some(snapshot.timestamp);
            }

            let previous = state.status;
            state.status = status;

            let entered = match (previous, status) {
                (previous, MemoryStatus::Critical) if previous != MemoryStatus::Critical => {
                    state.critical_count += 1;
                    Some(MemoryStatus::Critical)
                }
                (MemoryStatus::Normal, MemoryStatus::Warning) => {
                    state.warning_count += 1;
                    Some(MemoryStatus::Warning)
                }
                _ => None,
            };
            (status, entered)
        };

        match entered {
            Some(MemoryStatus::Critical) => {
                error!(
                    "Memory critical: {:.0} MB RSS (threshold {} MB)",
                    snapshot.rss_mb, self.inner.config.critical_threshold_mb
                );
                self.reclaim_passes(2).await;
                for handler in self.handlers() {
                    if let Err(e) = handler.on_critical(&snapshot).await {
                        error!("Critical memory callback failed: {:#}", e);
                    }
                }
            }
            Some(MemoryStatus::Warning) => {
                warn!(
                    "Memory warning: {:.0} MB RSS (threshold {} MB)",
                    snapshot.rss_mb, self.inner.config.warning_threshold_mb
                );
                self.reclaim_passes(1).await;
                for handler in self.handlers() {
                    if let Err(e) = handler.on_warning(&snapshot).await {
                        error!("Warning memory callback failed: {:#}", e);
                    }
                }
            }
            _ => {}
        }

        status
    }

    /// Runs one reclamation pass
    pub async fn request_reclaim(&self) {
        self.reclaim_passes(1).await;
    }

    /// Fresh sample with its classification; does not touch history
    pub fn get_current_usage(&self) -> anyhow::Result<MemoryUsage> {
        let snapshot = self.inner.sampler.sample()?;
        let status = self.inner.config.classify(snapshot.rss_mb);
        Ok(MemoryUsage { snapshot, status })
    }

    pub fn get_stats(&self) -> MemoryStats {
        let state = lock(&self.inner.state);
        MemoryStats {
            current_rss_mb: state.current_rss_mb,
            peak_rss_mb: state.peak_rss_mb,
            peak_time: state.peak_time,
            warning_count: state.warning_count,
            critical_count: state.critical_count,
            reclaim_count: state.reclaim_count,
            status: state.status,
            warning_threshold_mb: self.inner.config.warning_threshold_mb,
            critical_threshold_mb: self.inner.config.critical_threshold_mb,
        }
    }

    /// Snapshots from roughly the last `minutes`, oldest first
    pub fn get_history(&self, minutes: u64) -> Vec<MemorySnapshot> {
        let interval = self.inner.config.check_interval.as_secs().max(1);
        let wanted = (minutes * 60 / interval) as usize;

        let state = lock(&self.inner.state);
        let skip = state.history.len().saturating_sub(wanted);
        state.history.iter().skip(skip).cloned().collect()
    }

    async fn reclaim_passes(&self, passes: u32) {
        let handlers = self.handlers();
        for _ in 0..passes {
            lock(&self.inner.state).reclaim_count += 1;
            for handler in &handlers {
                if let Err(e) = handler.reclaim().await {
                    error!("Memory reclamation failed: {:#}", e);
                }
            }
        }
    }

    fn handlers(&self) -> Vec<Arc<dyn PressureHandler>> {
        lock(&self.inner.handlers).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
