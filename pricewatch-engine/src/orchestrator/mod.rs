//! Crawl orchestrator
//!
//! Turns a job's work items into sequential batches, each drained by a
//! bounded worker pool. The orchestrator is the only writer of job records:
//! it drives the job state machine, reports progress after every batch,
//! tracks runtime statistics and persists the results at the end.
//!
//! Cancellation is cooperative. It is checked at the top of every batch and
//! by workers between items; fetches already in flight complete. Pausing
//! holds a job at the next batch boundary until it is resumed or cancelled.

pub mod batch;
pub mod job_log;
pub mod stats;

use pricewatch_core::domain::item::{ItemResult, WorkItem};
use pricewatch_core::domain::job::Job;
use pricewatch_core::dto::job::{JobStats, JobStatusView, SubmitJob};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::registry::AdapterRegistry;
use crate::config::BatchConfig;
use crate::error::EngineError;
use crate::memory::MemoryMonitor;
use crate::resilience::retry::Retrier;
use crate::sink::ResultSink;
use crate::source::{StaticSource, WorkItemSource};
use crate::store::JobStore;
use batch::BatchContext;
use job_log::JobLogger;
use stats::JobStatsTracker;

/// Runs crawl jobs; cheap to clone
#[derive(Clone)]
pub struct CrawlOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn ResultSink>,
    registry: Arc<AdapterRegistry>,
    monitor: MemoryMonitor,
    retrier: Retrier,
    batch: BatchConfig,
    active: Mutex<HashMap<Uuid, ActiveJob>>,
    finished: Mutex<HashMap<Uuid, JobStats>>,
}

struct ActiveJob {
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
    stats: Arc<JobStatsTracker>,
}

/// Per-job controls handed to the executing task
struct JobControls {
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
    stats: Arc<JobStatsTracker>,
}

impl JobControls {
    fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            paused: watch::channel(false).1,
            stats: Arc::new(JobStatsTracker::new()),
        }
    }
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        sink: Arc<dyn ResultSink>,
        registry: Arc<AdapterRegistry>,
        monitor: MemoryMonitor,
        retrier: Retrier,
        batch: BatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                store,
                sink,
                registry,
                monitor,
                retrier,
                batch,
                active: Mutex::new(HashMap::new()),
                finished: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.inner.registry
    }

    /// Records a pending job and runs it on its own task
    ///
    /// # Arguments
    /// * `user_id` - Owner of the job
    /// * `site_name` - Site name used to pick the adapter
    /// * `source` - Where the work items come from
    ///
    /// # Returns
    /// The job as recorded, still pending
    pub async fn submit(
        &self,
        user_id: &str,
        site_name: &str,
        source: Arc<dyn WorkItemSource>,
    ) -> Result<Job, EngineError> {
        let job = self.create(user_id, site_name).await?;
        let job_id = job.id;

        let inner = Arc::clone(&self.inner);
        let pending = job.clone();
        let handle = tokio::spawn(async move { inner.execute(pending, source).await });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(job)) => debug!("Job {} finished as {}", job_id, job.status.as_str()),
                Ok(Err(e)) => {
                    error!("Job {} aborted: {:#}", job_id, e);
                    inner.fail_orphan(job_id, &format!("Job aborted: {e:#}")).await;
                }
                Err(e) => {
                    warn!("Job task panicked: {}", e);
                    inner.fail_orphan(job_id, "job task panicked").await;
                }
            }
            inner.retire(job_id);
        });

        Ok(job)
    }

    /// Submits a job whose items come with the request
    pub async fn submit_items(&self, request: SubmitJob) -> Result<Job, EngineError> {
        let source = Arc::new(StaticSource::new(request.items));
        self.submit(&request.user_id, &request.site_name, source).await
    }

    /// Runs a job on the current task and returns its final record
    pub async fn run(
        &self,
        user_id: &str,
        site_name: &str,
        source: Arc<dyn WorkItemSource>,
    ) -> Result<Job, EngineError> {
        let job = self.create(user_id, site_name).await?;
        let job_id = job.id;
        let result = self.inner.execute(job, source).await;
        if let Err(e) = &result {
            self.inner
                .fail_orphan(job_id, &format!("Job aborted: {e:#}"))
                .await;
        }
        self.inner.retire(job_id);
        result
    }

    /// Requests cancellation
    ///
    /// Returns `false` when the job exists but is no longer running.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool, EngineError> {
        if let Some(active) = self.inner.active().get(&job_id) {
            info!("Cancellation requested for job {}", job_id);
            active.cancel.cancel();
            return Ok(true);
        }

        match self.inner.store.get_job(job_id).await? {
            Some(_) => Ok(false),
            None => Err(EngineError::JobNotFound(job_id)),
        }
    }

    /// Holds a running job before its next batch
    ///
    /// Returns `false` when the job exists but is no longer running.
    pub async fn pause(&self, job_id: Uuid) -> Result<bool, EngineError> {
        self.set_paused(job_id, true).await
    }

    /// Lets a paused job continue with its next batch
    pub async fn resume(&self, job_id: Uuid) -> Result<bool, EngineError> {
        self.set_paused(job_id, false).await
    }

    async fn set_paused(&self, job_id: Uuid, paused: bool) -> Result<bool, EngineError> {
        if let Some(active) = self.inner.active().get(&job_id) {
            if !active.cancel.is_cancelled() {
                let action = if paused { "Pause" } else { "Resume" };
                info!("{} requested for job {}", action, job_id);
                active.pause.send_replace(paused);
                return Ok(true);
            }
        }

        match self.inner.store.get_job(job_id).await? {
            Some(_) => Ok(false),
            None => Err(EngineError::JobNotFound(job_id)),
        }
    }

    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusView, EngineError> {
        let job = self.get_job(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, EngineError> {
        self.inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))
    }

    /// Live statistics, or the final ones once the job is done
    pub async fn get_stats(&self, job_id: Uuid) -> Result<JobStats, EngineError> {
        if let Some(active) = self.inner.active().get(&job_id) {
            return Ok(active.stats.snapshot());
        }
        if let Some(stats) = self.inner.finished().get(&job_id) {
            return Ok(stats.clone());
        }

        // Finished before this process started
        let job = self.get_job(job_id).await?;
        Ok(stats_from_record(&job))
    }

    /// Ids of jobs currently running, sorted
    pub fn active_jobs(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.inner.active().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Cancels every running job
    pub fn cancel_all(&self) -> usize {
        let active = self.inner.active();
        for job in active.values() {
            job.cancel.cancel();
        }
        active.len()
    }

    async fn create(&self, user_id: &str, site_name: &str) -> Result<Job, EngineError> {
        let job = Job::new(user_id, site_name);
        self.inner.store.save_job(&job).await?;
        self.inner.active().insert(
            job.id,
            ActiveJob {
                cancel: CancellationToken::new(),
                pause: watch::Sender::new(false),
                stats: Arc::new(JobStatsTracker::new()),
            },
        );
        info!("Job {} submitted for site {} by {}", job.id, site_name, user_id);
        Ok(job)
    }
}

fn stats_from_record(job: &Job) -> JobStats {
    let elapsed_seconds = match (job.started_at, job.completed_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    };
    JobStats {
        total_items: job.total_items,
        processed_items: job.processed_items,
        elapsed_seconds,
        items_per_second: if elapsed_seconds > 0.0 {
            f64::from(job.processed_items) / elapsed_seconds
        } else {
            0.0
        },
        ..JobStats::default()
    }
}

impl OrchestratorInner {
    fn active(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveJob>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finished(&self) -> MutexGuard<'_, HashMap<Uuid, JobStats>> {
        self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves a job's statistics out of the active table
    fn retire(&self, job_id: Uuid) {
        let Some(active) = self.active().remove(&job_id) else {
            return;
        };
        active.stats.finish();
        self.finished().insert(job_id, active.stats.snapshot());
    }

    fn controls(&self, job_id: Uuid) -> Option<JobControls> {
        self.active().get(&job_id).map(|a| JobControls {
            cancel: a.cancel.clone(),
            paused: a.pause.subscribe(),
            stats: Arc::clone(&a.stats),
        })
    }

    async fn execute(
        &self,
        mut job: Job,
        source: Arc<dyn WorkItemSource>,
    ) -> Result<Job, EngineError> {
        let log = JobLogger::new(job.id, Arc::clone(&self.store));
        let mut controls = self.controls(job.id).unwrap_or_else(JobControls::detached);
        let stats = Arc::clone(&controls.stats);

        job.start()?;
        self.store.save_job(&job).await?;
        log.info(format!("Job started for site {}", job.site_name)).await;

        let items = match source.load().await {
            Ok(items) => items,
            Err(e) => {
                return self.fail(job, &log, format!("Failed to load work items: {e:#}")).await;
            }
        };
        if items.is_empty() {
            return self.fail(job, &log, "No work items to crawl").await;
        }

        job.total_items = items.len() as u32;
        stats.start(job.total_items);
        self.save(&job).await;

        let first_url = items.iter().find_map(|i| i.primary_url.as_deref());
        let Some((site_key, job_adapter)) = self.registry.resolve(&job.site_name, first_url)
        else {
            let message = format!("No adapter available for site {}", job.site_name);
            return self.fail(job, &log, message).await;
        };
        log.info(format!("Using adapter {} for {} items", site_key, items.len())).await;

        let ctx = BatchContext {
            registry: Arc::clone(&self.registry),
            site_key,
            job_adapter: Arc::clone(&job_adapter),
            retrier: self.retrier.clone(),
            max_workers: self.batch.max_workers,
        };

        let results = self.run_batches(&mut job, items, &ctx, &mut controls, &log).await;
        job_adapter.close().await;

        match self.sink.persist(&job, &results).await {
            Ok(location) => job.result_location = Some(location),
            Err(e) => {
                return self.fail(job, &log, format!("Failed to persist results: {e:#}")).await;
            }
        }

        let summary = stats.snapshot();
        if controls.cancel.is_cancelled() {
            job.cancel()?;
            log.warning(format!(
                "Job cancelled after {}/{} items",
                job.processed_items, job.total_items
            ))
            .await;
        } else {
            job.complete()?;
            log.info(format!(
                "Job completed: {} succeeded, {} failed in {:.1}s",
                summary.success_count, summary.error_count, summary.elapsed_seconds
            ))
            .await;
        }

        self.store.save_job(&job).await?;
        Ok(job)
    }

    async fn run_batches(
        &self,
        job: &mut Job,
        items: Vec<WorkItem>,
        ctx: &BatchContext,
        controls: &mut JobControls,
        log: &JobLogger,
    ) -> Vec<ItemResult> {
        let cancel = controls.cancel.clone();
        let stats = Arc::clone(&controls.stats);
        let batch_size = self.batch.batch_size.max(1);
        let total_batches = items.len().div_ceil(batch_size);
        let mut results = Vec::with_capacity(items.len());

        for (index, chunk) in items.chunks(batch_size).enumerate() {
            if *controls.paused.borrow_and_update() {
                self.hold(job, &mut controls.paused, &cancel, log).await;
            }
            if cancel.is_cancelled() {
                log.warning(format!("Cancelled before batch {}/{}", index + 1, total_batches))
                    .await;
                break;
            }

            log.info(format!(
                "Processing batch {}/{} ({} items)",
                index + 1,
                total_batches,
                chunk.len()
            ))
            .await;

            let batch_results = batch::run_batch(ctx, chunk.to_vec(), &cancel).await;
            stats.record(&batch_results);
            results.extend(batch_results);

            job.update_progress(results.len() as u32);
            self.save(job).await;
            log.info(format!(
                "Progress: {}/{} items ({}%)",
                job.processed_items, job.total_items, job.progress
            ))
            .await;

            self.monitor.request_reclaim().await;
            match self.monitor.get_current_usage() {
                Ok(usage) => stats.record_memory(usage.snapshot.rss_mb),
                Err(e) => debug!("Memory sample failed: {:#}", e),
            }

            if index + 1 < total_batches && !self.batch.batch_pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.batch.batch_pause) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        results
    }

    /// Parks a job between batches until it is resumed or cancelled
    async fn hold(
        &self,
        job: &mut Job,
        paused: &mut watch::Receiver<bool>,
        cancel: &CancellationToken,
        log: &JobLogger,
    ) {
        if job.pause().is_err() {
            return;
        }
        self.save(job).await;
        log.info(format!(
            "Job paused after {}/{} items",
            job.processed_items, job.total_items
        ))
        .await;

        tokio::select! {
            _ = paused.wait_for(|p| !*p) => {}
            _ = cancel.cancelled() => {}
        }

        // Back to running so the final transition applies either way
        if job.resume().is_ok() {
            self.save(job).await;
            if !cancel.is_cancelled() {
                log.info("Job resumed").await;
            }
        }
    }

    async fn fail(
        &self,
        mut job: Job,
        log: &JobLogger,
        message: impl Into<String>,
    ) -> Result<Job, EngineError> {
        let message = message.into();
        log.error(message.as_str()).await;
        job.fail(message)?;
        self.store.save_job(&job).await?;
        Ok(job)
    }

    /// Marks a job failed when its task ended without finishing it
    async fn fail_orphan(&self, job_id: Uuid, message: &str) {
        let job = match self.store.get_job(job_id).await {
            Ok(Some(job)) if !job.status.is_terminal() => job,
            _ => return,
        };
        let log = JobLogger::new(job_id, Arc::clone(&self.store));
        if let Err(e) = self.fail(job, &log, message).await {
            error!("Failed to record failure of job {}: {:#}", job_id, e);
        }
    }

    /// Progress saves are best effort; the final save is not
    async fn save(&self, job: &Job) {
        if let Err(e) = self.store.save_job(job).await {
            warn!("Failed to save progress of job {}: {:#}", job.id, e);
        }
    }
}
