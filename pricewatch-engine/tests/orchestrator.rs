use async_trait::async_trait;
use pricewatch_core::domain::item::{CompetitorUrl, ItemResult, WorkItem};
use pricewatch_core::domain::job::{Job, JobStatus};
use pricewatch_core::domain::log::LogEntry;
use pricewatch_core::domain::price::{PriceResult, ShippingStatus};
use pricewatch_core::dto::system::MemorySnapshot;
use pricewatch_engine::adapter::SiteAdapter;
use pricewatch_engine::adapter::registry::AdapterRegistry;
use pricewatch_engine::config::BatchConfig;
use pricewatch_engine::memory::sampler::MemorySampler;
use pricewatch_engine::memory::{MemoryConfig, MemoryMonitor};
use pricewatch_engine::orchestrator::CrawlOrchestrator;
use pricewatch_engine::resilience::{BreakerConfig, Retrier, RetryPolicy};
use pricewatch_engine::sink::{MemorySink, ResultSink};
use pricewatch_engine::source::StaticSource;
use pricewatch_engine::store::{InMemoryJobStore, JobStore};
use pricewatch_engine::{CrawlError, CrawlResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Adapter answering every URL with a fixed price after a delay
struct ShopAdapter {
    delay: Duration,
    fetches: AtomicUsize,
}

#[async_trait]
impl SiteAdapter for ShopAdapter {
    fn name(&self) -> &str {
        "shop"
    }

    fn requires_browser(&self) -> bool {
        false
    }

    async fn fetch(&self, url: &str) -> CrawlResult<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if url.contains("broken") {
            return Err(CrawlError::BotDetected("page too short".to_string()));
        }
        Ok(format!("<html>{url}</html>"))
    }

    fn extract(&self, _markup: &str, url: &str) -> CrawlResult<PriceResult> {
        let price = if url.contains("rival") { 9_000 } else { 10_000 };
        Ok(PriceResult::new("shop", url, Some(price), Some(0), ShippingStatus::Free))
    }
}

struct FlatSampler;

impl MemorySampler for FlatSampler {
    fn sample(&self) -> anyhow::Result<MemorySnapshot> {
        Ok(MemorySnapshot {
            timestamp: chrono::Utc::now(),
            rss_mb: 256.0,
            vms_mb: 512.0,
            system_percent: 30.0,
            available_mb: 2048.0,
        })
    }
}

struct BrokenSink;

#[async_trait]
impl ResultSink for BrokenSink {
    async fn persist(&self, _job: &Job, _results: &[ItemResult]) -> anyhow::Result<String> {
        anyhow::bail!("disk full")
    }
}

/// Store whose `fail_on`-th job save fails
struct FlakyStore {
    inner: Arc<InMemoryJobStore>,
    saves: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        if self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            anyhow::bail!("database unavailable");
        }
        self.inner.save_job(job).await
    }

    async fn get_job(&self, id: uuid::Uuid) -> anyhow::Result<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(
        &self,
        user_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> anyhow::Result<Vec<Job>> {
        self.inner.list_jobs(user_id, status).await
    }

    async fn append_log(&self, entry: LogEntry) -> anyhow::Result<()> {
        self.inner.append_log(entry).await
    }

    async fn get_logs(&self, job_id: uuid::Uuid) -> anyhow::Result<Vec<LogEntry>> {
        self.inner.get_logs(job_id).await
    }
}

struct Harness {
    orchestrator: CrawlOrchestrator,
    store: Arc<InMemoryJobStore>,
    sink: Arc<MemorySink>,
    adapter: Arc<ShopAdapter>,
    monitor: MemoryMonitor,
}

fn harness(batch_size: usize, max_workers: usize, delay: Duration) -> Harness {
    harness_with(batch_size, max_workers, delay, None, |store| store as Arc<dyn JobStore>)
}

fn harness_with(
    batch_size: usize,
    max_workers: usize,
    delay: Duration,
    sink_override: Option<Arc<dyn ResultSink>>,
    wrap_store: impl FnOnce(Arc<InMemoryJobStore>) -> Arc<dyn JobStore>,
) -> Harness {
    let adapter = Arc::new(ShopAdapter {
        delay,
        fetches: AtomicUsize::new(0),
    });
    let mut registry = AdapterRegistry::new(BreakerConfig::default());
    let built = Arc::clone(&adapter);
    registry.register(
        "shop",
        &["Shop Mall"],
        &["shop.example"],
        Arc::new(move || Arc::clone(&built) as Arc<dyn SiteAdapter>),
    );

    let store = Arc::new(InMemoryJobStore::new());
    let sink = Arc::new(MemorySink::new());
    let monitor = MemoryMonitor::new(MemoryConfig::default(), Arc::new(FlatSampler));
    let retrier = Retrier::new(RetryPolicy {
        max_attempts: 2,
        delay: Duration::from_millis(50),
        ..RetryPolicy::default()
    });

    let orchestrator = CrawlOrchestrator::new(
        wrap_store(store.clone()),
        sink_override.unwrap_or_else(|| sink.clone() as Arc<dyn ResultSink>),
        Arc::new(registry),
        monitor.clone(),
        retrier,
        BatchConfig {
            batch_size,
            max_workers,
            batch_pause: Duration::from_millis(10),
        },
    );

    Harness {
        orchestrator,
        store,
        sink,
        adapter,
        monitor,
    }
}

fn items(count: usize) -> Vec<WorkItem> {
    (0..count)
        .map(|i| WorkItem {
            id: format!("{i:03}"),
            name: format!("Item {i}"),
            primary_url: Some(format!("https://shop.example/p/{i}")),
            competitors: vec![CompetitorUrl {
                label: "rival".to_string(),
                url: format!("https://rival.example/p/{i}"),
            }],
        })
        .collect()
}

async fn messages(store: &InMemoryJobStore, job: &Job) -> Vec<String> {
    store
        .get_logs(job.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_twelve_items_run_in_three_batches() {
    let h = harness(5, 2, Duration::from_millis(20));

    let job = h
        .orchestrator
        .run("alice", "shop", Arc::new(StaticSource::new(items(12))))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.processed_items, 12);
    assert_eq!(job.total_items, 12);
    assert!(job.started_at.is_some() && job.completed_at.is_some());
    assert_eq!(job.result_location, Some(format!("memory://{}", job.id)));

    let log = messages(&h.store, &job).await;
    let batches: Vec<&String> = log.iter().filter(|m| m.starts_with("Processing batch")).collect();
    assert_eq!(
        batches,
        vec![
            "Processing batch 1/3 (5 items)",
            "Processing batch 2/3 (5 items)",
            "Processing batch 3/3 (2 items)",
        ]
    );
    assert!(log.iter().any(|m| m == "Progress: 12/12 items (100%)"));

    let mut results = h.sink.results(job.id).unwrap();
    results.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|r| r.is_success()));
    // The rival undercuts every primary listing by 1000
    assert!(results.iter().all(|r| r.inversions()[0].difference == 1_000));

    // One reclamation pass per batch
    assert_eq!(h.monitor.get_stats().reclaim_count, 3);

    let stats = h.orchestrator.get_stats(job.id).await.unwrap();
    assert_eq!(stats.success_count, 12);
    assert_eq!(stats.error_count, 0);
    assert_eq!(stats.memory_peak_mb, 256.0);
    assert!(stats.items_per_second > 0.0);
    assert!(h.orchestrator.active_jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_job_fails_without_batches() {
    let h = harness(5, 2, Duration::ZERO);

    let job = h
        .orchestrator
        .run("alice", "shop", Arc::new(StaticSource::new(Vec::new())))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("No work items to crawl"));
    assert!(job.completed_at.is_some());

    let log = messages(&h.store, &job).await;
    assert!(!log.iter().any(|m| m.starts_with("Processing batch")));
    assert_eq!(h.adapter.fetches.load(Ordering::SeqCst), 0);
    assert!(h.sink.results(job.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_site_fails() {
    let h = harness(5, 2, Duration::ZERO);
    let mut unknown = items(2);
    for item in &mut unknown {
        item.primary_url = Some("https://nowhere.example/p/1".to_string());
    }

    let job = h
        .orchestrator
        .run("alice", "nowhere", Arc::new(StaticSource::new(unknown)))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("No adapter available"));
}

#[tokio::test(start_paused = true)]
async fn test_site_resolved_by_first_url() {
    let h = harness(5, 2, Duration::ZERO);

    let job = h
        .orchestrator
        .run("alice", "some label", Arc::new(StaticSource::new(items(3))))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_after_current_batch() {
    let h = harness(5, 2, Duration::from_millis(100));

    let job = h
        .orchestrator
        .submit("alice", "shop", Arc::new(StaticSource::new(items(30))))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(h.orchestrator.active_jobs(), vec![job.id]);

    // Let the first batch finish
    let seen_at_cancel = loop {
        let status = h.orchestrator.get_status(job.id).await.unwrap();
        if status.processed_items >= 5 {
            break status.processed_items;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert!(h.orchestrator.cancel(job.id).await.unwrap());

    let finished = loop {
        let status = h.orchestrator.get_status(job.id).await.unwrap();
        if status.status.is_terminal() {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(finished.status, JobStatus::Cancelled);
    // At most the batch in flight when the cancel arrived completes
    assert!(finished.processed_items <= seen_at_cancel + 5);
    assert!(finished.processed_items < 30);

    // Nothing moves once the job is cancelled
    let fetches = h.adapter.fetches.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let later = h.orchestrator.get_status(job.id).await.unwrap();
    assert_eq!(later.status, JobStatus::Cancelled);
    assert_eq!(later.processed_items, finished.processed_items);
    assert_eq!(h.adapter.fetches.load(Ordering::SeqCst), fetches);

    let stored = h.orchestrator.get_job(job.id).await.unwrap();
    let results = h.sink.results(job.id).unwrap();
    assert_eq!(results.len() as u32, stored.processed_items);

    let log = messages(&h.store, &job).await;
    assert!(log.iter().any(|m| m.starts_with("Job cancelled after")));

    // Cancelling a finished job is a no-op
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h.orchestrator.cancel(job.id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_job_between_batches() {
    let h = harness(5, 2, Duration::from_millis(100));

    let job = h
        .orchestrator
        .submit("alice", "shop", Arc::new(StaticSource::new(items(20))))
        .await
        .unwrap();

    loop {
        let status = h.orchestrator.get_status(job.id).await.unwrap();
        if status.processed_items >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(h.orchestrator.pause(job.id).await.unwrap());

    let held = loop {
        let status = h.orchestrator.get_status(job.id).await.unwrap();
        if status.status == JobStatus::Paused {
            break status;
        }
        assert!(!status.status.is_terminal());
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(held.processed_items % 5, 0);
    assert!(held.processed_items < 20);

    // No batch starts while paused
    let fetches = h.adapter.fetches.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let still = h.orchestrator.get_status(job.id).await.unwrap();
    assert_eq!(still.status, JobStatus::Paused);
    assert_eq!(still.processed_items, held.processed_items);
    assert_eq!(h.adapter.fetches.load(Ordering::SeqCst), fetches);
    assert_eq!(h.orchestrator.active_jobs(), vec![job.id]);

    assert!(h.orchestrator.resume(job.id).await.unwrap());
    let finished = loop {
        let status = h.orchestrator.get_status(job.id).await.unwrap();
        if status.status.is_terminal() {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.processed_items, 20);

    let log = messages(&h.store, &job).await;
    assert!(log.iter().any(|m| m.starts_with("Job paused after")));
    assert!(log.iter().any(|m| m == "Job resumed"));

    // Finished jobs can no longer be paused
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h.orchestrator.pause(job.id).await.unwrap());
    assert!(!h.orchestrator.resume(job.id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_paused_job() {
    let h = harness(5, 2, Duration::from_millis(100));

    let job = h
        .orchestrator
        .submit("alice", "shop", Arc::new(StaticSource::new(items(20))))
        .await
        .unwrap();
    assert!(h.orchestrator.pause(job.id).await.unwrap());

    loop {
        let status = h.orchestrator.get_status(job.id).await.unwrap();
        if status.status == JobStatus::Paused {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(h.orchestrator.cancel(job.id).await.unwrap());

    let finished = loop {
        let status = h.orchestrator.get_status(job.id).await.unwrap();
        if status.status.is_terminal() {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.processed_items, 0);
    assert_eq!(h.adapter.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_seller_failures_are_recorded() {
    let h = harness(5, 2, Duration::ZERO);
    let mut list = items(2);
    list[0].competitors[0].url = "https://rival.example/broken".to_string();
    list[1].primary_url = Some("https://shop.example/broken".to_string());
    list[1].competitors.clear();

    let job = h
        .orchestrator
        .run("alice", "shop", Arc::new(StaticSource::new(list)))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let mut results = h.sink.results(job.id).unwrap();
    results.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    assert!(results[0].is_success());
    assert!(results[0].prices[1].error().unwrap().contains("bot detection"));
    assert_eq!(results[1].error.as_deref(), Some("all sellers failed"));

    let stats = h.orchestrator.get_stats(job.id).await.unwrap();
    assert_eq!((stats.success_count, stats.error_count), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_fails_job() {
    let h = harness_with(5, 2, Duration::ZERO, Some(Arc::new(BrokenSink)), |store| {
        store as Arc<dyn JobStore>
    });

    let job = h
        .orchestrator
        .run("alice", "shop", Arc::new(StaticSource::new(items(3))))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("disk full"));
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_mid_job_still_ends_failed() {
    let h = harness_with(5, 2, Duration::ZERO, None, |store| {
        Arc::new(FlakyStore {
            inner: store,
            saves: AtomicUsize::new(0),
            fail_on: 2,
        })
    });

    // Save 1 records the pending job, save 2 (job start) fails
    let job = h
        .orchestrator
        .submit("alice", "shop", Arc::new(StaticSource::new(items(3))))
        .await
        .unwrap();

    let mut finished = None;
    for _ in 0..100 {
        if h.orchestrator.active_jobs().is_empty() {
            finished = h.store.get_job(job.id).await.unwrap();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let finished = finished.unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.error_message.unwrap().contains("database unavailable"));
    assert!(finished.completed_at.is_some());
    assert!(!h.orchestrator.cancel(job.id).await.unwrap());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness(5, 2, Duration::ZERO);
    let id = uuid::Uuid::new_v4();
    assert!(h.orchestrator.get_status(id).await.is_err());
    assert!(h.orchestrator.cancel(id).await.is_err());
    assert!(h.orchestrator.pause(id).await.is_err());
    assert!(h.orchestrator.resume(id).await.is_err());
}
