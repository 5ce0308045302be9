//! Batch execution
//!
//! A batch is drained by a small pool of workers sharing one queue. Each
//! worker owns an [`AdapterCache`] for its lifetime and closes it when the
//! queue is empty, so adapters never outlive the batch that built them.
//! Results are reported in completion order.

use pricewatch_core::domain::item::{ItemResult, WorkItem};
use pricewatch_core::domain::price::PriceResult;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::cache::AdapterCache;
use crate::adapter::registry::AdapterRegistry;
use crate::adapter::{SiteAdapter, crawl_price};
use crate::resilience::retry::Retrier;

/// Everything a worker needs, shared by all workers of a job
#[derive(Clone)]
pub struct BatchContext {
    pub registry: Arc<AdapterRegistry>,
    pub site_key: String,
    pub job_adapter: Arc<dyn SiteAdapter>,
    pub retrier: Retrier,
    pub max_workers: usize,
}

/// Crawls `items` with at most `max_workers` in parallel
///
/// Workers stop taking new items once `cancel` fires; items already being
/// crawled finish.
pub async fn run_batch(
    ctx: &BatchContext,
    items: Vec<WorkItem>,
    cancel: &CancellationToken,
) -> Vec<ItemResult> {
    let workers = ctx.max_workers.max(1).min(items.len());
    let expected = items.len();
    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut set = JoinSet::new();
    for worker_id in 0..workers {
        let ctx = ctx.clone();
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        let cancel = cancel.clone();
        set.spawn(async move { worker(worker_id, ctx, queue, tx, cancel).await });
    }
    drop(tx);

    let mut results = Vec::with_capacity(expected);
    while let Some(result) = rx.recv().await {
        results.push(result);
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            warn!("Batch worker panicked: {}", e);
        }
    }

    results
}

async fn worker(
    worker_id: usize,
    ctx: BatchContext,
    queue: Arc<Mutex<VecDeque<WorkItem>>>,
    tx: mpsc::UnboundedSender<ItemResult>,
    cancel: CancellationToken,
) {
    let mut cache = AdapterCache::new(
        Arc::clone(&ctx.registry),
        &ctx.site_key,
        Arc::clone(&ctx.job_adapter),
    );

    loop {
        if cancel.is_cancelled() {
            debug!("Worker {} stopping on cancellation", worker_id);
            break;
        }
        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let Some(item) = next else {
            break;
        };

        let result = crawl_item(&mut cache, &ctx.retrier, &item).await;
        if tx.send(result).is_err() {
            break;
        }
    }

    debug!("Worker {} closing {} adapters", worker_id, cache.len());
    cache.close().await;
}

/// Crawls every target of one item; a failing seller becomes an error result
pub async fn crawl_item(
    cache: &mut AdapterCache,
    retrier: &Retrier,
    item: &WorkItem,
) -> ItemResult {
    let mut prices = Vec::new();

    for (seller, url) in item.targets() {
        let adapter = cache.adapter_for(url);
        let outcome = retrier.run(|_| crawl_price(adapter.as_ref(), url)).await;

        let price = match outcome {
            Ok(price) => price.with_seller(seller),
            Err(e) => {
                let err = e.into_inner();
                debug!("Item {} seller {} failed: {}", item.id, seller, err);
                PriceResult::failed(seller, url, err.to_string())
            }
        };
        prices.push(price);
    }

    ItemResult::new(item, prices)
}
