//! Runtime statistics of a running job

use pricewatch_core::domain::item::ItemResult;
use pricewatch_core::dto::job::JobStats;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

/// Counters updated by the job task and read by status queries
#[derive(Default)]
pub struct JobStatsTracker {
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    total_items: u32,
    processed_items: u32,
    success_count: u32,
    error_count: u32,
    started: Option<Instant>,
    finished: Option<Instant>,
    memory_peak_mb: f64,
}

impl JobStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, total_items: u32) {
        let mut state = self.lock();
        state.total_items = total_items;
        state.started = Some(Instant::now());
    }

    /// Counts the results of one finished batch
    pub fn record(&self, results: &[ItemResult]) {
        let mut state = self.lock();
        for result in results {
            state.processed_items += 1;
            if result.is_success() {
                state.success_count += 1;
            } else {
                state.error_count += 1;
            }
        }
    }

    pub fn record_memory(&self, rss_mb: f64) {
        let mut state = self.lock();
        state.memory_peak_mb = state.memory_peak_mb.max(rss_mb);
    }

    /// Freezes elapsed time
    pub fn finish(&self) {
        self.lock().finished.get_or_insert_with(Instant::now);
    }

    pub fn snapshot(&self) -> JobStats {
        let state = self.lock();
        let elapsed = match (state.started, state.finished) {
            (Some(started), Some(finished)) => finished.duration_since(started),
            (Some(started), None) => started.elapsed(),
            _ => Default::default(),
        };
        let elapsed_seconds = elapsed.as_secs_f64();
        let items_per_second = if elapsed_seconds > 0.0 {
            f64::from(state.processed_items) / elapsed_seconds
        } else {
            0.0
        };

        JobStats {
            total_items: state.total_items,
            processed_items: state.processed_items,
            success_count: state.success_count,
            error_count: state.error_count,
            elapsed_seconds,
            items_per_second,
            memory_peak_mb: state.memory_peak_mb,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricewatch_core::domain::item::WorkItem;
    use pricewatch_core::domain::price::{PriceResult, ShippingStatus};
    use std::time::Duration;

    fn item() -> WorkItem {
        WorkItem {
            id: "1".to_string(),
            name: "Kettle".to_string(),
            primary_url: Some("https://a.example/1".to_string()),
            competitors: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_and_throughput() {
        let tracker = JobStatsTracker::new();
        tracker.start(4);

        let ok = ItemResult::new(
            &item(),
            vec![PriceResult::new("primary", "u", Some(1000), Some(0), ShippingStatus::Free)],
        );
        let failed = ItemResult::failed(&item(), "all sellers failed");
        tracker.record(&[ok.clone(), ok, failed]);
        tracker.record_memory(120.0);
        tracker.record_memory(80.0);

        tokio::time::advance(Duration::from_secs(2)).await;
        tracker.finish();
        tokio::time::advance(Duration::from_secs(10)).await;

        let stats = tracker.snapshot();
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.processed_items, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.memory_peak_mb, 120.0);
        assert_eq!(stats.elapsed_seconds, 2.0);
        assert_eq!(stats.items_per_second, 1.5);
    }

    #[test]
    fn test_not_started_is_zero() {
        let stats = JobStatsTracker::new().snapshot();
        assert_eq!(stats, JobStats::default());
    }
}
