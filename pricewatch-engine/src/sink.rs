//! Result persistence
//!
//! A [`ResultSink`] renders the results of a finished job and returns where
//! they went. [`JsonReportSink`] writes one report file per job with two
//! sections: every item result, and the items where a competitor sells
//! strictly cheaper than the primary seller.

use anyhow::Context;
use async_trait::async_trait;
use pricewatch_core::domain::item::ItemResult;
use pricewatch_core::domain::job::Job;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

/// Destination of finished job results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persists `results` and returns their location
    async fn persist(&self, job: &Job, results: &[ItemResult]) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    job_id: Uuid,
    site_name: &'a str,
    generated_at: chrono::DateTime<chrono::Utc>,
    total_items: usize,
    success_count: usize,
    all_results: &'a [ItemResult],
    price_inversions: Vec<InversionRow<'a>>,
}

/// A competitor cheaper than the primary seller
#[derive(Debug, Serialize)]
struct InversionRow<'a> {
    item_id: &'a str,
    item_name: &'a str,
    primary_url: Option<&'a str>,
    primary_total: Option<i64>,
    competitor: &'a str,
    competitor_url: &'a str,
    competitor_total: Option<i64>,
    difference: i64,
}

fn inversion_rows(results: &[ItemResult]) -> Vec<InversionRow<'_>> {
    results
        .iter()
        .flat_map(|result| {
            let primary = result.primary();
            result
                .inversions()
                .into_iter()
                .map(move |inversion| InversionRow {
                    item_id: &result.item_id,
                    item_name: &result.item_name,
                    primary_url: primary.map(|p| p.url()),
                    primary_total: primary.and_then(|p| p.total()),
                    competitor: inversion.competitor.seller(),
                    competitor_url: inversion.competitor.url(),
                    competitor_total: inversion.competitor.total(),
                    difference: inversion.difference,
                })
        })
        .collect()
}

/// Writes `<dir>/<site>_prices_<timestamp>.json`
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(job: &Job, at: chrono::DateTime<chrono::Utc>) -> String {
        let site: String = job
            .site_name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}_prices_{}.json", site, at.format("%Y%m%d_%H%M%S"))
    }
}

#[async_trait]
impl ResultSink for JsonReportSink {
    async fn persist(&self, job: &Job, results: &[ItemResult]) -> anyhow::Result<String> {
        let now = chrono::Utc::now();
        let report = Report {
            job_id: job.id,
            site_name: &job.site_name,
            generated_at: now,
            total_items: results.len(),
            success_count: results.iter().filter(|r| r.is_success()).count(),
            all_results: results,
            price_inversions: inversion_rows(results),
        };

        let json = serde_json::to_vec_pretty(&report).context("Failed to serialize report")?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.dir.join(Self::file_name(job, now));
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(
            "Wrote {} results ({} inversions) to {}",
            report.total_items,
            report.price_inversions.len(),
            path.display()
        );
        Ok(path.display().to_string())
    }
}

/// Keeps results in memory; for embedding and tests
#[derive(Clone, Default)]
pub struct MemorySink {
    persisted: Arc<Mutex<Vec<(Uuid, Vec<ItemResult>)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self, job_id: Uuid) -> Option<Vec<ItemResult>> {
        let persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        persisted
            .iter()
            .find(|(id, _)| *id == job_id)
            .map(|(_, results)| results.clone())
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, job: &Job, results: &[ItemResult]) -> anyhow::Result<String> {
        let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        persisted.push((job.id, results.to_vec()));
        Ok(format!("memory://{}", job.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricewatch_core::domain::item::{CompetitorUrl, PRIMARY_SELLER, WorkItem};
    use pricewatch_core::domain::price::{PriceResult, ShippingStatus};

    fn item(id: &str) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            name: format!("Item {id}"),
            primary_url: Some(format!("https://gs.example/{id}")),
            competitors: vec![CompetitorUrl {
                label: "cj".to_string(),
                url: format!("https://cj.example/{id}"),
            }],
        }
    }

    fn price(seller: &str, url: &str, amount: i64, fee: i64) -> PriceResult {
        let shipping = if fee > 0 {
            ShippingStatus::Paid
        } else {
            ShippingStatus::Free
        };
        PriceResult::new(seller, url, Some(amount), Some(fee), shipping)
    }

    #[tokio::test]
    async fn test_report_lists_inversions() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonReportSink::new(dir.path().join("results"));
        let job = Job::new("alice", "gs shop");

        let cheaper = ItemResult::new(
            &item("1"),
            vec![
                price(PRIMARY_SELLER, "https://gs.example/1", 10_000, 2_500),
                price("cj", "https://cj.example/1", 11_000, 0),
            ],
        );
        let pricier = ItemResult::new(
            &item("2"),
            vec![
                price(PRIMARY_SELLER, "https://gs.example/2", 10_000, 0),
                price("cj", "https://cj.example/2", 12_000, 0),
            ],
        );
        let failed = ItemResult::failed(&item("3"), "all sellers failed");

        let location = sink.persist(&job, &[cheaper, pricier, failed]).await.unwrap();
        assert!(location.contains("gs_shop_prices_"));
        assert!(location.ends_with(".json"));

        let report: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&location).unwrap()).unwrap();
        assert_eq!(report["total_items"], 3);
        assert_eq!(report["success_count"], 2);
        assert_eq!(report["all_results"].as_array().unwrap().len(), 3);

        let inversions = report["price_inversions"].as_array().unwrap();
        assert_eq!(inversions.len(), 1);
        assert_eq!(inversions[0]["item_id"], "1");
        assert_eq!(inversions[0]["competitor"], "cj");
        assert_eq!(inversions[0]["difference"], 1_500);
    }

    #[tokio::test]
    async fn test_unwritable_directory_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        // A regular file cannot hold a directory
        let sink = JsonReportSink::new(file.path().join("results"));
        let err = sink.persist(&Job::new("a", "gs"), &[]).await.unwrap_err();
        assert!(err.to_string().contains("Failed to create"));
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_results() {
        let sink = MemorySink::new();
        let job = Job::new("a", "gs");
        let location = sink
            .persist(&job, &[ItemResult::failed(&item("1"), "x")])
            .await
            .unwrap();
        assert_eq!(location, format!("memory://{}", job.id));
        assert_eq!(sink.results(job.id).unwrap().len(), 1);
    }
}
