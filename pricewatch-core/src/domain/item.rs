//! Work item and per-item result types

use serde::{Deserialize, Serialize};

use crate::domain::price::PriceResult;

/// Seller label used for an item's primary URL
pub const PRIMARY_SELLER: &str = "primary";

/// One product to price: the primary listing plus competitor listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub name: String,
    pub primary_url: Option<String>,
    #[serde(default)]
    pub competitors: Vec<CompetitorUrl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitorUrl {
    pub label: String,
    pub url: String,
}

impl WorkItem {
    /// Every (seller, url) pair to crawl, primary first
    pub fn targets(&self) -> Vec<(&str, &str)> {
        let mut targets = Vec::with_capacity(self.competitors.len() + 1);
        if let Some(url) = self.primary_url.as_deref().filter(|u| !u.is_empty()) {
            targets.push((PRIMARY_SELLER, url));
        }
        for competitor in &self.competitors {
            if !competitor.url.is_empty() {
                targets.push((competitor.label.as_str(), competitor.url.as_str()));
            }
        }
        targets
    }
}

/// Aggregated prices for one work item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: String,
    pub item_name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub prices: Vec<PriceResult>,
    /// Set when the item as a whole produced no usable price
    pub error: Option<String>,
}

/// A competitor selling strictly cheaper than the primary seller
#[derive(Debug, Clone, Serialize)]
pub struct PriceInversion<'a> {
    pub competitor: &'a PriceResult,
    /// Primary total minus competitor total, always positive
    pub difference: i64,
}

impl ItemResult {
    pub fn new(item: &WorkItem, prices: Vec<PriceResult>) -> Self {
        let error = if prices.is_empty() {
            Some("no URLs to crawl".to_string())
        } else if prices.iter().all(|p| p.error().is_some()) {
            Some("all sellers failed".to_string())
        } else {
            None
        };

        Self {
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            timestamp: chrono::Utc::now(),
            prices,
            error,
        }
    }

    pub fn failed(item: &WorkItem, error: impl Into<String>) -> Self {
        Self {
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            timestamp: chrono::Utc::now(),
            prices: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn primary(&self) -> Option<&PriceResult> {
        self.prices.iter().find(|p| p.seller() == PRIMARY_SELLER)
    }

    /// Competitors whose total is strictly lower than the primary seller's
    pub fn inversions(&self) -> Vec<PriceInversion<'_>> {
        let Some(primary_total) = self.primary().and_then(|p| p.total()) else {
            return Vec::new();
        };

        self.prices
            .iter()
            .filter(|p| p.seller() != PRIMARY_SELLER)
            .filter_map(|p| {
                let total = p.total()?;
                (total < primary_total).then_some(PriceInversion {
                    competitor: p,
                    difference: primary_total - total,
                })
            })
            .collect()
    }
}
