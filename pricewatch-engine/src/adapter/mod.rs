//! Site adapters
//!
//! A [`SiteAdapter`] knows how to fetch a shop's product page and read the
//! price out of it. Adapters are resolved through the
//! [`registry::AdapterRegistry`] and cached per worker by
//! [`cache::AdapterCache`].

pub mod cache;
pub mod fetcher;
pub mod profile;
pub mod registry;

use async_trait::async_trait;
use pricewatch_core::domain::price::PriceResult;
use std::sync::Arc;

use crate::error::{CrawlError, CrawlResult};
use crate::resilience::breaker::CircuitBreaker;
use fetcher::PageFetcher;
use profile::{CompiledProfile, SiteProfile};

/// Fetches and reads product pages of one site
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether pages only render in a browser
    fn requires_browser(&self) -> bool;

    /// Returns the page markup for `url`
    async fn fetch(&self, url: &str) -> CrawlResult<String>;

    /// Reads the price from markup; pure and synchronous
    fn extract(&self, markup: &str, url: &str) -> CrawlResult<PriceResult>;

    /// Releases per-adapter resources
    async fn close(&self) {}
}

/// Fetch followed by extract
pub async fn crawl_price(adapter: &dyn SiteAdapter, url: &str) -> CrawlResult<PriceResult> {
    let markup = adapter.fetch(url).await?;
    adapter.extract(&markup, url)
}

/// Adapter driven by a [`SiteProfile`]
pub struct SelectorAdapter {
    profile: CompiledProfile,
    fetcher: PageFetcher,
}

impl SelectorAdapter {
    pub fn new(profile: SiteProfile, fetcher: PageFetcher) -> Self {
        Self {
            profile: CompiledProfile::new(profile),
            fetcher,
        }
    }
}

#[async_trait]
impl SiteAdapter for SelectorAdapter {
    fn name(&self) -> &str {
        &self.profile.profile().name
    }

    fn requires_browser(&self) -> bool {
        self.profile.profile().requires_browser
    }

    async fn fetch(&self, url: &str) -> CrawlResult<String> {
        self.fetcher.fetch(url, self.profile.profile()).await
    }

    fn extract(&self, markup: &str, url: &str) -> CrawlResult<PriceResult> {
        self.profile.extract(markup, url)
    }
}

/// Routes an adapter's fetches through the site's circuit breaker
///
/// Only failures that say something about the site's health count against
/// the breaker.
pub struct BreakerAdapter {
    inner: Arc<dyn SiteAdapter>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerAdapter {
    pub fn new(inner: Arc<dyn SiteAdapter>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl SiteAdapter for BreakerAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn requires_browser(&self) -> bool {
        self.inner.requires_browser()
    }

    async fn fetch(&self, url: &str) -> CrawlResult<String> {
        self.breaker
            .call_with(|| self.inner.fetch(url), CrawlError::trips_breaker)
            .await
    }

    fn extract(&self, markup: &str, url: &str) -> CrawlResult<PriceResult> {
        self.inner.extract(markup, url)
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
