//! Per-worker adapter cache
//!
//! Each batch worker owns one cache for its lifetime and resolves one
//! adapter per distinct target site. URLs on hosts the registry does not
//! know are crawled with the job's adapter.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::SiteAdapter;
use super::registry::AdapterRegistry;

pub struct AdapterCache {
    registry: Arc<AdapterRegistry>,
    fallback: Arc<dyn SiteAdapter>,
    by_site: HashMap<String, Arc<dyn SiteAdapter>>,
}

impl AdapterCache {
    /// Creates a cache seeded with the job's adapter under its site key
    pub fn new(
        registry: Arc<AdapterRegistry>,
        job_site: &str,
        job_adapter: Arc<dyn SiteAdapter>,
    ) -> Self {
        let mut by_site = HashMap::new();
        by_site.insert(job_site.to_string(), Arc::clone(&job_adapter));
        Self {
            registry,
            fallback: job_adapter,
            by_site,
        }
    }

    /// Adapter for the site serving `url`
    pub fn adapter_for(&mut self, url: &str) -> Arc<dyn SiteAdapter> {
        let Some(key) = self.registry.key_for_url(url) else {
            return Arc::clone(&self.fallback);
        };

        if let Some(adapter) = self.by_site.get(key) {
            return Arc::clone(adapter);
        }

        match self.registry.build(key) {
            Some(adapter) => {
                debug!("Worker resolved adapter {} for {}", key, url);
                self.by_site.insert(key.to_string(), Arc::clone(&adapter));
                adapter
            }
            None => Arc::clone(&self.fallback),
        }
    }

    pub fn len(&self) -> usize {
        self.by_site.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_site.is_empty()
    }

    /// Closes every adapter this worker resolved
    ///
    /// The job adapter is shared with other workers and stays open.
    pub async fn close(self) {
        for (site, adapter) in self.by_site {
            if Arc::ptr_eq(&adapter, &self.fallback) {
                continue;
            }
            debug!("Closing adapter {}", site);
            adapter.close().await;
        }
    }
}
