//! Lookup table of supported sites
//!
//! Sites are keyed by name, with aliases and the hosts they serve. Every
//! adapter built by the registry is wrapped in the site's circuit breaker;
//! breakers live as long as the registry, so consecutive jobs against a
//! failing site keep failing fast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::fetcher::PageFetcher;
use super::profile::SiteProfile;
use super::{BreakerAdapter, SelectorAdapter, SiteAdapter};
use crate::resilience::breaker::{BreakerConfig, CircuitBreaker, CircuitState};

/// Builds a fresh adapter for a site
pub type AdapterBuilder = Arc<dyn Fn() -> Arc<dyn SiteAdapter> + Send + Sync>;

struct SiteEntry {
    key: String,
    aliases: Vec<String>,
    domains: Vec<String>,
    build: AdapterBuilder,
}

/// Registered sites and their circuit breakers
pub struct AdapterRegistry {
    entries: Vec<SiteEntry>,
    breaker_config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl AdapterRegistry {
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            entries: Vec::new(),
            breaker_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with one [`SelectorAdapter`] site per profile
    pub fn with_profiles(
        profiles: Vec<SiteProfile>,
        fetcher: PageFetcher,
        breaker_config: BreakerConfig,
    ) -> Self {
        let mut registry = Self::new(breaker_config);
        for profile in profiles {
            registry.register_profile(profile, fetcher.clone());
        }
        registry
    }

    /// Registers a site; a later registration under the same key wins
    pub fn register(
        &mut self,
        key: impl Into<String>,
        aliases: &[&str],
        domains: &[&str],
        build: AdapterBuilder,
    ) {
        let key = key.into().to_lowercase();
        self.entries.retain(|e| e.key != key);
        self.entries.push(SiteEntry {
            key,
            aliases: aliases.iter().map(|a| a.to_lowercase()).collect(),
            domains: domains.iter().map(|d| d.to_lowercase()).collect(),
            build,
        });
    }

    pub fn register_profile(&mut self, profile: SiteProfile, fetcher: PageFetcher) {
        let key = profile.name.clone();
        let aliases: Vec<String> = profile.aliases.clone();
        let domains: Vec<String> = profile.domains.clone();
        let build: AdapterBuilder = Arc::new(move || {
            let adapter = SelectorAdapter::new(profile.clone(), fetcher.clone());
            Arc::new(adapter) as Arc<dyn SiteAdapter>
        });

        let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
        let domains: Vec<&str> = domains.iter().map(String::as_str).collect();
        self.register(key, &aliases, &domains, build);
    }

    pub fn site_keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Site key for a job's site name: key, alias or domain, case-insensitive
    pub fn key_for_name(&self, name: &str) -> Option<&str> {
        let name = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|e| e.key == name || e.aliases.contains(&name) || e.domains.contains(&name))
            .map(|e| e.key.as_str())
    }

    /// Site key serving the host of `url`
    pub fn key_for_url(&self, url: &str) -> Option<&str> {
        let parsed = reqwest::Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_lowercase();

        self.entries
            .iter()
            .find(|e| {
                e.domains
                    .iter()
                    .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
            })
            .map(|e| e.key.as_str())
    }

    /// Builds a breaker-wrapped adapter for a site key
    pub fn build(&self, key: &str) -> Option<Arc<dyn SiteAdapter>> {
        let entry = self.entries.iter().find(|e| e.key == key)?;
        debug!("Building adapter for {}", key);
        let adapter = (entry.build)();
        Some(Arc::new(BreakerAdapter::new(adapter, self.breaker(key))))
    }

    /// Resolves the adapter for a job: by site name first, then by the URL
    pub fn resolve(
        &self,
        site_name: &str,
        first_url: Option<&str>,
    ) -> Option<(String, Arc<dyn SiteAdapter>)> {
        let key = self
            .key_for_name(site_name)
            .or_else(|| first_url.and_then(|url| self.key_for_url(url)))?
            .to_string();
        let adapter = self.build(&key)?;
        Some((key, adapter))
    }

    /// The breaker shared by every adapter of a site
    pub fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.breaker_config.clone())))
            .clone()
    }

    pub fn breaker_states(&self) -> Vec<(String, CircuitState)> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut states: Vec<_> = breakers
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
