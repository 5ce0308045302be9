//! Page fetching over plain HTTP or a pooled browser session

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tracing::debug;

use super::profile::SiteProfile;
use crate::config::FetchConfig;
use crate::error::{CrawlError, CrawlResult};
use crate::session::pool::SessionPool;

/// Fetches rendered markup for site adapters
///
/// Sites that do not need a browser are tried over HTTP first; an incomplete
/// or failed HTTP fetch falls back to a browser session when a pool is set.
#[derive(Clone)]
pub struct PageFetcher {
    http: reqwest::Client,
    pool: Option<SessionPool>,
    config: FetchConfig,
}

impl PageFetcher {
    pub fn new(config: FetchConfig, pool: Option<SessionPool>) -> CrawlResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| CrawlError::InvalidInput(format!("HTTP client: {}", e)))?;

        Ok(Self { http, pool, config })
    }

    pub fn has_browser(&self) -> bool {
        self.pool.is_some()
    }

    pub async fn fetch(&self, url: &str, profile: &SiteProfile) -> CrawlResult<String> {
        check_url(url)?;

        if !profile.requires_browser {
            let result = self
                .fetch_http(url)
                .await
                .and_then(|markup| check_markup(markup, profile));

            match (result, &self.pool) {
                (Ok(markup), _) => return Ok(markup),
                (Err(e), None) => return Err(e),
                (Err(e), Some(_)) => {
                    debug!("HTTP fetch of {} failed ({}), using a browser", url, e);
                }
            }
        }

        self.fetch_browser(url, profile).await
    }

    async fn fetch_http(&self, url: &str) -> CrawlResult<String> {
        let response = self.http.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CrawlError::BotDetected(format!("HTTP {} from {}", status, url)));
        }
        if !status.is_success() {
            return Err(CrawlError::Network(format!("HTTP {} from {}", status, url)));
        }

        Ok(response.text().await?)
    }

    async fn fetch_browser(&self, url: &str, profile: &SiteProfile) -> CrawlResult<String> {
        let Some(pool) = &self.pool else {
            return Err(CrawlError::Unsupported(format!(
                "{} needs a browser but no session pool is configured",
                profile.name
            )));
        };

        let mut session = pool.acquire(self.config.acquire_timeout).await?;
        let deadline = self.config.navigate_timeout + profile.settle;

        let markup = match tokio::time::timeout(deadline, session.navigate(url, profile.settle))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                // The browser may still be busy with the abandoned navigation
                session.mark_dead();
                return Err(CrawlError::Timeout(format!("navigating to {}", url)));
            }
        };
        drop(session);

        check_markup(markup, profile)
    }
}

fn check_url(url: &str) -> CrawlResult<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| CrawlError::InvalidInput(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CrawlError::InvalidInput(format!(
            "unsupported scheme {} in {}",
            other, url
        ))),
    }
}

/// Rejects pages too short to be a product page
fn check_markup(markup: String, profile: &SiteProfile) -> CrawlResult<String> {
    if markup.len() < profile.min_markup_bytes {
        return Err(CrawlError::BotDetected(format!(
            "page is only {} bytes",
            markup.len()
        )));
    }
    Ok(markup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::profile::DEFAULT_MIN_MARKUP_BYTES;
    use crate::error::ErrorKind;
    use crate::session::pool::PoolConfig;
    use crate::session::testing::FakeFactory;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn profile() -> SiteProfile {
        SiteProfile {
            settle: Duration::ZERO,
            ..SiteProfile::new("fake")
        }
    }

    #[test]
    fn test_url_validation() {
        assert!(check_url("https://www.gsshop.com/prd/1").is_ok());
        assert_eq!(
            check_url("not a url").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            check_url("ftp://files.example/x").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_short_markup_is_bot_detection() {
        let err = check_markup("<html></html>".to_string(), &profile()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BotDetected);

        let long = "x".repeat(DEFAULT_MIN_MARKUP_BYTES);
        assert!(check_markup(long, &profile()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_fetch_goes_through_pool() {
        let factory = FakeFactory::new("x".repeat(DEFAULT_MIN_MARKUP_BYTES));
        let pool = SessionPool::new(PoolConfig::default(), factory.clone());
        let fetcher = PageFetcher::new(FetchConfig::default(), Some(pool.clone())).unwrap();

        let markup = fetcher.fetch("https://shop.example/1", &profile()).await.unwrap();
        assert!(markup.contains("https://shop.example/1"));
        assert_eq!(factory.counters.navigations.load(Ordering::SeqCst), 1);

        // Session went back to the pool
        assert_eq!(pool.stats().pool_size, 1);
        assert_eq!(pool.stats().current_active, 0);
    }

    #[tokio::test]
    async fn test_browser_required_without_pool() {
        let fetcher = PageFetcher::new(FetchConfig::default(), None).unwrap();
        let err = fetcher.fetch("https://shop.example/1", &profile()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
