//! Retry with exponential backoff and jitter

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{CrawlError, ErrorKind};

/// Retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,

    /// Wait after the first failure
    pub delay: Duration,

    /// Growth factor of the wait per attempt
    pub backoff: f64,

    /// Upper bound of the wait before jitter
    pub max_delay: Duration,

    /// Error kinds worth another attempt
    pub retryable: HashSet<ErrorKind>,

    /// Extra factor applied to the wait after a bot-detection failure
    pub bot_backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff: 2.0,
            max_delay: Duration::from_secs(30),
            retryable: [
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::BotDetected,
                ErrorKind::Parse,
                ErrorKind::PoolExhausted,
                ErrorKind::SessionDead,
            ]
            .into_iter()
            .collect(),
            bot_backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// `min(delay * backoff^(attempt - 1), max_delay)` for a 1-based attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.delay.as_secs_f64() * self.backoff.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Actual wait after `attempt` failed with `kind`
    pub fn wait_for(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let mut wait = self.backoff_delay(attempt).mul_f64(jitter());
        if kind == ErrorKind::BotDetected {
            wait = wait.mul_f64(self.bot_backoff_multiplier);
        }
        wait
    }
}

/// Uniform factor in [0.5, 1.0)
fn jitter() -> f64 {
    0.5 + 0.5 * fastrand::f64()
}

/// Errors that can tell the retrier what kind of failure they are
pub trait Classified {
    fn kind(&self) -> ErrorKind;
}

impl Classified for CrawlError {
    fn kind(&self) -> ErrorKind {
        CrawlError::kind(self)
    }
}

/// Final failure of a retried operation
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; carries the last one
    #[error("failed after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    /// A non-retryable error ended the loop early
    #[error(transparent)]
    Permanent(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Permanent(e) => e,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Permanent(e) => e,
        }
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `op` with the 1-based attempt number until it succeeds, fails
    /// with a non-retryable error or runs out of attempts
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classified + Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let kind = err.kind();
            if !self.policy.is_retryable(kind) {
                return Err(RetryError::Permanent(err));
            }

            if attempt >= max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, err);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            let wait = self.policy.wait_for(attempt, kind);
            debug!(
                "Attempt {}/{} failed ({}), retrying in {:?}",
                attempt, max_attempts, err, wait
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let retrier = Retrier::new(fast_policy());
        let calls = AtomicU32::new(0);

        let result = retrier
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(CrawlError::Network(format!("reset #{attempt}")))
                    } else {
                        Ok(attempt * 10)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let retrier = Retrier::new(fast_policy());
        let calls = AtomicU32::new(0);

        let err = retrier
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(CrawlError::Timeout(format!("attempt {attempt}"))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match &err {
            RetryError::Exhausted { attempts, source } => {
                assert_eq!(*attempts, 3);
                assert_eq!(source.to_string(), "timed out: attempt 3");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(err.into_inner().kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let retrier = Retrier::new(fast_policy());
        let calls = AtomicU32::new(0);

        let err = retrier
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CrawlError::SoldOut("품절".to_string())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::Permanent(CrawlError::SoldOut(_))));
    }

    #[test]
    fn test_backoff_growth_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(500), Duration::from_secs(30));
    }

    #[test]
    fn test_jittered_wait_range() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let wait = policy.wait_for(2, ErrorKind::Network);
            assert!(wait >= Duration::from_secs(1) && wait < Duration::from_secs(2));

            let bot = policy.wait_for(2, ErrorKind::BotDetected);
            assert!(bot >= Duration::from_secs(2) && bot < Duration::from_secs(4));
        }
    }

    #[test]
    fn test_default_retryable_kinds() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(ErrorKind::Parse));
        assert!(policy.is_retryable(ErrorKind::SessionDead));
        assert!(!policy.is_retryable(ErrorKind::CircuitOpen));
        assert!(!policy.is_retryable(ErrorKind::SoldOut));
        assert!(!policy.is_retryable(ErrorKind::PoolClosed));
    }
}
