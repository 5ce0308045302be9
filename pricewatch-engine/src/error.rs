//! Error types for the crawling engine
//!
//! [`CrawlError`] covers everything that can go wrong while fetching or
//! extracting a single page. [`EngineError`] covers job-level operations.

use pricewatch_core::domain::job::TransitionError;
use thiserror::Error;
use uuid::Uuid;

use crate::resilience::breaker::CircuitOpenError;
use crate::session::is_session_dead_message;

/// Result type alias for per-page operations
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Classification of a [`CrawlError`], used by retry and breaker policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    BotDetected,
    Parse,
    PoolExhausted,
    PoolClosed,
    CircuitOpen,
    SessionDead,
    SoldOut,
    InvalidInput,
    Unsupported,
}

/// Errors that can occur while crawling a single page
#[derive(Debug, Clone, Error)]
pub enum CrawlError {
    /// Connection or HTTP level failure
    #[error("network error: {0}")]
    Network(String),

    /// Request or navigation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Page looks like a bot challenge rather than the product page
    #[error("bot detection suspected: {0}")]
    BotDetected(String),

    /// Page loaded but no price could be extracted
    #[error("failed to parse page: {0}")]
    Parse(String),

    /// No session became available within the acquire timeout
    #[error("no browser session available within {0:?}")]
    PoolExhausted(std::time::Duration),

    /// The session pool has been shut down
    #[error("session pool is shut down")]
    PoolClosed,

    /// The circuit breaker for the site is open
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    /// The browser session behind the handle died
    #[error("browser session is dead: {0}")]
    SessionDead(String),

    /// The product is sold out or no longer listed
    #[error("sold out: {0}")]
    SoldOut(String),

    /// The URL or request is malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No adapter can handle the site
    #[error("unsupported site: {0}")]
    Unsupported(String),
}

impl CrawlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::Network(_) => ErrorKind::Network,
            CrawlError::Timeout(_) => ErrorKind::Timeout,
            CrawlError::BotDetected(_) => ErrorKind::BotDetected,
            CrawlError::Parse(_) => ErrorKind::Parse,
            CrawlError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            CrawlError::PoolClosed => ErrorKind::PoolClosed,
            CrawlError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            CrawlError::SessionDead(_) => ErrorKind::SessionDead,
            CrawlError::SoldOut(_) => ErrorKind::SoldOut,
            CrawlError::InvalidInput(_) => ErrorKind::InvalidInput,
            CrawlError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Builds an error from a remote driver message, recognizing dead sessions
    pub fn from_driver_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_session_dead_message(&message) {
            CrawlError::SessionDead(message)
        } else {
            CrawlError::Network(message)
        }
    }

    /// Whether this failure says something about the health of the remote site
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::BotDetected
                | ErrorKind::SessionDead
        )
    }
}

impl From<reqwest::Error> for CrawlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CrawlError::Timeout(err.to_string())
        } else if err.is_builder() {
            CrawlError::InvalidInput(err.to_string())
        } else {
            CrawlError::from_driver_message(err.to_string())
        }
    }
}

impl From<CircuitOpenError> for CrawlError {
    fn from(err: CircuitOpenError) -> Self {
        CrawlError::CircuitOpen(err.name)
    }
}

/// Errors returned by job-level engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error(transparent)]
    InvalidState(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_message_classification() {
        let dead = CrawlError::from_driver_message("invalid session id: session deleted");
        assert_eq!(dead.kind(), ErrorKind::SessionDead);

        let other = CrawlError::from_driver_message("element not interactable");
        assert_eq!(other.kind(), ErrorKind::Network);
    }

    #[test]
    fn test_breaker_relevant_kinds() {
        assert!(CrawlError::Timeout("navigate".into()).trips_breaker());
        assert!(CrawlError::BotDetected("short page".into()).trips_breaker());
        assert!(!CrawlError::Parse("no price".into()).trips_breaker());
        assert!(!CrawlError::SoldOut("품절".into()).trips_breaker());
        assert!(!CrawlError::CircuitOpen("gs".into()).trips_breaker());
    }

    #[test]
    fn test_circuit_open_conversion() {
        let err: CrawlError = CircuitOpenError {
            name: "ssg".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
        assert_eq!(err.to_string(), "circuit open for ssg");
    }
}
