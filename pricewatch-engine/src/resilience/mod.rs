//! Retry and circuit breaking around per-page operations

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitOpenError, CircuitState};
pub use retry::{Retrier, RetryError, RetryPolicy};
