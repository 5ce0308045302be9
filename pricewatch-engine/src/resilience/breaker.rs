//! Three-state circuit breaker
//!
//! ```text
//! Closed --(failure_threshold consecutive failures)--> Open
//! Open --(recovery_timeout since last failure)--> HalfOpen
//! HalfOpen --(half_open_requests consecutive successes)--> Closed
//! HalfOpen --(any failure)--> Open
//! ```
//!
//! While half-open only one probe call runs at a time; concurrent calls fail
//! fast as if the circuit were open.

use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker thresholds
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_requests: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Returned without calling the operation while the circuit is open
#[derive(Debug, Clone, Error)]
#[error("circuit open for {name}")]
pub struct CircuitOpenError {
    pub name: String,
}

/// Circuit breaker around calls to one remote target
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    probe_in_flight: bool,
}

/// Clears the half-open probe slot if the probe is abandoned mid-flight
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_successes: 0,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Runs `op`, counting every error as a failure
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.call_with(op, |_| true).await
    }

    /// Runs `op`, counting only errors for which `is_failure` holds
    ///
    /// Other errors are passed through and count as a healthy response.
    pub async fn call_with<T, E, F, Fut>(
        &self,
        op: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        let probing = self.admit()?;
        let mut slot = ProbeSlot {
            breaker: self,
            armed: probing,
        };

        let result = op().await;
        slot.armed = false;

        match &result {
            Err(e) if is_failure(e) => self.record_failure(),
            _ => self.record_success(),
        }
        result
    }

    fn admit(&self) -> Result<bool, CircuitOpenError> {
        let mut state = self.lock();

        if state.state == CircuitState::Open {
            let recovered = state
                .last_failure
                .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);
            if !recovered {
                return Err(self.open_error());
            }
            info!("Circuit {} half-open, probing", self.name);
            state.state = CircuitState::HalfOpen;
            state.half_open_successes = 0;
        }

        match state.state {
            CircuitState::Closed => Ok(false),
            _ if state.probe_in_flight => Err(self.open_error()),
            _ => {
                state.probe_in_flight = true;
                Ok(true)
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        state.probe_in_flight = false;

        match state.state {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.half_open_requests {
                    info!("Circuit {} closed", self.name);
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.half_open_successes = 0;
                }
            }
            // Tripped by a concurrent call while this one was running
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.probe_in_flight = false;
        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                warn!("Circuit {} re-opened: probe failed", self.name);
                state.state = CircuitState::Open;
                state.half_open_successes = 0;
            }
            CircuitState::Closed if state.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    "Circuit {} opened after {} consecutive failures",
                    self.name, state.consecutive_failures
                );
                state.state = CircuitState::Open;
            }
            _ => {}
        }
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
