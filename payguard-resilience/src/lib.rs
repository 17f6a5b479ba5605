//! Circuit breaker protecting calls to external dependencies.
//!
//! Prevents a failing dependency (payment backend, threat intel, identity
//! registry, notification transport) from consuming request tasks. Each
//! dependency gets its own breaker instance; breaker state is per-process.
//!
//! States:
//! - `Closed`: calls pass through, consecutive failures are counted.
//! - `Open`: calls short-circuit until the reset timeout elapses.
//! - `HalfOpen`: exactly one probe call is allowed through; success closes
//!   the circuit, failure re-opens it with a fresh timestamp.

#![warn(missing_docs, clippy::pedantic)]

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; failures are counted.
    Closed,
    /// Circuit is tripped; calls fail immediately.
    Open,
    /// Trial period; a single probe call is allowed through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Breaker tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a half-open probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; no underlying call was issued.
    #[error("circuit `{name}` is open; retry after {retry_after:?}")]
    Open {
        /// Breaker name for diagnostics.
        name: String,
        /// Time remaining until a probe will be admitted.
        retry_after: Duration,
    },
    /// The underlying call executed and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` when the call was short-circuited by an open circuit.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Point-in-time view of a breaker for health reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Breaker name.
    pub name: String,
    /// Effective state (an open circuit past its timeout reports half-open).
    pub state: CircuitState,
    /// Consecutive failures observed.
    pub failure_count: u32,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// When the circuit last tripped, if ever.
    pub last_trip: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_trip: Option<DateTime<Utc>>,
}

/// Generic three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a breaker with the supplied name and configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
                last_trip: None,
            }),
        }
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Executes a fallible future through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without issuing the call when the
    /// circuit is open (or another caller holds the half-open probe slot),
    /// and [`BreakerError::Inner`] when the underlying call fails.
    pub async fn call<T, E, F>(&self, future: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match future.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Returns a snapshot for health reporting.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        let state = match inner.state {
            CircuitState::Open if self.open_elapsed(&inner) >= self.config.reset_timeout => {
                CircuitState::HalfOpen
            }
            state => state,
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            last_trip: inner.last_trip,
        }
    }

    /// Manually resets the circuit to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        info!(circuit = %self.name, "circuit manually reset to closed");
    }

    fn open_elapsed(&self, inner: &BreakerInner) -> Duration {
        inner
            .opened_at
            .map_or(Duration::ZERO, |at| at.elapsed())
    }

    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = self.open_elapsed(&inner);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(circuit = %self.name, "circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_after: self.config.reset_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_after: self.config.reset_timeout,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let recovered = inner.state != CircuitState::Closed;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        if recovered {
            info!(circuit = %self.name, "circuit closed after successful probe");
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count += 1;
        inner.probe_in_flight = false;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.last_trip = Some(Utc::now());
            warn!(
                circuit = %self.name,
                failures = inner.failure_count,
                reset_after = ?self.config.reset_timeout,
                "circuit opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset_ms: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(reset_ms),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(async { Err::<(), _>("boom") }).await.map(|()| ())
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", config(3, 10_000));

        for _ in 0..3 {
            let err = fail(&breaker).await.unwrap_err();
            assert!(!err.is_open());
        }
        assert_eq!(breaker.snapshot().state, CircuitState::Open);

        let err = fail(&breaker).await.unwrap_err();
        assert!(err.is_open());
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("test", config(3, 10_000));

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        breaker
            .call(async { Ok::<_, &'static str>(42) })
            .await
            .unwrap();
        assert_eq!(breaker.snapshot().failure_count, 0);
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new("test", config(1, 20));

        fail(&breaker).await.unwrap_err();
        assert!(fail(&breaker).await.unwrap_err().is_open());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(breaker.snapshot().state, CircuitState::HalfOpen);

        breaker
            .call(async { Ok::<_, &'static str>(()) })
            .await
            .unwrap();
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new("test", config(1, 20));

        fail(&breaker).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let err = fail(&breaker).await.unwrap_err();
        assert!(!err.is_open());
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
        assert!(fail(&breaker).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn snapshot_records_trip_time() {
        let breaker = CircuitBreaker::new("test", config(1, 10_000));
        assert!(breaker.snapshot().last_trip.is_none());

        fail(&breaker).await.unwrap_err();
        assert!(breaker.snapshot().last_trip.is_some());
    }

    #[tokio::test]
    async fn manual_reset_closes_circuit() {
        let breaker = CircuitBreaker::new("test", config(1, 10_000));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.snapshot().state, CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
        breaker
            .call(async { Ok::<_, &'static str>(()) })
            .await
            .unwrap();
    }
}
