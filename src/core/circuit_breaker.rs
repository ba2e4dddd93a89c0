//! # Circuit Breaker Implementation
//!
//! Per-route QoS policy: a state machine that short-circuits a downstream
//! whose consecutive timeout count reached the configured threshold.
//!
//! ## States:
//! - **Closed**: normal operation, calls pass through; tracks consecutive failures
//! - **Open**: calls are rejected immediately until the break duration elapses
//! - **HalfOpen**: exactly one trial call is admitted; its outcome decides
//!   whether the circuit closes again or re-opens
//!
//! Call outcomes are reported through a [`CallGuard`]: `success()` and
//! `failure()` consume the guard, while dropping it without an outcome (the
//! caller was cancelled, or the failure is not breaker-counted) records
//! nothing and frees the HalfOpen trial slot. Breaker state lives in a
//! process-lifetime registry keyed by route key, so a configuration reload
//! does not reset a route's breaker unless that route's QoS values changed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Circuit breaker specific errors
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open")]
    Open,
}

/// Circuit breaker state machine
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through
    /// Tracks the number of consecutive breaker-counted failures
    Closed { consecutive_failures: u32 },

    /// Circuit is open, calls fail fast
    /// Records when the circuit was opened
    Open { opened_at: Instant },

    /// Circuit is half-open; at most one trial call may be in flight
    HalfOpen { trial_in_flight: bool },
}

/// Configuration for circuit breaker behavior, taken from a route's QoS options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures tolerated before the circuit opens
    pub exceptions_allowed_before_breaking: u32,

    /// How long the circuit stays open before admitting a trial call
    pub duration_of_break: Duration,

    /// Bound on each downstream call; exceeding it counts as a failure
    pub timeout: Duration,
}

/// Metrics collected by the circuit breaker
///
/// Uses atomic operations for lock-free updates from concurrent requests.
#[derive(Debug, Default)]
pub struct CircuitBreakerMetrics {
    /// Calls admitted through the breaker
    pub admitted_calls: AtomicU64,

    /// Calls that completed successfully
    pub successful_calls: AtomicU64,

    /// Calls that recorded a breaker-counted failure
    pub failed_calls: AtomicU64,

    /// Calls rejected without a downstream attempt
    pub short_circuited_calls: AtomicU64,

    /// Number of times the circuit has opened
    pub opened_count: AtomicU64,

    /// Number of times the circuit has closed from HalfOpen
    pub closed_count: AtomicU64,
}

impl CircuitBreakerMetrics {
    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> CircuitBreakerMetricsSnapshot {
        CircuitBreakerMetricsSnapshot {
            admitted_calls: self.admitted_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            short_circuited_calls: self.short_circuited_calls.load(Ordering::Relaxed),
            opened_count: self.opened_count.load(Ordering::Relaxed),
            closed_count: self.closed_count.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of circuit breaker metrics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerMetricsSnapshot {
    pub admitted_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub short_circuited_calls: u64,
    pub opened_count: u64,
    pub closed_count: u64,
}

/// Per-route circuit breaker
pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
    config: CircuitBreakerConfig,
    metrics: Arc<CircuitBreakerMetrics>,
    key: String,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for the given route key
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(CircuitState::Closed {
                consecutive_failures: 0,
            }),
            config,
            metrics: Arc::new(CircuitBreakerMetrics::default()),
            key: key.into(),
        }
    }

    /// Try to admit a call through the breaker
    ///
    /// Returns a [`CallGuard`] the caller must resolve with the call's
    /// outcome, or `Err(CircuitBreakerError::Open)` when the call is
    /// short-circuited. An Open circuit whose break duration has elapsed
    /// transitions to HalfOpen here and admits the caller as the trial.
    pub fn begin_call(self: &Arc<Self>) -> Result<CallGuard, CircuitBreakerError> {
        let mut state = self.state.lock();

        let admitted_as_trial = match *state {
            CircuitState::Closed { .. } => false,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.duration_of_break {
                    *state = CircuitState::HalfOpen {
                        trial_in_flight: true,
                    };
                    debug!(route = %self.key, "circuit breaker half-open, admitting trial call");
                    true
                } else {
                    self.metrics
                        .short_circuited_calls
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(CircuitBreakerError::Open);
                }
            }
            CircuitState::HalfOpen { trial_in_flight } => {
                if trial_in_flight {
                    self.metrics
                        .short_circuited_calls
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(CircuitBreakerError::Open);
                }
                *state = CircuitState::HalfOpen {
                    trial_in_flight: true,
                };
                true
            }
        };

        self.metrics.admitted_calls.fetch_add(1, Ordering::Relaxed);
        Ok(CallGuard {
            breaker: Arc::clone(self),
            admitted_as_trial,
            resolved: false,
        })
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.state.lock().clone()
    }

    /// The route key this breaker guards
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get metrics
    pub fn metrics(&self) -> Arc<CircuitBreakerMetrics> {
        Arc::clone(&self.metrics)
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        self.metrics
            .successful_calls
            .fetch_add(1, Ordering::Relaxed);

        match *state {
            CircuitState::Closed { .. } => {
                *state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
            }
            CircuitState::HalfOpen { .. } => {
                *state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
                self.metrics.closed_count.fetch_add(1, Ordering::Relaxed);
                debug!(route = %self.key, "circuit breaker closed after trial success");
            }
            // A call admitted while Closed can finish after a concurrent
            // failure already opened the circuit; its late success is ignored.
            CircuitState::Open { .. } => {}
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        self.metrics.failed_calls.fetch_add(1, Ordering::Relaxed);

        match *state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.exceptions_allowed_before_breaking {
                    *state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    self.metrics.opened_count.fetch_add(1, Ordering::Relaxed);
                    debug!(route = %self.key, failures, "circuit breaker opened");
                } else {
                    *state = CircuitState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            CircuitState::HalfOpen { .. } => {
                *state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                self.metrics.opened_count.fetch_add(1, Ordering::Relaxed);
                debug!(route = %self.key, "circuit breaker re-opened after trial failure");
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Called when a guard is dropped without an outcome: the call was
    /// cancelled or failed in a way that is not breaker-counted. The only
    /// state change is freeing the HalfOpen trial slot.
    fn record_abandoned(&self, admitted_as_trial: bool) {
        if !admitted_as_trial {
            return;
        }
        let mut state = self.state.lock();
        if let CircuitState::HalfOpen { .. } = *state {
            *state = CircuitState::HalfOpen {
                trial_in_flight: false,
            };
        }
    }
}

/// Outcome handle for a call admitted through a [`CircuitBreaker`]
///
/// Exactly one of `success()` / `failure()` should be called; dropping the
/// guard unresolved records no outcome.
pub struct CallGuard {
    breaker: Arc<CircuitBreaker>,
    admitted_as_trial: bool,
    resolved: bool,
}

impl CallGuard {
    /// Record a successful downstream call
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    /// Record a breaker-counted failure (a timeout)
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.record_abandoned(self.admitted_as_trial);
        }
    }
}

/// Circuit breaker registry keyed by route key
///
/// Breakers live for the process lifetime of their route key. A reload that
/// keeps a route's QoS values reuses the existing breaker; changed values
/// replace it with a fresh one.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create a new circuit breaker registry
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker for a route key, creating or replacing as needed
    pub fn get_or_create(&self, key: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            if existing.config() == config {
                return Arc::clone(&existing);
            }
        }
        let breaker = Arc::new(CircuitBreaker::new(key, config.clone()));
        self.breakers.insert(key.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Snapshot all breakers' metrics, keyed by route
    pub fn metrics_snapshot(&self) -> HashMap<String, CircuitBreakerMetricsSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics().snapshot()))
            .collect()
    }
}
