//! Failure-rate circuit breaker guarding the ML detection path.
//!
//! ```text
//!   Closed ──(failure rate ≥ threshold)──> Open
//!   Open ──(wait elapsed)───────────────> HalfOpen
//!   HalfOpen ──(all probes succeed)─────> Closed
//!   HalfOpen ──(any probe fails)────────> Open
//! ```
//!
//! Every admission is tagged with the generation of the state it was admitted
//! in. Outcomes that arrive after a transition are discarded.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure percentage (0-100) over the window that opens the circuit.
    pub failure_rate_threshold: f64,
    pub sliding_window_size: usize,
    /// Calls recorded before the failure rate is evaluated.
    pub minimum_calls: usize,
    pub open_wait_ms: u64,
    pub half_open_calls: u32,
    pub call_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_calls: 5,
            open_wait_ms: 30_000,
            half_open_calls: 3,
            call_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BreakerError {
    #[error("circuit breaker '{0}' is open")]
    Open(String),
    #[error("call through circuit breaker '{0}' timed out")]
    Timeout(String),
}

struct Inner {
    state: BreakerState,
    /// Most recent outcomes, `true` for a failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    /// Bumped on every transition; admissions are tagged with it.
    generation: u64,
    probes_issued: u32,
    probes_succeeded: u32,
}

/// Admission to one call. Settled with the call's outcome; dropping it
/// unsettled (the caller gave up on the call) counts as a failure.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, failed: bool) {
        self.settled = true;
        self.breaker.record(self.generation, failed);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(breaker = %self.breaker.name, "call abandoned before completion");
            self.breaker.record(self.generation, true);
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                generation: 0,
                probes_issued: 0,
                probes_succeeded: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Runs `call` if the circuit admits it, bounded by the call timeout.
    /// `is_failure` classifies a completed result; timeouts always count as
    /// failures, and so does a call dropped before it completes.
    pub async fn call<T, Fut>(
        &self,
        call: Fut,
        is_failure: impl FnOnce(&T) -> bool,
    ) -> Result<T, BreakerError>
    where
        Fut: Future<Output = T>,
    {
        let permit = self.try_acquire()?;
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(timeout, call).await {
            Ok(value) => {
                permit.settle(is_failure(&value));
                Ok(value)
            }
            Err(_) => {
                tracing::warn!(breaker = %self.name, ?timeout, "call timed out");
                permit.settle(true);
                Err(BreakerError::Timeout(self.name.clone()))
            }
        }
    }

    fn try_acquire(&self) -> Result<Permit<'_>, BreakerError> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        let admitted = match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                let admit = inner.probes_issued < self.config.half_open_calls.max(1);
                if admit {
                    inner.probes_issued += 1;
                }
                admit
            }
        };
        if !admitted {
            return Err(BreakerError::Open(self.name.clone()));
        }
        Ok(Permit {
            breaker: self,
            generation: inner.generation,
            settled: false,
        })
    }

    /// Records the outcome of a call admitted in `generation`. Outcomes from
    /// an earlier generation belong to a state that no longer exists and are
    /// dropped.
    fn record(&self, generation: u64, failed: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            tracing::trace!(breaker = %self.name, generation, current = inner.generation, "stale outcome ignored");
            return;
        }
        match inner.state {
            BreakerState::Closed => {
                inner.window.push_back(failed);
                while inner.window.len() > self.config.sliding_window_size.max(1) {
                    inner.window.pop_front();
                }
                let calls = inner.window.len();
                if calls >= self.config.minimum_calls.max(1) {
                    let failures = inner.window.iter().filter(|f| **f).count();
                    let rate = failures as f64 * 100.0 / calls as f64;
                    if rate >= self.config.failure_rate_threshold {
                        tracing::warn!(
                            breaker = %self.name,
                            failure_rate = rate,
                            calls,
                            "circuit breaker opened"
                        );
                        self.transition(&mut inner, BreakerState::Open);
                    }
                }
            }
            BreakerState::HalfOpen => {
                if failed {
                    tracing::warn!(breaker = %self.name, "probe failed, circuit breaker reopened");
                    self.transition(&mut inner, BreakerState::Open);
                } else {
                    inner.probes_succeeded += 1;
                    if inner.probes_succeeded >= self.config.half_open_calls.max(1) {
                        tracing::info!(breaker = %self.name, "circuit breaker closed");
                        self.transition(&mut inner, BreakerState::Closed);
                    }
                }
            }
            // Open admits nothing, so no outcome can carry its generation.
            BreakerState::Open => {}
        }
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let wait = Duration::from_millis(self.config.open_wait_ms);
        if inner.opened_at.is_some_and(|at| at.elapsed() >= wait) {
            tracing::info!(breaker = %self.name, "circuit breaker half-open");
            self.transition(inner, BreakerState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        tracing::debug!(breaker = %self.name, from = %inner.state, %to, "breaker transition");
        inner.state = to;
        inner.generation += 1;
        inner.probes_issued = 0;
        inner.probes_succeeded = 0;
        match to {
            BreakerState::Open => inner.opened_at = Some(Instant::now()),
            BreakerState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
            BreakerState::HalfOpen => {}
        }
    }
}
