//! Circuit breaker for the model provider
//!
//! Closed → `failure_threshold` consecutive failed attempts → Open. While open
//! every call is rejected without touching the provider. Once the cool-down
//! has elapsed the breaker admits exactly one probe (HalfOpen); concurrent
//! callers keep being rejected until the probe resolves. A successful probe
//! closes the circuit, a failed one reopens it.
//!
//! Admission is expressed as a [`Permit`]. A permit that is dropped without
//! being resolved (the caller's future was cancelled mid-call) releases the
//! probe slot without changing the state.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected
    Open,
    /// Cool-down elapsed, one probe allowed
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Thread-safe circuit breaker shared by all callers of one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    // The state is a handful of plain fields; a panic elsewhere cannot leave it
    // half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state, promoting Open → HalfOpen once the cool-down has elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.cooldown {
                    tracing::info!("Circuit breaker cool-down elapsed, entering half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = false;
                }
            }
        }
    }

    /// Ask to make one provider call
    ///
    /// Returns `None` when the circuit is open, or half-open with the probe
    /// already taken.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Some(Permit {
                breaker: self,
                probe: false,
                resolved: false,
            }),
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                tracing::debug!("Circuit breaker admitting probe call");
                Some(Permit {
                    breaker: self,
                    probe: true,
                    resolved: false,
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        if probe {
            tracing::info!("Circuit breaker probe succeeded, closing circuit");
            inner.probe_in_flight = false;
        } else if inner.state != CircuitState::Closed {
            // Late success from a call admitted before the circuit opened
            return;
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        if probe {
            inner.probe_in_flight = false;
            Self::open(&mut inner);
            tracing::warn!("Circuit breaker probe failed, reopening circuit");
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    Self::open(&mut inner);
                    tracing::warn!(
                        "Circuit breaker opened after {} consecutive failures",
                        self.failure_threshold
                    );
                }
            }
            // A call admitted before the circuit opened finished late
            CircuitState::Open | CircuitState::HalfOpen => {}
        }
    }

    fn release(&self, probe: bool) {
        if probe {
            self.lock().probe_in_flight = false;
        }
    }

    fn open(inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_failures = 0;
    }
}

/// Admission to make exactly one provider call
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl Permit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.release(self.probe);
        }
    }
}
