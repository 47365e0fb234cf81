//! Circuit breaker implementation for upstream backend protection.
//!
//! Each backend gets one breaker. The breaker wraps the outbound call,
//! failing fast while open and probing recovery while half-open, so a
//! degraded backend cannot drag the whole gateway down with it.
//!
//! A "failure" is a transport error, a deadline expiry, or a completed
//! response with status >= 500; anything else that completes is a success.
//! Responses with status >= 500 are still passed through to the client —
//! the breaker counts them without consuming them.

use crate::models::error::GatewayError;
use crate::models::settings::CircuitBreakerSettings;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// State of a circuit breaker.
///
/// * `Closed` - normal operation, all requests pass through
/// * `Open` - circuit tripped, requests fail fast without an upstream call
/// * `HalfOpen` - testing recovery, a bounded number of requests allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Error surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    /// The circuit is open; the request was rejected without an upstream call.
    #[error("Circuit breaker is open")]
    CircuitOpen,
    /// The wrapped call ran and failed.
    #[error(transparent)]
    CallFailed(GatewayError),
}

/// Observer invoked on every state transition with (backend, from, to).
pub type TransitionListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Read-only snapshot of a breaker for health and debug endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub backend: String,
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub consecutive_successes: u64,
    /// Milliseconds until the open circuit admits half-open probes, when open.
    pub open_remaining_ms: Option<u64>,
}

/// Mutable core guarded by the per-breaker lock.
///
/// Only admission checks and outcome recording run under the lock; the
/// upstream call itself never does, so long calls cannot serialize traffic.
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    consecutive_failures: u64,
    consecutive_successes: u64,
    opened_at: Option<Instant>,
    /// Recent outcomes, newest last, bounded by the configured window size.
    window: VecDeque<bool>,
}

/// Per-backend three-state circuit breaker.
///
/// State transitions are linearizable per backend and monotonic per cycle:
/// closed → open → half-open → (closed | open). Every transition resets the
/// opposing counter and is logged; an optional listener receives transition
/// events for metrics.
///
/// # Examples
///
/// ```
/// use portico_rs::services::circuit_breaker::CircuitBreaker;
/// use portico_rs::models::settings::CircuitBreakerSettings;
///
/// let settings = CircuitBreakerSettings { enabled: true, failure_threshold: 3, ..Default::default() };
/// let breaker = CircuitBreaker::new("billing".to_string(), settings);
/// assert_eq!(breaker.snapshot().consecutive_failures, 0);
/// ```
pub struct CircuitBreaker {
    backend: String,
    settings: CircuitBreakerSettings,
    core: Mutex<BreakerCore>,
    /// Remaining half-open admissions; refilled on the open → half-open
    /// transition, decremented atomically on admission.
    half_open_permits: AtomicI64,
    listener: Option<TransitionListener>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("backend", &self.backend)
            .field("settings", &self.settings)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(backend: String, settings: CircuitBreakerSettings) -> Arc<Self> {
        Self::with_listener(backend, settings, None)
    }

    /// Creates a breaker with a transition observer, used by the module to
    /// feed state-change metric events.
    pub fn with_listener(
        backend: String,
        settings: CircuitBreakerSettings,
        listener: Option<TransitionListener>,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            settings,
            listener,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                window: VecDeque::new(),
            }),
            half_open_permits: AtomicI64::new(0),
        })
    }

    /// Executes an upstream call under breaker protection.
    ///
    /// Admission and outcome recording take the breaker lock; the call runs
    /// outside it. A response with status >= 500 is recorded as a failure and
    /// still returned so the routing engine can pass it through.
    ///
    /// # Errors
    ///
    /// * [`CircuitBreakerError::CircuitOpen`] - rejected without an upstream call
    /// * [`CircuitBreakerError::CallFailed`] - the call ran and failed
    pub async fn execute<F>(&self, call: F) -> Result<reqwest::Response, CircuitBreakerError>
    where
        F: Future<Output = Result<reqwest::Response, GatewayError>>,
    {
        if !self.admit() {
            debug!("circuit breaker {} is open, failing fast", self.backend);
            return Err(CircuitBreakerError::CircuitOpen);
        }

        let outcome = call.await;
        self.release_permit();

        match outcome {
            Ok(response) => {
                if response.status().as_u16() >= 500 {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Ok(response)
            }
            Err(error) => {
                self.record_failure();
                Err(CircuitBreakerError::CallFailed(error))
            }
        }
    }

    /// Checks whether a request may proceed, performing the open → half-open
    /// transition when the open timeout has elapsed.
    fn admit(&self) -> bool {
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        match core.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = core.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.settings.open_timeout() {
                    self.transition(&mut core, CircuitState::HalfOpen);
                    // The transitioning request consumes the first permit.
                    self.half_open_permits.fetch_sub(1, Ordering::AcqRel);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_permits.fetch_sub(1, Ordering::AcqRel) > 0 {
                    true
                } else {
                    self.half_open_permits.fetch_add(1, Ordering::AcqRel);
                    false
                }
            }
        }
    }

    /// Returns an admission permit after the call completes, while half-open.
    fn release_permit(&self) {
        let core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        if core.state == CircuitState::HalfOpen {
            self.half_open_permits.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn record_success(&self) {
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        core.consecutive_failures = 0;
        self.push_window(&mut core, true);

        if core.state == CircuitState::HalfOpen {
            core.consecutive_successes += 1;
            if core.consecutive_successes >= self.settings.success_threshold() {
                self.transition(&mut core, CircuitState::Closed);
            }
        }
    }

    fn record_failure(&self) {
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        core.consecutive_successes = 0;
        self.push_window(&mut core, false);

        match core.state {
            CircuitState::Closed => {
                core.consecutive_failures += 1;
                if core.consecutive_failures >= self.settings.failure_threshold()
                    || self.window_tripped(&core)
                {
                    self.transition(&mut core, CircuitState::Open);
                }
            }
            // Any half-open failure reopens the circuit immediately.
            CircuitState::HalfOpen => {
                core.consecutive_failures += 1;
                self.transition(&mut core, CircuitState::Open);
            }
            CircuitState::Open => {
                core.opened_at = Some(Instant::now());
            }
        }
    }

    fn push_window(&self, core: &mut BreakerCore, success: bool) {
        if self.settings.window_size == 0 {
            return;
        }
        core.window.push_back(success);
        while core.window.len() > self.settings.window_size {
            core.window.pop_front();
        }
    }

    /// Rate-based opening: a full window whose success rate fell below the
    /// configured threshold trips the circuit even without a consecutive run.
    fn window_tripped(&self, core: &BreakerCore) -> bool {
        if self.settings.window_size == 0
            || self.settings.success_rate_threshold <= 0.0
            || core.window.len() < self.settings.window_size
        {
            return false;
        }
        let successes = core.window.iter().filter(|s| **s).count() as f64;
        successes / (core.window.len() as f64) < self.settings.success_rate_threshold
    }

    fn transition(&self, core: &mut BreakerCore, next: CircuitState) {
        let prev = core.state;
        core.state = next;
        if let Some(listener) = &self.listener {
            listener(&self.backend, prev, next);
        }
        match next {
            CircuitState::Open => {
                core.opened_at = Some(Instant::now());
                core.consecutive_successes = 0;
                warn!(
                    "circuit breaker {} opened ({:?} -> open, failures={})",
                    self.backend, prev, core.consecutive_failures
                );
            }
            CircuitState::HalfOpen => {
                core.consecutive_successes = 0;
                self.half_open_permits.store(
                    self.settings.half_open_allowed_requests() as i64,
                    Ordering::Release,
                );
                info!("circuit breaker {} transitioned to half-open", self.backend);
            }
            CircuitState::Closed => {
                core.consecutive_failures = 0;
                core.consecutive_successes = 0;
                core.opened_at = None;
                core.window.clear();
                info!("circuit breaker {} closed, backend recovered", self.backend);
            }
        }
    }

    /// Current state without side effects.
    pub fn state(&self) -> CircuitState {
        self.core.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Consistent read-only snapshot for health and debug endpoints.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        let open_remaining_ms = match (core.state, core.opened_at) {
            (CircuitState::Open, Some(at)) => Some(
                self.settings
                    .open_timeout()
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        CircuitSnapshot {
            backend: self.backend.clone(),
            state: core.state,
            consecutive_failures: core.consecutive_failures,
            consecutive_successes: core.consecutive_successes,
            open_remaining_ms,
        }
    }

    /// Resets the breaker to closed with cleared counters. Used by module stop.
    pub fn reset(&self) {
        let mut core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        core.state = CircuitState::Closed;
        core.consecutive_failures = 0;
        core.consecutive_successes = 0;
        core.opened_at = None;
        core.window.clear();
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }
}
