//! Circuit breaker
//!
//! Tracks consecutive failures of calls to the search-index store and
//! short-circuits calls while the store is judged unhealthy.
//!
//! State machine:
//! - `Closed`: calls pass. Each failure increments the counter; reaching
//!   the threshold opens the breaker.
//! - `Open`: calls are refused until `reset_timeout` has elapsed since the
//!   last failure. Then exactly one trial call passes. Trial success closes
//!   the breaker and clears the counter; trial failure keeps it open and
//!   restarts the cooldown.
//!
//! Each admitted call carries an [`Admission`]. Only the result of the
//! trial admission resolves an open breaker; late results from calls
//! admitted before it opened still count as failures but never end the
//! trial.
//!
//! All state lives behind one mutex; the breaker is shared through `Arc`
//! and injected into its consumers.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
}

/// Point-in-time view for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: &'static str,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub reset_timeout_secs: u64,
    /// Seconds since the last recorded failure
    pub last_failure_secs_ago: Option<u64>,
}

/// Permission to make one call, handed back with its result
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    trial: bool,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Consecutive-failure circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker
    ///
    /// # Arguments
    /// * `name` - Label used in logs and status output
    /// * `threshold` - Consecutive failures that open the breaker (min 1)
    /// * `reset_timeout` - Cooldown before a trial call is allowed
    pub fn new(name: &'static str, threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name,
            threshold: threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Asks whether a call may proceed now
    pub fn allow_request(&self) -> Option<Admission> {
        self.allow_request_at(Instant::now())
    }

    /// Asks whether a call may proceed at `now`
    ///
    /// While open, admits one trial call per cooldown.
    pub fn allow_request_at(&self, now: Instant) -> Option<Admission> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Some(Admission { trial: false }),
            BreakerState::Open => {
                if inner.trial_in_flight {
                    return None;
                }
                let cooled_down = inner
                    .last_failure
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.reset_timeout);
                if !cooled_down {
                    return None;
                }
                inner.trial_in_flight = true;
                info!("Circuit breaker '{}' allowing trial call", self.name);
                Some(Admission { trial: true })
            }
        }
    }

    /// Records a successful call
    pub fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::Open if admission.trial => {
                info!("Circuit breaker '{}' closed after successful trial", self.name);
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                inner.trial_in_flight = false;
            }
            BreakerState::Open => {}
        }
    }

    /// Records a failed call
    pub fn record_failure(&self, admission: Admission) {
        self.record_failure_at(admission, Instant::now());
    }

    /// Records a failed call observed at `now`
    pub fn record_failure_at(&self, admission: Admission, now: Instant) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(now);

        match inner.state {
            BreakerState::Closed if inner.failures >= self.threshold => {
                inner.state = BreakerState::Open;
                warn!(
                    "Circuit breaker '{}' opened after {} consecutive failures",
                    self.name, inner.failures
                );
            }
            BreakerState::Open if admission.trial => {
                inner.trial_in_flight = false;
                warn!(
                    "Circuit breaker '{}' trial call failed, staying open for {:?}",
                    self.name, self.reset_timeout
                );
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name,
            state: inner.state,
            consecutive_failures: inner.failures,
            threshold: self.threshold,
            reset_timeout_secs: self.reset_timeout.as_secs(),
            last_failure_secs_ago: inner.last_failure.map(|at| at.elapsed().as_secs()),
        }
    }
}
