//! Circuit breaker guarding the catalog endpoint.
//!
//! Closed: calls flow and outcomes are counted in a window that restarts every
//! `window`. The breaker trips to Open once the window holds at least
//! `min_requests` outcomes with a failure ratio of at least `failure_ratio`.
//! Open: every call is rejected until `cooldown` has elapsed.
//! HalfOpen: exactly one trial call is let through; its outcome closes the
//! breaker or opens it again.
//!
//! Callers take a [`Permit`] before issuing a request and report the outcome
//! on it. A permit dropped without an outcome is not counted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{PollError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerConfig {
    pub min_requests: u32,
    pub failure_ratio: f64,
    pub cooldown: Duration,
    pub window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            cooldown: Duration::from_secs(60),
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcomes recorded in the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub failures: u32,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    counts: Counts,
    /// Closed: when the current window ends. Open: when the cooldown ends.
    deadline: Instant,
    trial_in_flight: bool,
    generation: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                counts: Counts::default(),
                deadline: now + config.window,
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, self.clock.now());
        inner.state
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, self.clock.now());
        inner.counts
    }

    /// Ask for permission to issue one call.
    pub fn acquire(&self) -> Result<Permit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, self.clock.now());

        match inner.state {
            BreakerState::Open => Err(PollError::CircuitOpen),
            BreakerState::HalfOpen if inner.trial_in_flight => Err(PollError::CircuitOpen),
            BreakerState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(Permit::new(self, inner.generation))
            }
            BreakerState::Closed => Ok(Permit::new(self, inner.generation)),
        }
    }

    /// Apply time-driven transitions: window roll-over and cooldown expiry.
    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed if now >= inner.deadline => {
                self.transition(inner, BreakerState::Closed, now);
            }
            BreakerState::Open if now >= inner.deadline => {
                info!(breaker = %self.name, "Cooldown elapsed, allowing one trial call");
                self.transition(inner, BreakerState::HalfOpen, now);
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        inner.state = to;
        inner.counts = Counts::default();
        inner.trial_in_flight = false;
        inner.generation += 1;
        inner.deadline = match to {
            BreakerState::Closed => now + self.config.window,
            BreakerState::Open => now + self.config.cooldown,
            BreakerState::HalfOpen => now,
        };
    }

    fn should_trip(&self, counts: Counts) -> bool {
        counts.requests >= self.config.min_requests
            && f64::from(counts.failures) / f64::from(counts.requests) >= self.config.failure_ratio
    }

    fn on_outcome(&self, generation: u64, success: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            // Outcome from a previous window or state; it no longer applies.
            return;
        }

        match inner.state {
            BreakerState::Closed => {
                inner.counts.requests += 1;
                if !success {
                    inner.counts.failures += 1;
                    if self.should_trip(inner.counts) {
                        let counts = inner.counts;
                        self.transition(&mut inner, BreakerState::Open, now);
                        error!(
                            breaker = %self.name,
                            requests = counts.requests,
                            failures = counts.failures,
                            cooldown_secs = self.config.cooldown.as_secs(),
                            "Circuit breaker tripped"
                        );
                    }
                }
            }
            BreakerState::HalfOpen => {
                if success {
                    info!(breaker = %self.name, "Trial call succeeded, circuit closed");
                    self.transition(&mut inner, BreakerState::Closed, now);
                } else {
                    error!(breaker = %self.name, "Trial call failed, circuit re-opened");
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_abandon(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
#[must_use = "report the call outcome with `success` or `failure`"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64) -> Self {
        Self {
            breaker,
            generation,
            settled: false,
        }
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.generation, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_outcome(self.generation, false);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon(self.generation);
        }
    }
}
