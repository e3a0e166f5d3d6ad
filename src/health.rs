//! System health: request rate limiting and the circuit breaker.
//!
//! One [`HealthMonitor`] instance guards the gasless-transfer subsystem
//! for the whole process. It is constructed by the application root and
//! shared by reference, never reached through globals, so tests get
//! isolated instances. All read-modify-write happens under a single lock
//! acquisition and never spans an await point.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::{GateError, Result};

/// Per-minute request cap.
pub const MAX_REQUESTS_PER_MINUTE: usize = 10;

/// Per-hour request cap.
pub const MAX_REQUESTS_PER_HOUR: usize = 100;

/// Consecutive failures that open the circuit breaker.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Cool-down after which an open breaker closes on its own.
pub const BREAKER_RESET: Duration = Duration::from_secs(300);

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Time source, injectable for tests.
pub trait Clock: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Instant;
}

/// Wall-clock backed [`Clock`].
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Default)]
struct HealthState {
    /// Request timestamps inside the trailing hour, oldest first
    requests: VecDeque<Instant>,
    /// Consecutive failures since the last success
    failures: u32,
    last_failure: Option<Instant>,
    breaker_open: bool,
}

impl HealthState {
    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.requests.front() {
            if now.duration_since(front) >= HOUR_WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn minute_requests(&self, now: Instant) -> impl Iterator<Item = &Instant> {
        self.requests
            .iter()
            .filter(move |&&t| now.duration_since(t) < MINUTE_WINDOW)
    }

    /// Open flag combined with the cool-down, so recovery does not depend
    /// on anyone calling a reset method.
    fn breaker_effectively_open(&self, now: Instant) -> bool {
        if !self.breaker_open {
            return false;
        }
        match self.last_failure {
            Some(at) => now.duration_since(at) <= BREAKER_RESET,
            None => false,
        }
    }

    fn breaker_reset_in(&self, now: Instant) -> Duration {
        match self.last_failure {
            Some(at) if self.breaker_open => {
                BREAKER_RESET.saturating_sub(now.duration_since(at))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Rate-limit portion of a [`SystemStatus`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub requests_this_minute: usize,
    pub requests_this_hour: usize,
    pub max_per_minute: usize,
    pub max_per_hour: usize,
}

/// Circuit-breaker portion of a [`SystemStatus`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStatus {
    pub open: bool,
    pub failures: u32,
    pub threshold: u32,
    /// Time until an open breaker closes on its own
    pub reset_in: Duration,
}

/// Read-only diagnostic snapshot for UI display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStatus {
    pub healthy: bool,
    pub rate_limit: RateLimitStatus,
    pub circuit_breaker: CircuitBreakerStatus,
}

/// Rolling request counters plus the circuit breaker.
pub struct HealthMonitor {
    state: Mutex<HealthState>,
    clock: Box<dyn Clock>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    /// Create a monitor on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    /// Create a monitor on a custom clock.
    #[must_use]
    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(HealthState::default()),
            clock,
        }
    }

    /// Record a request attempt against both rate windows.
    ///
    /// A rejected attempt is not stamped, so it does not consume quota.
    pub fn record_attempt(&self) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("health state poisoned");
        state.prune(now);

        let minute: Vec<Instant> = state.minute_requests(now).copied().collect();
        if minute.len() >= MAX_REQUESTS_PER_MINUTE {
            // Wait until the oldest in-window request slides out.
            let oldest = minute[0];
            let wait = MINUTE_WINDOW.saturating_sub(now.duration_since(oldest));
            warn!(requests = minute.len(), "Per-minute rate limit reached");
            return Err(GateError::rate_limited(wait));
        }

        if state.requests.len() >= MAX_REQUESTS_PER_HOUR {
            let oldest = *state.requests.front().expect("non-empty at cap");
            let wait = HOUR_WINDOW.saturating_sub(now.duration_since(oldest));
            warn!(requests = state.requests.len(), "Hourly rate limit reached");
            return Err(GateError::hourly_limited(wait));
        }

        state.requests.push_back(now);
        debug!(
            minute = minute.len() + 1,
            hour = state.requests.len(),
            "Rate limit check passed"
        );
        Ok(())
    }

    /// Whether the transfer subsystem is usable right now.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("health state poisoned");
        state.prune(now);
        let minute_count = state.minute_requests(now).count();
        !state.breaker_effectively_open(now) && minute_count < MAX_REQUESTS_PER_MINUTE
    }

    /// Record a terminal failure; opens the breaker at the threshold.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("health state poisoned");
        state.failures += 1;
        state.last_failure = Some(now);
        if state.failures >= FAILURE_THRESHOLD && !state.breaker_open {
            warn!(failures = state.failures, "Circuit breaker opened");
            state.breaker_open = true;
        }
    }

    /// Record a terminal success; closes the breaker.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("health state poisoned");
        if state.failures > 0 {
            debug!("Resetting circuit breaker after success");
        }
        state.failures = 0;
        state.last_failure = None;
        state.breaker_open = false;
    }

    /// Close the breaker if the cool-down has elapsed.
    pub fn maybe_reset_breaker(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("health state poisoned");
        if state.breaker_open && !state.breaker_effectively_open(now) {
            debug!("Circuit breaker cool-down elapsed, resuming service");
            state.breaker_open = false;
            state.failures = 0;
        }
    }

    /// Gate an operation on the breaker, surfacing the remaining wait.
    pub fn ensure_available(&self) -> Result<()> {
        self.maybe_reset_breaker();
        let now = self.clock.now();
        let state = self.state.lock().expect("health state poisoned");
        if state.breaker_effectively_open(now) {
            return Err(GateError::circuit_open(state.breaker_reset_in(now)));
        }
        Ok(())
    }

    /// The error an unavailable subsystem should surface right now, with
    /// the computed wait. `None` when healthy.
    #[must_use]
    pub fn availability_error(&self) -> Option<GateError> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("health state poisoned");
        state.prune(now);
        if state.breaker_effectively_open(now) {
            return Some(GateError::circuit_open(state.breaker_reset_in(now)));
        }
        let minute: Vec<Instant> = state.minute_requests(now).copied().collect();
        if minute.len() >= MAX_REQUESTS_PER_MINUTE {
            let wait = MINUTE_WINDOW.saturating_sub(now.duration_since(minute[0]));
            return Some(GateError::rate_limited(wait));
        }
        None
    }

    /// Read-only status snapshot.
    #[must_use]
    pub fn status(&self) -> SystemStatus {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("health state poisoned");
        state.prune(now);
        let minute_count = state.minute_requests(now).count();
        let open = state.breaker_effectively_open(now);

        SystemStatus {
            healthy: !open && minute_count < MAX_REQUESTS_PER_MINUTE,
            rate_limit: RateLimitStatus {
                requests_this_minute: minute_count,
                requests_this_hour: state.requests.len(),
                max_per_minute: MAX_REQUESTS_PER_MINUTE,
                max_per_hour: MAX_REQUESTS_PER_HOUR,
            },
            circuit_breaker: CircuitBreakerStatus {
                open,
                failures: state.failures,
                threshold: FAILURE_THRESHOLD,
                reset_in: state.breaker_reset_in(now),
            },
        }
    }
}
