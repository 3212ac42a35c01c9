//! Sliding-window and concurrency rate limiting.
//!
//! One [`RateLimiter`] throttles the whole gateway. It keeps the admission
//! timestamps of the trailing hour and a count of admitted requests still in
//! flight, both behind a single mutex so that check-and-admit is atomic. The
//! mutex is never held across an await.

use crate::config::RateLimitPolicy;
use crate::error::RateLimitError;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Source of the current instant.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// # Example
/// ```rust
/// use dbgateway_core::rate_limit::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(61));
/// assert_eq!(clock.now() - start, Duration::from_secs(61));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission timestamps (oldest first) and the in-flight count.
#[derive(Debug, Default)]
struct RateWindowState {
    admissions: VecDeque<Instant>,
    in_flight: u32,
}

impl RateWindowState {
    fn prune(&mut self, now: Instant) {
        while self
            .admissions
            .front()
            .is_some_and(|ts| now.duration_since(*ts) >= HOUR)
        {
            self.admissions.pop_front();
        }
    }

    /// Admissions within the trailing minute, and the oldest of them.
    fn minute_window(&self, now: Instant) -> (u32, Option<Instant>) {
        let mut count = 0u32;
        let mut oldest = None;
        for ts in self
            .admissions
            .iter()
            .rev()
            .take_while(|ts| now.duration_since(**ts) < MINUTE)
        {
            count += 1;
            oldest = Some(*ts);
        }
        (count, oldest)
    }

    fn hour_count(&self) -> u32 {
        u32::try_from(self.admissions.len()).unwrap_or(u32::MAX)
    }
}

fn lock(state: &Mutex<RateWindowState>) -> MutexGuard<'_, RateWindowState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counters reported alongside rate-limit rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    /// Admissions within the trailing minute
    pub per_minute: u32,
    /// Admissions within the trailing hour
    pub per_hour: u32,
    /// Admitted requests not yet released
    pub in_flight: u32,
}

/// Process-wide request throttle.
///
/// # Example
/// ```rust
/// use dbgateway_core::config::RateLimitPolicy;
/// use dbgateway_core::rate_limit::RateLimiter;
///
/// let limiter = RateLimiter::new(RateLimitPolicy::default().with_max_concurrent(1));
/// let admission = limiter.try_admit().unwrap();
/// assert!(limiter.try_admit().is_err());
/// drop(admission);
/// assert_eq!(limiter.stats().in_flight, 0);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<RateWindowState>>,
}

impl RateLimiter {
    /// Creates a limiter on the system clock.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Creates a limiter reading time from `clock`.
    pub fn with_clock(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            state: Arc::new(Mutex::new(RateWindowState::default())),
        }
    }

    /// The ceilings this limiter enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Admits one request or reports which ceiling refused it.
    ///
    /// Ceilings are checked in a fixed order: per-minute, per-hour, then
    /// concurrency. A refused request leaves the state untouched apart from
    /// pruning expired timestamps.
    ///
    /// # Errors
    /// Returns the [`RateLimitError`] for the first ceiling reached.
    pub fn try_admit(&self) -> Result<Admission, RateLimitError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.prune(now);

        let (per_minute, oldest_in_minute) = state.minute_window(now);
        if per_minute >= self.policy.max_per_minute {
            let retry_after = oldest_in_minute
                .map_or(MINUTE, |ts| MINUTE.saturating_sub(now.duration_since(ts)));
            return Err(RateLimitError::PerMinuteExceeded {
                limit: self.policy.max_per_minute,
                retry_after,
            });
        }

        if state.hour_count() >= self.policy.max_per_hour {
            let retry_after = state
                .admissions
                .front()
                .map_or(HOUR, |ts| HOUR.saturating_sub(now.duration_since(*ts)));
            return Err(RateLimitError::PerHourExceeded {
                limit: self.policy.max_per_hour,
                retry_after,
            });
        }

        if state.in_flight >= self.policy.max_concurrent {
            return Err(RateLimitError::ConcurrencyExceeded {
                limit: self.policy.max_concurrent,
            });
        }

        state.admissions.push_back(now);
        state.in_flight += 1;

        Ok(Admission {
            state: Arc::clone(&self.state),
            released: false,
        })
    }

    /// Returns an admission's slot. Equivalent to dropping it.
    pub fn release(&self, mut admission: Admission) {
        admission.release();
    }

    /// Current counters.
    pub fn stats(&self) -> RateLimitStats {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.prune(now);
        RateLimitStats {
            per_minute: state.minute_window(now).0,
            per_hour: state.hour_count(),
            in_flight: state.in_flight,
        }
    }
}

/// Proof of admission; holds one concurrency slot until released or dropped.
#[derive(Debug)]
#[must_use = "dropping an admission releases its slot immediately"]
pub struct Admission {
    state: Arc<Mutex<RateWindowState>>,
    released: bool,
}

impl Admission {
    /// Returns the concurrency slot. Calling it again does nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = lock(&self.state);
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Whether the slot has already been returned.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.release();
    }
}
