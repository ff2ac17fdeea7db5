//! The smooth token-bucket rate limiter.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use nonzero_ext::nonzero;
use parking_lot::Mutex;

use crate::clock::{Clock, MonotonicClock};
use crate::micros::Micros;
use crate::smooth::{Pacing, Smooth};

/// A rate limiter that issues permits at a configurable stable rate,
/// blocking callers just long enough to hold that rate.
///
/// Each [`acquire`][RateLimiter::acquire] blocks until a permit is
/// available and then takes it; permits need not be released. The limiter
/// is concurrency-safe: it restricts the total rate across all threads,
/// though it makes no fairness guarantee. Unlike a semaphore, which bounds
/// concurrent accesses, a `RateLimiter` bounds the *rate* of accesses.
///
/// The number of permits requested never affects the throttling of that
/// request itself (an `acquire_n` of one permit and of a thousand permits
/// are admitted identically), but it affects the *next* request: an
/// expensive reservation on an idle limiter is granted immediately, and
/// the caller after it pays the bill. This pay-it-forward rule means the
/// first request through a cold limiter never waits.
///
/// Two pacing policies are available:
///
/// * [`RateLimiter::new`] banks up to one second of unused capacity, so a
///   limiter that has sat idle absorbs a matching burst at full speed.
/// * [`RateLimiter::with_warmup`] instead makes permits *more* expensive
///   after idle periods, ramping back down to the stable rate over the
///   warm-up period. Use this in front of resources that degrade when
///   hit cold, like an unwarmed cache or a fresh connection pool.
///
/// # Examples
///
/// Throttling task submission to two per second:
///
/// ```no_run
/// use pacer::RateLimiter;
///
/// # fn submit(_: ()) {}
/// # let tasks = vec![(); 3];
/// let limiter = RateLimiter::new(2.0);
/// for task in tasks {
///     limiter.acquire(); // may block
///     submit(task);
/// }
/// ```
#[derive(Debug)]
pub struct RateLimiter<C: Clock = MonotonicClock> {
    clock: C,
    state: Mutex<Smooth>,
}

/// Default maximum burst bank, in seconds of stable-rate capacity.
const MAX_BURST_SECONDS: f64 = 1.0;
/// Default ratio between the coldest per-permit cost and the stable cost.
const COLD_FACTOR: f64 = 3.0;

fn check_rate(permits_per_second: f64) {
    assert!(
        permits_per_second > 0.0 && !permits_per_second.is_nan(),
        "rate must be positive: {}",
        permits_per_second
    );
}

impl RateLimiter<MonotonicClock> {
    /// Creates a bursty `RateLimiter` with the given stable rate, able to
    /// bank up to one second of unused capacity.
    ///
    /// # Panics
    /// If `permits_per_second` is zero, negative or NaN.
    pub fn new(permits_per_second: f64) -> Self {
        RateLimiter::new_with_clock(permits_per_second, MonotonicClock::default())
    }

    /// Creates a warming-up `RateLimiter`: right after construction or an
    /// idle period, permits cost up to three times the stable interval,
    /// ramping down to the stable rate as `warmup_period` worth of
    /// traffic passes through.
    ///
    /// # Panics
    /// If `permits_per_second` is zero, negative or NaN.
    pub fn with_warmup(permits_per_second: f64, warmup_period: Duration) -> Self {
        RateLimiter::with_warmup_and_clock(
            permits_per_second,
            warmup_period,
            COLD_FACTOR,
            MonotonicClock::default(),
        )
    }

    /// Like [`RateLimiter::with_warmup`], with an explicit ratio between
    /// the cold per-permit cost and the stable one.
    ///
    /// # Panics
    /// If `permits_per_second` is zero, negative or NaN, or if
    /// `cold_factor` is below 1.
    pub fn with_warmup_and_cold_factor(
        permits_per_second: f64,
        warmup_period: Duration,
        cold_factor: f64,
    ) -> Self {
        RateLimiter::with_warmup_and_clock(
            permits_per_second,
            warmup_period,
            cold_factor,
            MonotonicClock::default(),
        )
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Creates a bursty `RateLimiter` on the given clock. Tests use this
    /// with [`FakeClock`][crate::clock::FakeClock] to drive the blocking
    /// paths deterministically.
    pub fn new_with_clock(permits_per_second: f64, clock: C) -> Self {
        check_rate(permits_per_second);
        let now = clock.now();
        RateLimiter {
            clock,
            state: Mutex::new(Smooth::new(
                Pacing::bursty(MAX_BURST_SECONDS),
                permits_per_second,
                now,
            )),
        }
    }

    /// Creates a warming-up `RateLimiter` on the given clock.
    pub fn with_warmup_and_clock(
        permits_per_second: f64,
        warmup_period: Duration,
        cold_factor: f64,
        clock: C,
    ) -> Self {
        check_rate(permits_per_second);
        assert!(cold_factor >= 1.0, "cold factor must be at least 1");
        let now = clock.now();
        let warmup_micros = Micros::from(warmup_period).as_u64() as f64;
        RateLimiter {
            clock,
            state: Mutex::new(Smooth::new(
                Pacing::warming_up(warmup_micros, cold_factor),
                permits_per_second,
                now,
            )),
        }
    }

    /// Acquires a single permit, blocking until it can be granted.
    /// Returns the time spent sleeping to enforce the rate, zero if none.
    pub fn acquire(&self) -> Duration {
        self.acquire_n(nonzero!(1u32))
    }

    /// Acquires the given number of permits, blocking until they can be
    /// granted. Returns the time spent sleeping to enforce the rate.
    pub fn acquire_n(&self, permits: NonZeroU32) -> Duration {
        let wait = self.reserve(permits.get());
        if wait > Duration::ZERO {
            self.clock.sleep(wait);
        }
        wait
    }

    /// Acquires a permit if one is available without any delay.
    ///
    /// A failed attempt leaves the limiter untouched.
    ///
    /// ```
    /// use pacer::{clock::FakeClock, RateLimiter};
    ///
    /// let limiter = RateLimiter::new_with_clock(2.0, FakeClock::default());
    /// assert!(limiter.try_acquire());
    /// assert!(!limiter.try_acquire());
    /// ```
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n_for(nonzero!(1u32), Duration::ZERO)
    }

    /// Acquires `permits` permits if they are available without any delay.
    pub fn try_acquire_n(&self, permits: NonZeroU32) -> bool {
        self.try_acquire_n_for(permits, Duration::ZERO)
    }

    /// Acquires a permit if it would be granted within `timeout`,
    /// sleeping out the required wait on success. Returns false
    /// immediately, without reserving anything, if the permit could not
    /// be granted in time.
    pub fn try_acquire_for(&self, timeout: Duration) -> bool {
        self.try_acquire_n_for(nonzero!(1u32), timeout)
    }

    /// Acquires `permits` permits if they would be granted within
    /// `timeout`. See [`RateLimiter::try_acquire_for`].
    pub fn try_acquire_n_for(&self, permits: NonZeroU32, timeout: Duration) -> bool {
        let timeout: Micros = timeout.into();
        let wait = {
            let mut state = self.state.lock();
            let now = self.clock.now();
            // Feasibility check first: a refusal must not leave any
            // trace in the reservation state.
            if state.earliest_available().saturating_sub(timeout) > now {
                return false;
            }
            let ticket = state.reserve_earliest_available(permits.get(), now);
            Duration::from(ticket.saturating_sub(now))
        };
        if wait > Duration::ZERO {
            self.clock.sleep(wait);
        }
        true
    }

    /// Updates the stable rate.
    ///
    /// Cost that throttled threads have already been charged is not
    /// repriced; since each request pays for its predecessor, the very
    /// next request is also still billed at the old rate. Everything
    /// after that observes the new rate. The pacing policy (burst bank or
    /// warm-up ramp) is preserved.
    ///
    /// # Panics
    /// If `permits_per_second` is zero, negative or NaN.
    pub fn set_rate(&self, permits_per_second: f64) {
        check_rate(permits_per_second);
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.set_rate(permits_per_second, now);
    }

    /// Returns the currently configured stable rate, in permits per
    /// second.
    pub fn rate(&self) -> f64 {
        self.state.lock().rate()
    }

    /// Reserves `permits` and returns how long the caller must sleep.
    /// The lock is held only for the reservation arithmetic; sleeping
    /// happens at the call sites, outside the lock, so concurrent
    /// callers can be asleep at the same time.
    fn reserve(&self, permits: u32) -> Duration {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let ticket = state.reserve_earliest_available(permits, now);
        ticket.saturating_sub(now).into()
    }
}

impl<C: Clock> fmt::Display for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RateLimiter[stable_rate={:.1}qps]", self.rate())
    }
}
