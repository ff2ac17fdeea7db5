//! Time sources for rate limiters.
//!
//! A [`Clock`] supplies the two things a limiter needs from its
//! environment: a monotonic microsecond reading and a way to sleep off a
//! computed wait. Keeping both behind one trait lets tests substitute a
//! [`FakeClock`], under which even the blocking `acquire` paths run
//! deterministically and instantaneously.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::micros::Micros;
use crate::wait;

/// A time source used by rate limiters.
///
/// Measurements are microseconds since an origin that is fixed per clock
/// instance but otherwise arbitrary; only differences between measurements
/// from the same clock are meaningful. Clones of a clock share the same
/// origin.
pub trait Clock: Clone {
    /// Returns a measurement of the clock.
    ///
    /// Must be monotonically non-decreasing across calls on this clock and
    /// its clones.
    fn now(&self) -> Micros;

    /// Sleeps for the given duration.
    ///
    /// Implementations must never return before the full duration has
    /// passed according to this clock. This is the seam the limiters use to
    /// pay reservation costs, always invoked outside their internal locks.
    fn sleep(&self, duration: Duration);
}

/// The default clock, measuring from a [`std::time::Instant`] captured at
/// construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock(Instant);

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock(Instant::now())
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Micros {
        self.0.elapsed().into()
    }

    fn sleep(&self, duration: Duration) {
        wait::sleep(duration);
    }
}

/// A mock implementation of a clock. All it does is keep track of what
/// "now" is, and return that.
///
/// Sleeping on a `FakeClock` advances the fake time by the requested
/// duration and returns immediately, so tests can drive the blocking
/// `acquire` paths without wall-clock delays.
///
/// # Thread safety
/// The fake time is an atomic u64 count of microseconds behind an [`Arc`].
/// Clones of this clock all show the same time, even if the original
/// advances.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now: Arc<AtomicU64>,
}

impl FakeClock {
    /// Advances the fake clock by the given amount.
    pub fn advance(&self, by: Duration) {
        let by = Micros::from(by).as_u64();

        let mut prev = self.now.load(Ordering::Acquire);
        let mut next = prev + by;
        while let Err(next_prev) =
            self.now
                .compare_exchange_weak(prev, next, Ordering::Release, Ordering::Relaxed)
        {
            prev = next_prev;
            next = prev + by;
        }
    }
}

impl PartialEq for FakeClock {
    fn eq(&self, other: &Self) -> bool {
        self.now.load(Ordering::Relaxed) == other.now.load(Ordering::Relaxed)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Micros {
        self.now.load(Ordering::Relaxed).into()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(feature = "quanta")]
mod quanta_clock {
    use super::{Clock, Micros};
    use crate::wait;
    use std::time::Duration;

    /// A clock reading time from a [`quanta::Clock`].
    ///
    /// Quanta calibrates against the processor's cycle counter, making
    /// `now` considerably cheaper than `Instant::now` on hot paths. The
    /// origin is quanta's own reference point, captured when the quanta
    /// clock initializes.
    #[derive(Debug, Clone)]
    pub struct QuantaClock(quanta::Clock);

    impl Default for QuantaClock {
        fn default() -> Self {
            QuantaClock(quanta::Clock::new())
        }
    }

    impl Clock for QuantaClock {
        fn now(&self) -> Micros {
            let nanos = self.0.delta_as_nanos(0, self.0.raw());
            Micros::from(nanos / 1_000)
        }

        fn sleep(&self, duration: Duration) {
            wait::sleep(duration);
        }
    }
}

#[cfg(feature = "quanta")]
pub use quanta_clock::QuantaClock;
