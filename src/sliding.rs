//! The sliding-window rate limiter.

use std::num::NonZeroU32;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, MonotonicClock};
use crate::micros::Micros;

/// The sliding-window admission contract: no more than a fixed number of
/// admissions inside any trailing interval of the configured period,
/// independent of how the admissions bunch up within it.
pub trait SlidingWindow {
    /// Admits the caller, sleeping first if the window is full. The
    /// admission is recorded unconditionally; unlike the token bucket,
    /// there is no reject path. Returns the time spent sleeping.
    fn acquire(&self) -> Duration;

    /// Admits the caller only if no sleeping would be required. A
    /// refusal leaves the window untouched.
    fn try_acquire(&self) -> bool;

    /// Changes the required spacing for subsequent admissions. Already
    /// recorded timestamps are kept; the new period takes effect on the
    /// next admission.
    fn reset_period(&self, period: Duration);
}

/// The default [`SlidingWindow`]: a fixed-size ring of admission
/// timestamps.
///
/// The slot at the write head still holds the timestamp from one full
/// cycle ago; a new admission is allowed once that timestamp has aged
/// past the period. Overwriting it and advancing the head is all an
/// admission takes, so the critical section is a handful of loads and
/// stores — but the whole read-modify-write is one lock, because the head
/// order is exactly what the guarantee is made of.
///
/// ```
/// use nonzero_ext::nonzero;
/// use pacer::{clock::FakeClock, RingSlidingWindow, SlidingWindow};
/// use std::time::Duration;
///
/// let clock = FakeClock::default();
/// let window =
///     RingSlidingWindow::new_with_clock(nonzero!(3u32), Duration::from_secs(1), clock.clone());
/// assert!(window.try_acquire());
/// assert!(window.try_acquire());
/// assert!(window.try_acquire());
/// assert!(!window.try_acquire());
/// clock.advance(Duration::from_secs(1));
/// assert!(window.try_acquire());
/// ```
#[derive(Debug)]
pub struct RingSlidingWindow<C: Clock = MonotonicClock> {
    clock: C,
    ring: Mutex<Ring>,
}

#[derive(Debug)]
struct Ring {
    /// `None` marks a slot that has never been written; a fresh window
    /// admits its first `window_size` callers for free regardless of
    /// where the clock's origin lies.
    window: Box<[Option<Micros>]>,
    /// Next write index, wrapping mod the window size.
    head: usize,
    /// Required spacing between reuses of the same slot.
    period: Micros,
}

impl RingSlidingWindow<MonotonicClock> {
    /// Creates a window admitting `window_size` events per `period`.
    ///
    /// # Panics
    /// If `period` is zero.
    pub fn new(window_size: NonZeroU32, period: Duration) -> Self {
        RingSlidingWindow::new_with_clock(window_size, period, MonotonicClock::default())
    }
}

impl<C: Clock> RingSlidingWindow<C> {
    /// Creates a window admitting `window_size` events per `period` on
    /// the given clock.
    ///
    /// # Panics
    /// If `period` is zero.
    pub fn new_with_clock(window_size: NonZeroU32, period: Duration, clock: C) -> Self {
        assert!(!period.is_zero(), "period must not be zero");
        RingSlidingWindow {
            clock,
            ring: Mutex::new(Ring {
                window: vec![None; window_size.get() as usize].into_boxed_slice(),
                head: 0,
                period: period.into(),
            }),
        }
    }

    /// The configured window size.
    pub fn window_size(&self) -> u32 {
        self.ring.lock().window.len() as u32
    }

    /// The currently configured period.
    pub fn period(&self) -> Duration {
        self.ring.lock().period.into()
    }
}

impl<C: Clock> SlidingWindow for RingSlidingWindow<C> {
    fn acquire(&self) -> Duration {
        let wait = {
            let mut ring = self.ring.lock();
            let now = self.clock.now();
            let wait = match ring.window[ring.head] {
                Some(previous) => (previous + ring.period).saturating_sub(now),
                None => Micros::ZERO,
            };
            // Record the admission at the time it will actually take
            // effect, so the slot's next reuse is spaced off the real
            // admission moment, not off the call.
            let head = ring.head;
            ring.window[head] = Some(now + wait);
            ring.head = (head + 1) % ring.window.len();
            Duration::from(wait)
        };
        if wait > Duration::ZERO {
            self.clock.sleep(wait);
        }
        wait
    }

    fn try_acquire(&self) -> bool {
        let mut ring = self.ring.lock();
        let now = self.clock.now();
        match ring.window[ring.head] {
            Some(previous) if previous + ring.period > now => false,
            _ => {
                let head = ring.head;
                ring.window[head] = Some(now);
                ring.head = (head + 1) % ring.window.len();
                true
            }
        }
    }

    fn reset_period(&self, period: Duration) {
        assert!(!period.is_zero(), "period must not be zero");
        self.ring.lock().period = period.into();
    }
}
