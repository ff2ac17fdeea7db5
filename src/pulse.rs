//! The pulse (counting-window) rate limiter.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nonzero_ext::nonzero;
use parking_lot::Mutex;

use crate::clock::{Clock, MonotonicClock};
use crate::micros::Micros;

/// Smallest ledger capacity; small rates still get room to defer
/// compaction.
const MIN_CAPACITY: usize = 100;

/// A rate limiter admitting at most `rate` events per rolling time
/// window.
///
/// Where [`RateLimiter`][crate::RateLimiter] smooths admissions out to an
/// even interval, a `PulseRateLimiter` only bounds the *count* per
/// trailing window: a full burst of `rate` admissions in a microsecond is
/// fine, after which the window must drain before more get through.
///
/// Admissions are recorded as timestamps in a double-buffered ledger.
/// Appending is cheap; expired entries are only swept out when occupancy
/// crosses 75% of the ledger's capacity, by a stable compacting copy into
/// the secondary buffer (amortizing the sweep instead of paying it per
/// admission). When the window is genuinely full, `acquire` computes how
/// long until the blocking entry ages out, records the reservation at
/// that future timestamp, and sleeps — so queued reservations keep
/// counting against the windows they will land in.
///
/// ```
/// use nonzero_ext::nonzero;
/// use pacer::{clock::FakeClock, PulseRateLimiter};
/// use std::time::Duration;
///
/// let clock = FakeClock::default();
/// let limiter =
///     PulseRateLimiter::new_with_clock(nonzero!(2u32), Duration::from_secs(1), clock);
/// assert_eq!(limiter.acquire(), Duration::ZERO);
/// assert_eq!(limiter.acquire(), Duration::ZERO);
/// // Window is full; the third admission waits out the first's expiry.
/// assert_eq!(limiter.acquire(), Duration::from_secs(1));
/// ```
#[derive(Debug)]
pub struct PulseRateLimiter<C: Clock = MonotonicClock> {
    clock: C,
    rate: usize,
    time_window: Micros,
    threshold: usize,
    /// Occupancy mirror of the ledger, readable without the lock.
    cur: AtomicUsize,
    ledger: Mutex<Ledger>,
}

/// The admission ledger: `worker` holds live timestamps in append order,
/// `swap` is the compaction target. The buffers trade places on every
/// sweep; neither ever shrinks its capacity.
#[derive(Debug)]
struct Ledger {
    worker: Vec<Micros>,
    swap: Vec<Micros>,
}

impl Ledger {
    fn len(&self) -> usize {
        self.worker.len()
    }

    fn append(&mut self, timestamp: Micros, permits: usize, cur: &AtomicUsize) {
        for _ in 0..permits {
            self.worker.push(timestamp);
        }
        cur.store(self.worker.len(), Ordering::Release);
    }

    /// Index of the first entry still inside the window, i.e. the length
    /// of the expired prefix. Entries are in non-decreasing timestamp
    /// order, so a linear scan from the front suffices.
    fn window_start(&self, now: Micros, window: Micros) -> usize {
        self.worker
            .iter()
            .position(|&t| t + window > now)
            .unwrap_or_else(|| self.worker.len())
    }

    /// Drops the expired prefix by a stable compacting copy into the
    /// secondary buffer, then swaps the buffers by reference. Every
    /// still-valid timestamp survives, in order.
    fn compact(&mut self, now: Micros, window: Micros, cur: &AtomicUsize) {
        let start = self.window_start(now, window);
        if start == 0 {
            return;
        }
        self.swap.clear();
        self.swap.extend_from_slice(&self.worker[start..]);
        std::mem::swap(&mut self.worker, &mut self.swap);
        self.swap.clear();
        cur.store(self.worker.len(), Ordering::Release);
    }
}

impl PulseRateLimiter<MonotonicClock> {
    /// Creates a limiter admitting `rate` events per `time_window`.
    ///
    /// # Panics
    /// If `time_window` is zero.
    pub fn new(rate: NonZeroU32, time_window: Duration) -> Self {
        PulseRateLimiter::new_with_clock(rate, time_window, MonotonicClock::default())
    }
}

impl<C: Clock> PulseRateLimiter<C> {
    /// Creates a limiter admitting `rate` events per `time_window` on the
    /// given clock.
    ///
    /// # Panics
    /// If `time_window` is zero.
    pub fn new_with_clock(rate: NonZeroU32, time_window: Duration, clock: C) -> Self {
        assert!(!time_window.is_zero(), "time window must not be zero");
        let rate = rate.get() as usize;
        let capacity = rate.max(MIN_CAPACITY);
        PulseRateLimiter {
            clock,
            rate,
            time_window: time_window.into(),
            threshold: capacity * 3 / 4,
            cur: AtomicUsize::new(0),
            ledger: Mutex::new(Ledger {
                worker: Vec::with_capacity(capacity),
                swap: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Admits one event, sleeping until the window has room for it.
    /// Returns the time spent sleeping, zero if the window had room.
    pub fn acquire(&self) -> Duration {
        self.acquire_n(nonzero!(1u32))
    }

    /// Admits `permits` events at once, sleeping until the window has
    /// room for all of them. Returns the time spent sleeping.
    ///
    /// # Panics
    /// If `permits` exceeds the per-window rate: that many simultaneous
    /// events can never fit in one window.
    pub fn acquire_n(&self, permits: NonZeroU32) -> Duration {
        let wait = self.reserve(permits.get() as usize);
        if wait > Duration::ZERO {
            self.clock.sleep(wait);
        }
        wait
    }

    /// Admits one event only if the window has room right now.
    ///
    /// A refusal leaves no trace in the window.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(nonzero!(1u32))
    }

    /// Admits `permits` events only if the window has room for all of
    /// them right now.
    pub fn try_acquire_n(&self, permits: NonZeroU32) -> bool {
        let permits = permits.get() as usize;
        if permits > self.rate {
            return false;
        }
        let mut ledger = self.ledger.lock();
        let now = self.clock.now();
        if ledger.len() >= self.threshold {
            ledger.compact(now, self.time_window, &self.cur);
        }
        let live = ledger.len() - ledger.window_start(now, self.time_window);
        if live + permits <= self.rate {
            ledger.append(now, permits, &self.cur);
            true
        } else {
            false
        }
    }

    /// The configured number of admissions per window.
    pub fn rate(&self) -> u32 {
        self.rate as u32
    }

    /// The configured window length.
    pub fn time_window(&self) -> Duration {
        self.time_window.into()
    }

    /// Current ledger occupancy (live and not-yet-swept entries), read
    /// without taking the lock.
    pub fn occupancy(&self) -> usize {
        self.cur.load(Ordering::Acquire)
    }

    /// Reserves `permits` slots and returns how long the caller must
    /// sleep. The lock covers only the ledger bookkeeping; the sleep
    /// happens at the call site.
    fn reserve(&self, permits: usize) -> Duration {
        assert!(
            permits <= self.rate,
            "requested permits ({}) exceed the per-window rate ({})",
            permits,
            self.rate
        );
        let mut ledger = self.ledger.lock();
        let now = self.clock.now();

        // Fast path: the ledger has not even seen `rate` events, expired
        // or not, so the window trivially has room.
        if ledger.len() + permits <= self.rate {
            ledger.append(now, permits, &self.cur);
            return Duration::ZERO;
        }

        // Sweep expired entries, but only once enough have piled up to
        // be worth it.
        if ledger.len() >= self.threshold {
            ledger.compact(now, self.time_window, &self.cur);
            if ledger.len() + permits <= self.rate {
                ledger.append(now, permits, &self.cur);
                return Duration::ZERO;
            }
        }

        // Count only entries actually inside the window; the expired
        // prefix may not have been swept yet.
        let start = ledger.window_start(now, self.time_window);
        let live = ledger.len() - start;
        if live + permits <= self.rate {
            ledger.append(now, permits, &self.cur);
            return Duration::ZERO;
        }

        // Full. Admission becomes possible once `live + permits - rate`
        // of the oldest live entries have aged out of the window; the
        // wait runs until the last of those expires. The reservation is
        // recorded at its effective timestamp so that later callers
        // queue up behind it.
        let blocking = start + (live + permits - self.rate) - 1;
        let wait = (ledger.worker[blocking] + self.time_window).saturating_sub(now);
        ledger.append(now + wait, permits, &self.cur);
        wait.into()
    }
}
