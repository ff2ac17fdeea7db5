//! Permit-issuing rate limiters for protecting resources from overload.
//!
//! A rate limiter hands out *permits*: a caller asks for one (or N)
//! before touching the protected resource, and the limiter makes it wait
//! just long enough that the agreed rate is never exceeded. Acquired
//! permits are not returned; unlike a semaphore, which bounds how many
//! callers are inside at once, a rate limiter bounds how *often* they
//! get in.
//!
//! This crate offers three throttling disciplines behind that one idea:
//!
//! * [`RateLimiter`] — a smooth token bucket. Admissions are spread out
//!   to an even interval; unused capacity is either banked to absorb
//!   bursts ([`RateLimiter::new`]) or, inverted, makes the limiter start
//!   out slow and warm up to the stable rate
//!   ([`RateLimiter::with_warmup`]).
//! * [`PulseRateLimiter`] — a counting window. Up to `rate` admissions
//!   per trailing window, with no opinion about their spacing inside it.
//! * [`RingSlidingWindow`] (the default [`SlidingWindow`]) — a strict
//!   sliding window over a fixed ring of timestamps: no more than
//!   `window_size` admissions in any `period`-length interval, and
//!   `acquire` never rejects, it only delays.
//!
//! All limiters share the same concurrency discipline: the time a caller
//! must wait is computed under a lock held only for O(1) arithmetic, and
//! the sleeping happens outside it, so any number of throttled threads
//! can be asleep while others keep reserving.
//!
//! # Example
//!
//! ```
//! use pacer::RateLimiter;
//! use std::time::Duration;
//!
//! // 100 permits per second.
//! let limiter = RateLimiter::new(100.0);
//! // The first request through a fresh limiter never waits; it is the
//! // *next* caller that pays for it.
//! assert_eq!(limiter.acquire(), Duration::ZERO);
//! ```
//!
//! # Time and testing
//!
//! Limiters read time and sleep through the [`clock::Clock`] trait. The
//! default [`clock::MonotonicClock`] uses `std::time::Instant` and a
//! sleep that is immune to stray unparks (see [`wait`]); tests substitute
//! [`clock::FakeClock`], under which even the blocking paths complete
//! instantly and deterministically.

pub mod clock;
mod limiter;
mod micros;
mod pulse;
mod sliding;
mod smooth;
pub mod wait;

pub use crate::limiter::RateLimiter;
pub use crate::micros::Micros;
pub use crate::pulse::PulseRateLimiter;
pub use crate::sliding::{RingSlidingWindow, SlidingWindow};
