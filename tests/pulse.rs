use nonzero_ext::nonzero;
use pacer::clock::{Clock, FakeClock};
use pacer::PulseRateLimiter;
use std::time::Duration;

fn limiter(rate: u32, window: Duration) -> (PulseRateLimiter<FakeClock>, FakeClock) {
    let clock = FakeClock::default();
    let limiter = PulseRateLimiter::new_with_clock(
        std::num::NonZeroU32::new(rate).unwrap(),
        window,
        clock.clone(),
    );
    (limiter, clock)
}

#[test]
fn admits_up_to_rate_per_window() {
    let (limiter, clock) = limiter(5, Duration::from_secs(1));

    for i in 0..5 {
        assert_eq!(limiter.acquire(), Duration::ZERO, "acquire #{}", i);
    }
    assert_eq!(limiter.occupancy(), 5);

    // The sixth admission in the same window must wait for the first
    // one to age out, and it is still accounted for.
    assert_eq!(limiter.acquire(), Duration::from_secs(1));
    assert_eq!(limiter.occupancy(), 6);
    assert_eq!(clock.now().as_u64(), 1_000_000);
}

#[test]
fn queued_reservations_count_against_their_own_window() {
    let (limiter, clock) = limiter(5, Duration::from_secs(1));

    for _ in 0..5 {
        limiter.acquire();
    }
    // Sleeps until t=1s and lands there.
    assert_eq!(limiter.acquire(), Duration::from_secs(1));

    // At t=1s the original five have expired and only the queued
    // reservation occupies the window: plenty of room.
    assert_eq!(limiter.acquire(), Duration::ZERO, "Now: {:?}", clock.now());
}

#[test]
fn partial_expiry_shortens_the_wait() {
    let (limiter, clock) = limiter(3, Duration::from_secs(1));

    limiter.acquire();
    limiter.acquire();
    clock.advance(Duration::from_millis(400));
    assert_eq!(limiter.acquire(), Duration::ZERO);

    // Full window at t=400ms; the oldest entry expires at t=1s.
    assert_eq!(limiter.acquire(), Duration::from_millis(600));
}

#[test]
fn batches_wait_for_enough_room_at_once() {
    let (limiter, clock) = limiter(5, Duration::from_secs(1));

    assert_eq!(limiter.acquire_n(nonzero!(3u32)), Duration::ZERO);
    // Three more don't fit next to the first three; admission needs one
    // of them to expire, i.e. the whole first batch.
    assert_eq!(limiter.acquire_n(nonzero!(3u32)), Duration::from_secs(1));
    assert_eq!(clock.now().as_u64(), 1_000_000);
    assert_eq!(limiter.occupancy(), 6);
}

#[test]
fn compaction_sweeps_expired_entries() {
    // rate == capacity, so the 101st admission forces a sweep.
    let (limiter, clock) = limiter(100, Duration::from_secs(1));

    for _ in 0..100 {
        assert_eq!(limiter.acquire(), Duration::ZERO);
    }
    assert_eq!(limiter.occupancy(), 100);

    clock.advance(Duration::from_secs(2));
    // Everything recorded so far has aged out; compaction reclaims the
    // ledger and the admission is free.
    assert_eq!(limiter.acquire(), Duration::ZERO);
    assert_eq!(limiter.occupancy(), 1);
}

#[test]
fn try_acquire_respects_the_window() {
    let (limiter, clock) = limiter(2, Duration::from_secs(1));

    assert!(limiter.try_acquire());
    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire(), "Now: {:?}", clock.now());
    // A refusal reserves nothing.
    assert!(!limiter.try_acquire(), "Now: {:?}", clock.now());
    assert_eq!(limiter.occupancy(), 2);

    clock.advance(Duration::from_millis(1001));
    assert!(limiter.try_acquire());
}

#[test]
fn try_acquire_n_refuses_oversized_batches() {
    let (limiter, _clock) = limiter(5, Duration::from_secs(1));
    assert!(!limiter.try_acquire_n(nonzero!(6u32)));
    assert!(limiter.try_acquire_n(nonzero!(5u32)));
}

#[test]
fn reports_its_configuration() {
    let (limiter, _clock) = limiter(5, Duration::from_millis(250));
    assert_eq!(limiter.rate(), 5);
    assert_eq!(limiter.time_window(), Duration::from_millis(250));
}

#[test]
fn actual_threadsafety() {
    let (limiter, _clock) = limiter(20, Duration::from_secs(1));

    crossbeam::scope(|scope| {
        for _ in 0..20 {
            scope.spawn(|_| {
                assert_eq!(limiter.acquire(), Duration::ZERO);
            });
        }
    })
    .unwrap();

    assert_eq!(limiter.occupancy(), 20);
    assert!(!limiter.try_acquire());
}
