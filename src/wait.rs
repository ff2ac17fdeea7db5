//! Waiting helpers that never cut a wait short.
//!
//! Every blocking primitive here can wake up before the thing it is
//! waiting for has actually happened: [`thread::park_timeout`] returns on
//! any stray unpark token, condition variables wake spuriously, and timed
//! channel receives built from `recv_timeout` drift if naively retried.
//! The helpers in this module all follow the same shape: capture the
//! deadline once, retry the underlying wait with the remaining time after
//! every early wakeup, and return only when the wait has genuinely
//! completed or the full deadline has passed.
//!
//! The rate limiters in this crate pay their reservation costs through
//! [`sleep`]; a caller (or library) that unparks a throttled thread by
//! accident therefore cannot shorten the enforced pacing.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MutexGuard};

/// Sleeps for the given duration, immune to stray unpark tokens.
///
/// Unlike a bare [`thread::park_timeout`] loop without a deadline, this
/// never returns early and never sleeps a shortened total amount, no
/// matter how often the calling thread gets unparked in the meantime.
pub fn sleep(duration: Duration) {
    // Taking the reading before any arithmetic keeps the deadline honest
    // even if the caller got preempted right after computing `duration`.
    sleep_until(Instant::now() + duration);
}

/// Sleeps until the given deadline has passed.
pub fn sleep_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

/// Waits on `condvar` until `condition` returns false or the deadline
/// passes, whichever comes first. Returns true if the wait timed out with
/// the condition still holding.
///
/// Spurious wakeups re-enter the wait with the remaining time, so the
/// total time spent blocked is bounded by the originally captured
/// deadline rather than accumulating a fresh timeout per wakeup.
pub fn wait_while_until<T, F>(
    condvar: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    deadline: Instant,
    mut condition: F,
) -> bool
where
    F: FnMut(&mut T) -> bool,
{
    while condition(guard) {
        if condvar.wait_until(guard, deadline).timed_out() {
            return condition(guard);
        }
    }
    false
}

/// Receives from `receiver`, giving up once the deadline passes.
///
/// This is `recv_timeout` with deadline semantics: however the wait gets
/// broken up internally, the total time spent blocked never exceeds the
/// distance to `deadline`.
pub fn recv_until<T>(receiver: &Receiver<T>, deadline: Instant) -> Result<T, RecvTimeoutError> {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return match receiver.try_recv() {
                Ok(value) => Ok(value),
                Err(TryRecvError::Empty) => Err(RecvTimeoutError::Timeout),
                Err(TryRecvError::Disconnected) => Err(RecvTimeoutError::Disconnected),
            };
        }
        match receiver.recv_timeout(deadline - now) {
            Err(RecvTimeoutError::Timeout) => continue,
            other => return other,
        }
    }
}

/// Receives from `receiver`, giving up after `timeout`.
pub fn recv_for<T>(receiver: &Receiver<T>, timeout: Duration) -> Result<T, RecvTimeoutError> {
    recv_until(receiver, Instant::now() + timeout)
}

#[cfg(test)]
mod test {
    use super::*;
    use all_asserts::assert_ge;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn sleep_survives_unpark_storm() {
        let sleeper = thread::spawn(|| {
            let start = Instant::now();
            sleep(Duration::from_millis(150));
            start.elapsed()
        });
        // Pre-loading an unpark token and then pelting the sleeper must
        // not shorten its sleep.
        let handle = sleeper.thread().clone();
        for _ in 0..20 {
            handle.unpark();
            thread::sleep(Duration::from_millis(1));
        }
        let slept = sleeper.join().unwrap();
        assert_ge!(slept, Duration::from_millis(150));
    }

    #[test]
    fn sleep_until_past_deadline_returns_immediately() {
        let start = Instant::now();
        sleep_until(start - Duration::from_millis(10));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn wait_while_until_times_out_with_condition_held() {
        let mutex = Mutex::new(true);
        let condvar = Condvar::new();
        let start = Instant::now();
        let mut guard = mutex.lock();
        let timed_out = wait_while_until(
            &condvar,
            &mut guard,
            start + Duration::from_millis(50),
            |pending| *pending,
        );
        assert!(timed_out);
        assert_ge!(start.elapsed(), Duration::from_millis(50));
    }

    #[test]
    fn wait_while_until_observes_notification() {
        let state = Arc::new((Mutex::new(true), Condvar::new()));
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let (mutex, condvar) = &*state;
                let mut guard = mutex.lock();
                wait_while_until(
                    condvar,
                    &mut guard,
                    Instant::now() + Duration::from_secs(5),
                    |pending| *pending,
                )
            })
        };
        thread::sleep(Duration::from_millis(20));
        {
            let (mutex, condvar) = &*state;
            *mutex.lock() = false;
            condvar.notify_one();
        }
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn recv_until_delivers_or_times_out() {
        let (tx, rx) = mpsc::channel();
        tx.send(7u32).unwrap();
        assert_eq!(
            recv_until(&rx, Instant::now() + Duration::from_millis(10)),
            Ok(7)
        );

        let start = Instant::now();
        assert_eq!(
            recv_for(&rx, Duration::from_millis(50)),
            Err(RecvTimeoutError::Timeout)
        );
        assert_ge!(start.elapsed(), Duration::from_millis(50));
    }
}
