use all_asserts::{assert_ge, assert_lt};
use pacer::wait;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn recv_for_returns_as_soon_as_a_message_arrives() {
    let (tx, rx) = mpsc::channel();
    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        tx.send("done").unwrap();
    });

    let start = Instant::now();
    assert_eq!(wait::recv_for(&rx, Duration::from_secs(5)), Ok("done"));
    assert_lt!(start.elapsed(), Duration::from_secs(5));
    sender.join().unwrap();
}

#[test]
fn recv_for_reports_a_hung_up_sender() {
    let (tx, rx) = mpsc::channel::<u32>();
    drop(tx);
    assert_eq!(
        wait::recv_for(&rx, Duration::from_millis(10)),
        Err(RecvTimeoutError::Disconnected)
    );
}

#[test]
fn recv_until_drains_pending_messages_even_past_the_deadline() {
    let (tx, rx) = mpsc::channel();
    tx.send(1u32).unwrap();
    // A deadline already in the past still delivers what is queued.
    assert_eq!(wait::recv_until(&rx, Instant::now()), Ok(1));
    assert_eq!(
        wait::recv_until(&rx, Instant::now()),
        Err(RecvTimeoutError::Timeout)
    );
}

#[test]
fn sleep_holds_its_full_duration_across_unparks() {
    let sleeper = thread::spawn(|| {
        let start = Instant::now();
        wait::sleep(Duration::from_millis(100));
        start.elapsed()
    });
    let handle = sleeper.thread().clone();
    for _ in 0..10 {
        handle.unpark();
        thread::sleep(Duration::from_millis(2));
    }
    assert_ge!(sleeper.join().unwrap(), Duration::from_millis(100));
}
