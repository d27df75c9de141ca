#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::Once;
use std::time::{Duration, Instant};

use napipe::{Callback, Channel, Message};

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// A pipe/socket name unique enough that concurrently running tests never
/// collide, following the same `rand`-suffixed-name approach the upstream
/// named-pipe tests use.
#[cfg(windows)]
pub fn unique_pipe_name(label: &str) -> String {
    let num: u64 = rand::random();
    format!(r"\\.\pipe\napipe-test-{}-{}", label, num)
}

#[cfg(unix)]
pub fn unique_pipe_name(label: &str) -> String {
    let num: u64 = rand::random();
    std::env::temp_dir()
        .join(format!("napipe-test-{}-{}.sock", label, num))
        .to_string_lossy()
        .into_owned()
}

/// Polls `predicate` until it's true or `timeout` elapses, returning
/// whether it ever became true. Channel state transitions happen on the
/// reactor thread, so tests observing them from the outside have nothing
/// better to block on than a short poll.
pub fn spin_until<F: FnMut() -> bool>(mut predicate: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// A callback that forwards every message it receives to `tx`, letting a
/// test thread `recv_timeout` instead of polling `Channel::receive`.
pub fn forwarding_callback(tx: mpsc::Sender<Message>) -> Callback {
    Box::new(move |channel: &mut Channel| {
        while let Some(msg) = channel.receive() {
            let _ = tx.send(msg);
        }
    })
}

/// A callback that echoes every message it receives straight back to the
/// peer, unchanged.
pub fn echoing_callback() -> Callback {
    Box::new(|channel: &mut Channel| {
        while let Some(msg) = channel.receive() {
            channel.send(msg);
        }
    })
}

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);
