//! Component A: the reactor loop.
//!
//! Wraps the platform [`crate::sys::Selector`] (an I/O completion port on
//! Windows, `epoll` plus a self-pipe waker on Unix) and exposes the
//! completion-shaped contract every other module is written against,
//! grounded on `calf::io_completion_service` in
//! `examples/original_source/include/calf/platform/windows/file_io.hpp`
//! (`wait`/`notify`/`quit`) and on `mio::sys::windows::selector::Selector`
//! for doing it with safe, narrow `unsafe` blocks instead of the source's
//! raw `reinterpret_cast`-driven dispatch (spec §9).
//!
//! Registration happens inside each platform [`crate::endpoint::Endpoint`]
//! constructor via [`Reactor::selector`] rather than through a separate
//! `Reactor::register` call — the OS association (`CreateIoCompletionPort`
//! / `epoll_ctl`) only ever needs to happen once, at the point the
//! endpoint's handle first exists, and folding it into construction avoids
//! a window where a caller could forget it or double-associate.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::overlapped::ReadinessHint;
use crate::sys::Selector;
use crate::token::Token;

/// What one [`Reactor::wait_one`] call reported.
#[derive(Debug)]
pub enum Completion {
    /// A real I/O event for `token`. `raw_addr` is the value an
    /// endpoint's [`crate::endpoint::Endpoint::identify`] turns into an
    /// [`crate::overlapped::OperationKind`]; `hint` is what
    /// [`crate::endpoint::Endpoint::drive`] should do with it.
    Io {
        token: Token,
        raw_addr: Option<usize>,
        hint: ReadinessHint,
    },
    /// A synthetic wakeup posted by [`Reactor::post`] (the worker
    /// service's queue-has-work notification).
    Wake { token: Token },
    /// The reactor has shut down; no further completions will arrive.
    Terminal,
}

pub struct Reactor {
    selector: Selector,
    quit: AtomicBool,
}

impl Reactor {
    pub fn new() -> io::Result<Reactor> {
        Ok(Reactor {
            selector: Selector::new()?,
            quit: AtomicBool::new(false),
        })
    }

    /// The platform selector, for endpoint constructors to register their
    /// handle/fd against.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Blocks up to `timeout` (`None` = indefinite) for one completion.
    /// `Ok(None)` is a timeout; afterward the caller should loop back in.
    pub fn wait_one(&self, timeout: Option<Duration>) -> io::Result<Option<Completion>> {
        let timeout_ms = timeout_to_millis(timeout);
        let raw = match self.selector.wait(timeout_ms)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        if self.quit.load(Ordering::Acquire) {
            // Relay the wakeup so every other thread blocked in wait_one
            // also observes shutdown, per spec §8 property 7.
            let _ = self.selector.post(raw.token);
            return Ok(Some(Completion::Terminal));
        }

        if raw.overlapped_addr.is_none() {
            return Ok(Some(Completion::Wake { token: raw.token }));
        }

        #[cfg(windows)]
        let hint = ReadinessHint::Completed {
            bytes: raw.bytes,
            outcome: raw.outcome,
        };
        #[cfg(unix)]
        let hint = {
            let _ = raw.outcome;
            ReadinessHint::Ready
        };

        Ok(Some(Completion::Io {
            token: raw.token,
            raw_addr: raw.overlapped_addr,
            hint,
        }))
    }

    /// Enqueues a synthetic completion for `token`; used by
    /// [`crate::worker::WorkerService`] to wake a blocked `wait_one` when
    /// work is queued.
    pub fn post(&self, token: Token) -> io::Result<()> {
        self.selector.post(token)
    }

    /// Causes all current and future `wait_one` calls to return
    /// `Completion::Terminal`. Idempotent; safe from any thread.
    pub fn shutdown(&self) {
        if !self.quit.swap(true, Ordering::AcqRel) {
            let _ = self.selector.post(crate::token::WAKE_TOKEN);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

#[cfg(windows)]
fn timeout_to_millis(timeout: Option<Duration>) -> u32 {
    use windows_sys::Win32::System::Threading::INFINITE;
    match timeout {
        None => INFINITE,
        Some(d) => d.as_millis().min(u128::from(u32::MAX - 1)) as u32,
    }
}

#[cfg(unix)]
fn timeout_to_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
    }
}
