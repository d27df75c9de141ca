//! An `epoll`-backed readiness multiplexer bridged into the reactor's
//! completion-shaped contract (spec §6's Unix-domain-socket substitution,
//! SPEC_FULL §4.L).
//!
//! Grounded on `mio::sys::unix::selector::epoll::Selector`: `epoll_create1`,
//! `epoll_ctl`, `epoll_wait`, `EPOLLET`-style registration. Unlike mio,
//! `wait` hands back one event at a time (mirroring
//! `GetQueuedCompletionStatus`'s one-shot shape on the Windows side) so the
//! rest of the crate can treat both backends identically; a small internal
//! queue holds any extra events a single `epoll_wait` call produced. A
//! self-pipe plays the role [`super::super::windows::selector::Selector::post`]
//! plays on Windows: waking a blocked `wait` with a caller-chosen token.

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Mutex;

use crate::token::Token;

/// Sentinel `overlapped_addr` values standing in for "this fd is readable"
/// / "this fd is writable", so [`crate::endpoint::Endpoint::identify`] has
/// the same `Option<usize>` shape to pattern-match on as the Windows
/// backend's real `OVERLAPPED*` addresses.
pub const READABLE: usize = 1;
pub const WRITABLE: usize = 2;

const WAKE_TAG: u64 = u64::MAX;

#[derive(Debug)]
pub struct RawCompletion {
    pub token: Token,
    pub bytes: usize,
    pub overlapped_addr: Option<usize>,
    pub outcome: io::Result<()>,
}

pub struct Selector {
    epoll_fd: OwnedFd,
    wake_read: OwnedFd,
    wake_write: OwnedFd,
    queued: Mutex<VecDeque<RawCompletion>>,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let epoll_fd = unsafe {
            let fd = libc::epoll_create1(libc::EPOLL_CLOEXEC);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            OwnedFd::from_raw_fd(fd)
        };

        let mut fds = [0i32; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let wake_read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let wake_write = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TAG,
        };
        let ret = unsafe {
            libc::epoll_ctl(epoll_fd.as_raw_fd(), libc::EPOLL_CTL_ADD, wake_read.as_raw_fd(), &mut ev)
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Selector {
            epoll_fd,
            wake_read,
            wake_write,
            queued: Mutex::new(VecDeque::new()),
        })
    }

    pub fn register(&self, fd: RawFd, token: Token, readable: bool, writable: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, readable, writable)
    }

    pub fn reregister(&self, fd: RawFd, token: Token, readable: bool, writable: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, readable, writable)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn ctl(&self, op: i32, fd: RawFd, token: Token, readable: bool, writable: bool) -> io::Result<()> {
        let mut flags = libc::EPOLLRDHUP as u32;
        if readable {
            flags |= libc::EPOLLIN as u32;
        }
        if writable {
            flags |= libc::EPOLLOUT as u32;
        }
        let mut ev = libc::epoll_event {
            events: flags,
            u64: usize::from(token) as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Enqueues a synthetic wakeup tagged `token`, for the worker service
    /// and for `Reactor::shutdown`'s relay-wakeup.
    pub fn post(&self, token: Token) -> io::Result<()> {
        self.queued.lock().unwrap().push_back(RawCompletion {
            token,
            bytes: 0,
            overlapped_addr: None,
            outcome: Ok(()),
        });
        let byte = [0u8; 1];
        let ret = unsafe { libc::write(self.wake_write.as_raw_fd(), byte.as_ptr() as *const _, 1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Blocks up to `timeout_ms` (negative = indefinite) for one
    /// completion, draining any previously queued extra events first.
    pub fn wait(&self, timeout_ms: i32) -> io::Result<Option<RawCompletion>> {
        {
            let mut queued = self.queued.lock().unwrap();
            if let Some(event) = queued.pop_front() {
                return Ok(Some(event));
            }
        }

        let mut events: [libc::epoll_event; 32] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::epoll_wait(self.epoll_fd.as_raw_fd(), events.as_mut_ptr(), events.len() as i32, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }
        if n == 0 {
            return Ok(None);
        }

        let mut queued = self.queued.lock().unwrap();
        for ev in &events[..n as usize] {
            if ev.u64 == WAKE_TAG {
                let mut drain_buf = [0u8; 64];
                while unsafe { libc::read(self.wake_read.as_raw_fd(), drain_buf.as_mut_ptr() as *mut _, drain_buf.len()) } > 0 {}
                continue;
            }
            let token = Token::from(ev.u64 as usize);
            let readable = ev.events & (libc::EPOLLIN as u32) != 0;
            let writable = ev.events & (libc::EPOLLOUT as u32) != 0;
            let errored = ev.events & ((libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) as u32) != 0;
            if readable || errored {
                queued.push_back(RawCompletion {
                    token,
                    bytes: 0,
                    overlapped_addr: Some(READABLE),
                    outcome: Ok(()),
                });
            }
            if writable || errored {
                queued.push_back(RawCompletion {
                    token,
                    bytes: 0,
                    overlapped_addr: Some(WRITABLE),
                    outcome: Ok(()),
                });
            }
        }
        Ok(queued.pop_front())
    }
}
