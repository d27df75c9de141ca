//! A Unix-domain-socket [`Endpoint`], bridging `epoll` readiness into the
//! same completion-shaped contract [`super::super::windows::pipe::PipeEndpoint`]
//! exposes (spec §6: "on hosts without named pipes, substitute a
//! Unix-domain socket ... the wire format is unchanged"; SPEC_FULL §4.L).
//!
//! A server's first instance binds and listens; additional instances
//! `dup` that listener's file descriptor so each has its own epoll
//! registration over the same backlog, mirroring how a named pipe's
//! additional instances are independent kernel objects bound to one name.
//! A client connects with the same bounded busy-wait retry the pipe
//! backend uses for `ERROR_PIPE_BUSY`.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PipeConfig;
use crate::endpoint::{self, ConnectOutcome, Endpoint};
use crate::error::{Error, Result};
use crate::overlapped::{DriveOutcome, OperationKind, Outcome, ReadState, ReadinessHint, WriteState};
use crate::token::Token;

use super::selector::{Selector, READABLE, WRITABLE};

enum State {
    Listening(Arc<UnixListener>),
    Stream(UnixStream),
    Broken,
}

pub struct UnixPipeEndpoint {
    token: Token,
    state: State,
    read: ReadState,
    write: WriteState,
    connected: bool,
    broken: bool,
    chunk: usize,
    /// Whether the current `State::Stream` fd has an epoll registration
    /// yet. A fd accepted off a listener has never been `epoll_ctl`'d;
    /// one opened directly (`open_client`) is registered at construction.
    /// `rearm` uses this to choose `ADD` vs. `MOD`.
    stream_registered: bool,
    /// The listening fd's own registration, still live under this token
    /// after `accept()` moves `state` to `Stream`, waiting to be
    /// `EPOLL_CTL_DEL`'d on the next `rearm`.
    pending_deregister: Option<RawFd>,
}

impl UnixPipeEndpoint {
    /// Binds a fresh listener at `config.pipe_name()`, removing a stale
    /// socket file left over from a previous run (the Unix-domain
    /// equivalent of the first-instance marker rejecting name squatting
    /// only goes as far as "this process now owns the path").
    pub fn create_server_first(selector: &Selector, token: Token, config: &PipeConfig) -> Result<UnixPipeEndpoint> {
        let path = config.pipe_name();
        if Path::new(path).exists() {
            std::fs::remove_file(path).map_err(Error::fatal)?;
        }
        let listener = UnixListener::bind(path).map_err(Error::fatal)?;
        listener.set_nonblocking(true).map_err(Error::fatal)?;
        selector
            .register(listener.as_raw_fd(), token, true, false)
            .map_err(Error::fatal)?;
        Ok(UnixPipeEndpoint {
            token,
            state: State::Listening(Arc::new(listener)),
            read: ReadState::default(),
            write: WriteState::default(),
            connected: false,
            broken: false,
            chunk: config.default_read_chunk(),
            stream_registered: false,
            pending_deregister: None,
        })
    }

    /// Duplicates `listener`'s descriptor and registers it under a fresh
    /// token, so this instance can independently observe and win accepts
    /// off the same backlog.
    pub fn create_server_additional(
        selector: &Selector,
        token: Token,
        listener: Arc<UnixListener>,
        config: &PipeConfig,
    ) -> Result<UnixPipeEndpoint> {
        let dup_fd = unsafe { libc::dup(listener.as_raw_fd()) };
        if dup_fd < 0 {
            return Err(Error::fatal(io::Error::last_os_error()));
        }
        let dup_listener = unsafe { UnixListener::from_raw_fd(dup_fd) };
        dup_listener.set_nonblocking(true).map_err(Error::fatal)?;
        selector
            .register(dup_listener.as_raw_fd(), token, true, false)
            .map_err(Error::fatal)?;
        Ok(UnixPipeEndpoint {
            token,
            state: State::Listening(Arc::new(dup_listener)),
            read: ReadState::default(),
            write: WriteState::default(),
            connected: false,
            broken: false,
            chunk: config.default_read_chunk(),
            stream_registered: false,
            pending_deregister: None,
        })
    }

    /// Connects to an existing listener, retrying for up to
    /// `busy_wait_timeout_ms` if the server hasn't created its instance
    /// yet (spec §4.D's client busy-wait, re-expressed for the
    /// `ECONNREFUSED`/`ENOENT` a socket path gives instead of
    /// `ERROR_PIPE_BUSY`).
    pub fn open_client(selector: &Selector, token: Token, config: &PipeConfig) -> Result<UnixPipeEndpoint> {
        let path = config.pipe_name();
        let deadline = Instant::now() + Duration::from_millis(config.busy_wait_timeout_ms() as u64);
        loop {
            match UnixStream::connect(path) {
                Ok(stream) => {
                    stream.set_nonblocking(true).map_err(Error::fatal)?;
                    selector
                        .register(stream.as_raw_fd(), token, true, false)
                        .map_err(Error::fatal)?;
                    return Ok(UnixPipeEndpoint {
                        token,
                        state: State::Stream(stream),
                        read: ReadState::default(),
                        write: WriteState::default(),
                        connected: true,
                        broken: false,
                        chunk: config.default_read_chunk(),
                        stream_registered: true,
                        pending_deregister: None,
                    });
                }
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused)
                        && Instant::now() < deadline =>
                {
                    std::thread::sleep(Duration::from_millis(20));
                    continue;
                }
                Err(e) => return Err(Error::fatal(e)),
            }
        }
    }

    /// Exposes the shared listener so the service can spin up the next
    /// auto-spawned instance (spec §4.G).
    pub fn listener(&self) -> Option<Arc<UnixListener>> {
        match &self.state {
            State::Listening(listener) => Some(listener.clone()),
            _ => None,
        }
    }

    fn stream_fd(&self) -> Option<RawFd> {
        match &self.state {
            State::Stream(stream) => Some(stream.as_raw_fd()),
            _ => None,
        }
    }

    /// Brings this endpoint's stream epoll interest up to date with its
    /// current pending flags. A fd just accepted off a listener has
    /// never been added to epoll, so the first call after a connect must
    /// `ADD` rather than `MOD`.
    fn rearm(&mut self, selector: &Selector) {
        if let Some(old_fd) = self.pending_deregister.take() {
            let _ = selector.deregister(old_fd);
        }
        if let Some(fd) = self.stream_fd() {
            if self.stream_registered {
                let _ = selector.reregister(fd, self.token, true, self.write.pending);
            } else {
                let _ = selector.register(fd, self.token, true, self.write.pending);
                self.stream_registered = true;
            }
        }
    }
}

impl Endpoint for UnixPipeEndpoint {
    fn token(&self) -> Token {
        self.token
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn submit_connect(&mut self) -> Result<ConnectOutcome> {
        if self.broken {
            return Err(Error::PeerClosed);
        }
        match &self.state {
            State::Stream(_) => Ok(ConnectOutcome::Immediate),
            State::Listening(listener) => match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(true).map_err(Error::fatal)?;
                    self.pending_deregister = Some(listener.as_raw_fd());
                    self.state = State::Stream(stream);
                    self.connected = true;
                    Ok(ConnectOutcome::Immediate)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ConnectOutcome::Pending),
                Err(e) => Err(Error::fatal(e)),
            },
            State::Broken => Err(Error::PeerClosed),
        }
    }

    fn submit_read(&mut self) -> Result<()> {
        if self.broken || self.read.pending {
            return Ok(());
        }
        self.read.pending = true;
        Ok(())
    }

    fn submit_write(&mut self, payload: Vec<u8>) -> Result<()> {
        if self.broken || self.write.pending {
            return Ok(());
        }
        self.write.start(payload);
        Ok(())
    }

    fn read_buffer(&self) -> &[u8] {
        &self.read.buffer[..self.read.offset]
    }

    fn consume_read_buffer(&mut self, consumed: usize, min_capacity: usize) {
        self.read.retain_from(consumed, min_capacity);
    }

    fn drive(&mut self, kind: OperationKind, hint: ReadinessHint) -> Result<DriveOutcome> {
        debug_assert!(matches!(hint, ReadinessHint::Ready), "Unix readiness never precomputes an outcome");

        match kind {
            OperationKind::Connect => match self.submit_connect() {
                Ok(ConnectOutcome::Immediate) => Ok(DriveOutcome::Completed),
                Ok(ConnectOutcome::Pending) => Ok(DriveOutcome::StillPending),
                Err(e) => {
                    self.broken = true;
                    let _ = e;
                    Ok(DriveOutcome::Broken)
                }
            },
            OperationKind::Read => {
                let chunk = self.chunk;
                let fd = match self.stream_fd() {
                    Some(fd) => fd,
                    None => return Ok(DriveOutcome::StillPending),
                };
                let target = self.read.grow_tail(chunk);
                let mut stream = unsafe { std::mem::ManuallyDrop::new(UnixStream::from_raw_fd(fd)) };
                match stream.read(target) {
                    Ok(n) => match endpoint::apply_read_outcome(&mut self.read, Outcome::Ok(n)) {
                        Ok(()) => Ok(DriveOutcome::Completed),
                        Err(_) => {
                            self.broken = true;
                            Ok(DriveOutcome::Broken)
                        }
                    },
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(DriveOutcome::StillPending),
                    Err(e) => {
                        let _ = endpoint::apply_read_outcome(&mut self.read, Outcome::Err(e));
                        self.broken = true;
                        Ok(DriveOutcome::Broken)
                    }
                }
            }
            OperationKind::Write => {
                let fd = match self.stream_fd() {
                    Some(fd) => fd,
                    None => return Ok(DriveOutcome::StillPending),
                };
                let mut stream = unsafe { std::mem::ManuallyDrop::new(UnixStream::from_raw_fd(fd)) };
                match stream.write(&self.write.buffer) {
                    Ok(n) if n == self.write.buffer.len() => {
                        match endpoint::apply_write_outcome(&mut self.write, Outcome::Ok(n)) {
                            Ok(()) => Ok(DriveOutcome::Completed),
                            Err(_) => {
                                self.broken = true;
                                Ok(DriveOutcome::Broken)
                            }
                        }
                    }
                    Ok(n) => {
                        // Partial write: keep the remainder pending for the
                        // next writable readiness instead of completing.
                        self.write.buffer.drain(0..n);
                        Ok(DriveOutcome::StillPending)
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(DriveOutcome::StillPending),
                    Err(e) => {
                        let _ = endpoint::apply_write_outcome(&mut self.write, Outcome::Err(e));
                        self.broken = true;
                        Ok(DriveOutcome::Broken)
                    }
                }
            }
        }
    }

    fn cancel(&mut self) {
        self.read.pending = false;
        self.write.pending = false;
    }

    fn close(&mut self) {
        self.cancel();
        self.broken = true;
        self.state = State::Broken;
    }

    fn identify(&self, overlapped_addr: Option<usize>) -> Option<OperationKind> {
        let addr = overlapped_addr?;
        match &self.state {
            State::Listening(_) => {
                if addr == READABLE {
                    Some(OperationKind::Connect)
                } else {
                    None
                }
            }
            State::Stream(_) => {
                if addr == READABLE && self.read.pending {
                    Some(OperationKind::Read)
                } else if addr == WRITABLE && self.write.pending {
                    Some(OperationKind::Write)
                } else {
                    None
                }
            }
            State::Broken => None,
        }
    }
}

impl UnixPipeEndpoint {
    /// Re-arms epoll interest for this endpoint's stream after a
    /// pending flag changes, keeping write-readiness subscribed only
    /// while a write is outstanding. Exposed for
    /// [`crate::channel::Channel`]'s pumps to call after submitting.
    pub fn rearm_interest(&mut self, selector: &Selector) {
        self.rearm(selector);
    }
}
