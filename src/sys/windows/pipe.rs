//! Concrete named-pipe [`Endpoint`] (component D, spec §4.D).
//!
//! Grounded on `calf::named_pipe` in
//! `examples/original_source/include/calf/platform/windows/system_services.hpp`
//! for the three construction modes (server first instance, server
//! additional instance, client open-with-busy-wait) and on
//! `mio::sys::windows::named_pipe::NamedPipe`/`Inner` for the safe
//! `ReadFile`/`WriteFile`/`ConnectNamedPipe` overlapped-submission shape.
//!
//! Departs from the teacher in exactly the way spec §9 directs: instead of
//! one `Overlapped` whose address is downcast back to an `Arc<Inner>` via
//! `overlapped2arc!`, each endpoint owns three separate, individually
//! boxed [`OverlappedSlot`]s (connect/read/write) at fixed heap addresses,
//! and [`PipeEndpoint::identify`] recovers which operation completed by
//! comparing the OS-returned pointer against those three known addresses
//! — an index lookup, not a pointer-offset cast.

use std::io;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_HANDLE_EOF, ERROR_IO_PENDING, ERROR_PIPE_BUSY,
    ERROR_PIPE_CONNECTED, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, ReadFile, WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE,
    FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING, PIPE_ACCESS_DUPLEX,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, WaitNamedPipeW,
    PIPE_READMODE_BYTE, PIPE_TYPE_BYTE, PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};
use windows_sys::Win32::System::IO::{CancelIoEx, OVERLAPPED};

use crate::config::PipeConfig;
use crate::endpoint::{self, ConnectOutcome, Endpoint};
use crate::error::{Error, Result};
use crate::overlapped::{self, OperationKind, Outcome, ReadState, WriteState};
use crate::token::Token;

use super::selector::Selector;
use super::to_wide_null;

/// A fixed-address box holding the raw `OVERLAPPED` the OS writes
/// completion bookkeeping into. Never moved once allocated; its address
/// is the correlation key for [`PipeEndpoint::identify`].
struct OverlappedSlot {
    raw: OVERLAPPED,
}

impl OverlappedSlot {
    fn new() -> Box<OverlappedSlot> {
        Box::new(OverlappedSlot {
            raw: unsafe { std::mem::zeroed() },
        })
    }

    fn reset(&mut self) {
        self.raw = unsafe { std::mem::zeroed() };
    }

    fn as_ptr(&mut self) -> *mut OVERLAPPED {
        &mut self.raw as *mut OVERLAPPED
    }

    fn addr(&self) -> usize {
        &self.raw as *const OVERLAPPED as usize
    }
}

// The slots are only ever touched while their matching `pending` flag is
// set, and only from the thread driving the reactor loop; `HANDLE` itself
// is just an integer-sized OS reference.
unsafe impl Send for OverlappedSlot {}

pub struct PipeEndpoint {
    handle: HANDLE,
    token: Token,
    connect_slot: Box<OverlappedSlot>,
    read_slot: Box<OverlappedSlot>,
    write_slot: Box<OverlappedSlot>,
    read: ReadState,
    write: WriteState,
    connected: bool,
    connect_pending: bool,
    broken: bool,
    chunk: usize,
    is_server: bool,
}

unsafe impl Send for PipeEndpoint {}

impl PipeEndpoint {
    fn new(handle: HANDLE, token: Token, chunk: usize, is_server: bool, already_connected: bool) -> PipeEndpoint {
        PipeEndpoint {
            handle,
            token,
            connect_slot: OverlappedSlot::new(),
            read_slot: OverlappedSlot::new(),
            write_slot: OverlappedSlot::new(),
            read: ReadState::default(),
            write: WriteState::default(),
            connected: already_connected,
            connect_pending: false,
            broken: false,
            chunk,
            is_server,
        }
    }

    /// Creates the first instance of a server pipe (spec §4.D: "refuses to
    /// create a named pipe if another server already owns that name").
    pub fn create_server_first(
        selector: &Selector,
        token: Token,
        config: &PipeConfig,
    ) -> Result<PipeEndpoint> {
        Self::create_server(selector, token, config, true)
    }

    /// Creates an additional server instance, bounded by
    /// `PIPE_UNLIMITED_INSTANCES` unless `server_instance_limit` says
    /// otherwise.
    pub fn create_server_additional(
        selector: &Selector,
        token: Token,
        config: &PipeConfig,
    ) -> Result<PipeEndpoint> {
        Self::create_server(selector, token, config, false)
    }

    fn create_server(
        selector: &Selector,
        token: Token,
        config: &PipeConfig,
        first_instance: bool,
    ) -> Result<PipeEndpoint> {
        let name = to_wide_null(config.pipe_name());
        let mut open_mode = PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED;
        if first_instance {
            open_mode |= FILE_FLAG_FIRST_PIPE_INSTANCE;
        }
        let max_instances = match config.server_instance_limit() {
            crate::config::InstanceLimit::Unlimited => PIPE_UNLIMITED_INSTANCES,
            crate::config::InstanceLimit::Bounded(n) => n,
        };
        let chunk = config.default_read_chunk() as u32;

        let handle = unsafe {
            CreateNamedPipeW(
                name.as_ptr(),
                open_mode,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                max_instances,
                chunk,
                chunk,
                0,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(Error::fatal(io::Error::last_os_error()));
        }

        selector
            .associate(handle, token)
            .map_err(|e| {
                unsafe {
                    CloseHandle(handle);
                }
                Error::fatal(e)
            })?;

        Ok(PipeEndpoint::new(handle, token, config.default_read_chunk(), true, false))
    }

    /// Opens an existing pipe for read+write, retrying once after a
    /// bounded wait if the OS reports the pipe busy (spec §4.D).
    pub fn open_client(selector: &Selector, token: Token, config: &PipeConfig) -> Result<PipeEndpoint> {
        let name = to_wide_null(config.pipe_name());
        let mut attempt = 0;
        loop {
            let handle = unsafe {
                CreateFileW(
                    name.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    ptr::null(),
                    OPEN_EXISTING,
                    FILE_FLAG_OVERLAPPED,
                    ptr::null_mut(),
                )
            };
            if handle != INVALID_HANDLE_VALUE {
                selector.associate(handle, token).map_err(|e| {
                    unsafe {
                        CloseHandle(handle);
                    }
                    Error::fatal(e)
                })?;
                return Ok(PipeEndpoint::new(handle, token, config.default_read_chunk(), false, true));
            }

            let code = unsafe { GetLastError() };
            if code == ERROR_PIPE_BUSY && attempt == 0 {
                attempt += 1;
                let name_again = to_wide_null(config.pipe_name());
                unsafe {
                    WaitNamedPipeW(name_again.as_ptr(), config.busy_wait_timeout_ms());
                }
                continue;
            }
            return Err(Error::fatal(io::Error::from_raw_os_error(code as i32)));
        }
    }

    fn fail_all(&mut self, err: io::Error) {
        self.broken = true;
        self.connect_pending = false;
        self.read.pending = false;
        self.write.pending = false;
        let _ = err;
    }
}

impl Drop for PipeEndpoint {
    fn drop(&mut self) {
        if self.handle != INVALID_HANDLE_VALUE && !self.handle.is_null() {
            unsafe {
                CancelIoEx(self.handle, ptr::null());
                if self.is_server {
                    FlushFileBuffers(self.handle);
                    DisconnectNamedPipe(self.handle);
                }
                CloseHandle(self.handle);
            }
        }
    }
}

impl Endpoint for PipeEndpoint {
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
        if self.connected {
            return Ok(ConnectOutcome::Immediate);
        }
        if !self.is_server {
            // A client's CreateFileW already connected synchronously.
            self.connected = true;
            return Ok(ConnectOutcome::Immediate);
        }
        if self.connect_pending {
            return Ok(ConnectOutcome::Pending);
        }

        self.connect_slot.reset();
        let ov_ptr = self.connect_slot.as_ptr();
        let ok = unsafe { ConnectNamedPipe(self.handle, ov_ptr) };
        if ok != 0 {
            self.connected = true;
            return Ok(ConnectOutcome::Immediate);
        }
        let code = unsafe { GetLastError() };
        match code {
            ERROR_IO_PENDING => {
                self.connect_pending = true;
                Ok(ConnectOutcome::Pending)
            }
            ERROR_PIPE_CONNECTED => {
                self.connected = true;
                Ok(ConnectOutcome::Immediate)
            }
            _ => Err(Error::fatal(io::Error::from_raw_os_error(code as i32))),
        }
    }

    fn submit_read(&mut self) -> Result<()> {
        if self.broken || self.read.pending {
            return Ok(());
        }
        let chunk = self.chunk;
        let target = self.read.grow_tail(chunk);
        let ptr = target.as_mut_ptr();
        let len = target.len() as u32;

        self.read_slot.reset();
        let ov_ptr = self.read_slot.as_ptr();
        let ok = unsafe { ReadFile(self.handle, ptr, len, ptr::null_mut(), ov_ptr) };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            if code != ERROR_IO_PENDING {
                if code == ERROR_HANDLE_EOF {
                    return Err(Error::PeerClosed);
                }
                return Err(Error::Io(io::Error::from_raw_os_error(code as i32)));
            }
        }
        // Per spec §4.C, even a synchronously-succeeded overlapped read
        // still completes through the completion port; do not
        // short-circuit here.
        self.read.pending = true;
        Ok(())
    }

    fn submit_write(&mut self, payload: Vec<u8>) -> Result<()> {
        if self.broken || self.write.pending {
            return Ok(());
        }
        self.write.start(payload);
        let ptr = self.write.buffer.as_ptr();
        let len = self.write.buffer.len() as u32;

        self.write_slot.reset();
        let ov_ptr = self.write_slot.as_ptr();
        let ok = unsafe { WriteFile(self.handle, ptr, len, ptr::null_mut(), ov_ptr) };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            if code != ERROR_IO_PENDING {
                return Err(Error::Io(io::Error::from_raw_os_error(code as i32)));
            }
        }
        Ok(())
    }

    fn read_buffer(&self) -> &[u8] {
        &self.read.buffer[..self.read.offset]
    }

    fn consume_read_buffer(&mut self, consumed: usize, min_capacity: usize) {
        self.read.retain_from(consumed, min_capacity);
    }

    fn drive(&mut self, kind: OperationKind, hint: overlapped::ReadinessHint) -> Result<overlapped::DriveOutcome> {
        use overlapped::DriveOutcome;

        let outcome = match hint {
            overlapped::ReadinessHint::Completed { bytes, outcome } => match outcome {
                Ok(()) => Outcome::Ok(bytes),
                Err(e) => Outcome::Err(e),
            },
            overlapped::ReadinessHint::Ready => {
                debug_assert!(false, "Windows completions always carry ReadinessHint::Completed");
                Outcome::Err(io::Error::new(io::ErrorKind::Other, "unexpected readiness hint"))
            }
        };
        match kind {
            OperationKind::Connect => {
                self.connect_pending = false;
                match outcome {
                    Outcome::Ok(_) => {
                        self.connected = true;
                        Ok(DriveOutcome::Completed)
                    }
                    Outcome::Err(e) => {
                        self.fail_all(e);
                        Ok(DriveOutcome::Broken)
                    }
                }
            }
            OperationKind::Read => match endpoint::apply_read_outcome(&mut self.read, outcome) {
                Ok(()) => Ok(DriveOutcome::Completed),
                Err(err) => {
                    self.fail_all(io::Error::new(io::ErrorKind::Other, err.to_string()));
                    Ok(DriveOutcome::Broken)
                }
            },
            OperationKind::Write => match endpoint::apply_write_outcome(&mut self.write, outcome) {
                Ok(()) => Ok(DriveOutcome::Completed),
                Err(err) => {
                    self.fail_all(io::Error::new(io::ErrorKind::Other, err.to_string()));
                    Ok(DriveOutcome::Broken)
                }
            },
        }
    }

    fn cancel(&mut self) {
        if self.handle != INVALID_HANDLE_VALUE && !self.handle.is_null() {
            unsafe {
                CancelIoEx(self.handle, ptr::null());
            }
        }
        self.connect_pending = false;
        self.read.pending = false;
        self.write.pending = false;
    }

    fn close(&mut self) {
        self.cancel();
        self.broken = true;
    }

    /// Resolves which submission slot an OS-returned `OVERLAPPED` address
    /// belongs to (spec §9's index-based correlation, replacing a
    /// pointer-offset downcast). Sound because the three slots are boxed
    /// once at construction and never reallocated or moved afterward.
    fn identify(&self, overlapped_addr: Option<usize>) -> Option<OperationKind> {
        let addr = overlapped_addr?;
        if addr == self.connect_slot.addr() {
            Some(OperationKind::Connect)
        } else if addr == self.read_slot.addr() {
            Some(OperationKind::Read)
        } else if addr == self.write_slot.addr() {
            Some(OperationKind::Write)
        } else {
            None
        }
    }
}
