//! A thin wrapper over an I/O completion port (component A's OS backend).
//!
//! Grounded on `calf::io_completion_port`/`calf::io_completion_service` in
//! `examples/original_source/include/calf/platform/windows/file_io.hpp`
//! for the shape (`associate`, a blocking `wait`, a `notify`/`post` to wake
//! the loop), and on `mio::sys::windows::selector::SelectorInner` for how
//! to express it with `windows-sys` instead of hand-rolled FFI. Unlike
//! both of those, the completion key handed back by `wait` is never
//! reinterpreted as a pointer here (spec §9) — it is returned to the
//! caller as an opaque [`crate::token::Token`], and the `OVERLAPPED`
//! pointer that accompanies it is likewise returned as a plain address for
//! the caller's endpoint to compare against its own submission slots.

use std::io;
use std::ptr;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_TIMEOUT};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus, OVERLAPPED,
};

use crate::token::Token;

/// One entry dequeued from the completion port: the token it was
/// associated under, the transfer byte count, the raw `OVERLAPPED`
/// address the OS handed back (`None` for a synthetic post), and whether
/// the OS reported success.
#[derive(Debug)]
pub struct RawCompletion {
    pub token: Token,
    pub bytes: usize,
    pub overlapped_addr: Option<usize>,
    pub outcome: io::Result<()>,
}

pub struct Selector {
    port: HANDLE,
}

unsafe impl Send for Selector {}
unsafe impl Sync for Selector {}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        // A NULL file handle with a zeroed completion key creates a fresh
        // port not yet associated with any device.
        let port = unsafe { CreateIoCompletionPort(-1isize as HANDLE, ptr::null_mut(), 0, 0) };
        if port.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Selector { port })
    }

    /// Associates `handle` with this port under `token`; every completion
    /// on `handle` is subsequently dequeued tagged with `token`.
    pub fn associate(&self, handle: HANDLE, token: Token) -> io::Result<()> {
        let ret = unsafe { CreateIoCompletionPort(handle, self.port, usize::from(token), 0) };
        if ret.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Blocks up to `timeout_ms` for one completion. `Ok(None)` is a
    /// timeout; `Ok(Some(_))` is a real or synthetic completion.
    pub fn wait(&self, timeout_ms: u32) -> io::Result<Option<RawCompletion>> {
        let mut bytes: u32 = 0;
        let mut key: usize = 0;
        let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

        let ok = unsafe {
            GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut overlapped, timeout_ms)
        };

        if ok == 0 {
            let err = io::Error::last_os_error();
            if overlapped.is_null() {
                if err.raw_os_error() == Some(WAIT_TIMEOUT as i32) {
                    return Ok(None);
                }
                return Err(err);
            }
            // A failed operation still completes with a valid OVERLAPPED;
            // surface it as a failed completion rather than an I/O error
            // on the selector itself (an aborted cancel is routine, not a
            // selector fault).
            let outcome = Err(err);
            return Ok(Some(RawCompletion {
                token: Token::from(key),
                bytes: bytes as usize,
                overlapped_addr: Some(overlapped as usize),
                outcome,
            }));
        }

        Ok(Some(RawCompletion {
            token: Token::from(key),
            bytes: bytes as usize,
            overlapped_addr: if overlapped.is_null() {
                None
            } else {
                Some(overlapped as usize)
            },
            outcome: Ok(()),
        }))
    }

    /// Enqueues a synthetic completion carrying no `OVERLAPPED` pointer;
    /// used by the worker service to wake a blocked waiter and by
    /// shutdown's relay-wakeup.
    pub fn post(&self, token: Token) -> io::Result<()> {
        let ret = unsafe { PostQueuedCompletionStatus(self.port, 0, usize::from(token), ptr::null_mut()) };
        if ret == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}
