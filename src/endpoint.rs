//! The byte-stream endpoint abstraction (component C): uniform async I/O
//! over an OS handle, implemented per platform in [`crate::sys`].
//!
//! Grounded on `calf::file` / `calf::named_pipe` in
//! `examples/original_source/include/calf/platform/windows/{file_io,system_services}.hpp`
//! for the operation shape (`read`/`write`/`io_completed`/`io_broken`), and
//! on `mio::sys::windows::named_pipe::NamedPipe` for how to express the
//! same contract as safe-at-the-edges Rust instead of a raw `OVERLAPPED`
//! handler interface.

use crate::error::{Error, Result};
use crate::overlapped::{DriveOutcome, OperationKind, Outcome, ReadinessHint};
use crate::token::Token;

/// What happened when [`Endpoint::submit_connect`] was attempted.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectOutcome {
    /// Already connected (client-opened pipe, or a server accept that
    /// raced the client and landed "already connected"). The caller
    /// should treat this exactly like a `Connect` completion.
    Immediate,
    /// A `Connect` completion will arrive through the reactor.
    Pending,
}

/// A handle capable of async byte I/O (spec §3/§4.C).
///
/// Implementations own their submission slots (spec §9: "Endpoint owns its
/// submission slots") and the two [`crate::overlapped::ReadState`] /
/// [`crate::overlapped::WriteState`] records that describe what's
/// kernel-owned at any instant. Callers drive it by submitting an
/// operation, waiting for the reactor to report the matching token, then
/// calling the matching `complete_*`/`fail` method with the reactor's
/// [`Outcome`].
pub trait Endpoint: Send {
    /// The token this endpoint was registered under; completions for this
    /// endpoint arrive from [`crate::reactor::Reactor::wait_one`] tagged
    /// with this token.
    fn token(&self) -> Token;

    /// True once a `Connect` has completed successfully. Monotonic
    /// false→true (spec §5).
    fn is_connected(&self) -> bool;

    /// True once this endpoint has observed a fatal error or closure and
    /// stopped accepting new submissions.
    fn is_broken(&self) -> bool;

    /// Issues an async connect. For an endpoint that's already connected
    /// (e.g. a client-opened pipe) this returns `Immediate` without
    /// touching the OS (spec §4.C).
    fn submit_connect(&mut self) -> Result<ConnectOutcome>;

    /// Issues an async read targeting a grown tail of the receive buffer.
    /// No-op (returns `Ok(())` without submitting) if a read is already
    /// pending or the endpoint is broken.
    fn submit_read(&mut self) -> Result<()>;

    /// Issues an async write of `payload`. No-op if a write is already
    /// pending or the endpoint is broken.
    fn submit_write(&mut self, payload: Vec<u8>) -> Result<()>;

    /// The valid (decoded-but-unconsumed) prefix of the receive buffer.
    fn read_buffer(&self) -> &[u8];

    /// Drops the first `consumed` bytes of the receive buffer's valid
    /// prefix (frame codec step 3), keeping at least `min_capacity` of
    /// spare capacity.
    fn consume_read_buffer(&mut self, consumed: usize, min_capacity: usize);

    /// Drives operation `kind` using `hint` (spec §4.C's completion
    /// handling). On Windows `hint` already carries the OS's result; on
    /// Unix the endpoint performs the `read`/`write` syscall itself here.
    fn drive(&mut self, kind: OperationKind, hint: ReadinessHint) -> Result<DriveOutcome>;

    /// Cancels all pending operations; each yields a synthesized `Broken`
    /// the next time the caller polls `is_broken`. Idempotent.
    fn cancel(&mut self);

    /// Cancels and releases the underlying handle. Idempotent.
    fn close(&mut self);

    /// Resolves a reactor-reported completion address (Windows: an
    /// `OVERLAPPED*`; Unix: a readiness sentinel) to the operation it
    /// belongs to, or `None` if it isn't one of this endpoint's own
    /// submissions.
    fn identify(&self, overlapped_addr: Option<usize>) -> Option<OperationKind>;
}

/// Maps an OS-reported zero-byte read to the peer-hangup error the spec
/// requires endpoints to treat as `Broken` (spec §4.C edge cases:
/// "zero-byte reads (treated as EOF → Broken)").
pub(crate) fn classify_read(bytes: usize) -> Result<()> {
    if bytes == 0 {
        Err(Error::PeerClosed)
    } else {
        Ok(())
    }
}

/// Applies a completed read outcome to `state`, shared by every platform
/// backend's [`Endpoint::complete`] so the grow/truncate/EOF rules live
/// in one place (spec §4.C: "On Ok for a Read: grow ctx.offset by bytes,
/// truncate the buffer to ctx.offset, clear pending, invoke").
pub(crate) fn apply_read_outcome(state: &mut crate::overlapped::ReadState, outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Ok(bytes) => {
            classify_read(bytes)?;
            state.complete(bytes);
            Ok(())
        }
        Outcome::Err(e) => {
            state.pending = false;
            Err(Error::Io(e))
        }
    }
}

/// Applies a completed write outcome to `state` (spec §4.C: "On Ok for a
/// Write: clear pending, invoke the callback").
pub(crate) fn apply_write_outcome(state: &mut crate::overlapped::WriteState, outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Ok(_) => {
            state.complete();
            Ok(())
        }
        Outcome::Err(e) => {
            state.pending = false;
            Err(Error::Io(e))
        }
    }
}
