//! Shared per-operation bookkeeping (spec's `OperationContext`, and the
//! buffer-growth/retain rules an `Endpoint` and the frame codec both lean
//! on).
//!
//! Neither platform backend stores the OS overlap descriptor here. Per the
//! rewrite note on "OS overlap descriptor smuggled as a prefix field" (the
//! original source relies on the overlap block living at offset 0 of a
//! context so it can be downcast back after the fact; mio's own
//! `sys::windows::named_pipe` carries the same trick forward via an
//! `overlapped2arc!` offset-of macro) — each platform endpoint instead owns
//! a fixed, individually addressed submission slot per operation kind, and
//! correlates a completion to an operation by comparing the returned
//! pointer against those known addresses, never by downcasting through a
//! shared prefix.

use std::io;

/// The three operation kinds a pipe endpoint issues to the OS.
/// `Close`/`Broken`/`Wakeup` from the data model are reactor-level
/// completion tags, not endpoint submissions, and live on
/// [`crate::reactor::Completion`] instead.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OperationKind {
    Connect,
    Read,
    Write,
}

/// What the OS reported for one completed operation.
#[derive(Debug)]
pub enum Outcome {
    Ok(usize),
    Err(io::Error),
}

/// What the reactor tells an endpoint to drive an operation with.
///
/// On Windows the completion port already did the I/O; `Completed` carries
/// its result straight through. On Unix, `epoll` only reports readiness —
/// `Ready` tells the endpoint "the fd won't block now", and the endpoint
/// performs the actual `read`/`write` syscall itself and turns its result
/// into the same [`Outcome`] shape, bridging readiness into the
/// completion-shaped contract the rest of the crate is written against.
#[derive(Debug)]
pub enum ReadinessHint {
    Completed { bytes: usize, outcome: io::Result<()> },
    Ready,
}

/// What [`crate::endpoint::Endpoint::drive`] accomplished.
///
/// On Windows this is always `Completed` or `Broken` — the completion
/// port never reports a completion until the OS has finished the
/// operation. On Unix, `drive` may observe `WouldBlock` (the fd wasn't
/// actually ready for this direction after all, or only part of a write
/// went through) and report `StillPending` so the caller leaves the
/// operation outstanding rather than treating it as done.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DriveOutcome {
    Completed,
    StillPending,
    Broken,
}

/// Per-direction read state: the growing receive buffer plus the valid
/// prefix length, and whether a read is currently kernel-owned.
///
/// `buffer[..offset]` is decoded payload the codec has not yet consumed;
/// `buffer[offset..]` is scratch space a pending read targets. While
/// `pending`, the whole buffer belongs to the kernel (spec's
/// `OperationContext` invariant) and must not be touched from user code.
#[derive(Debug, Default)]
pub struct ReadState {
    pub buffer: Vec<u8>,
    pub offset: usize,
    pub pending: bool,
}

impl ReadState {
    /// Extends `buffer` so a fresh read can target `chunk` bytes past the
    /// valid prefix, preserving everything before `offset` (spec's
    /// `submit_read`: "existing payload preserved up to ctx.offset, tail
    /// extended by default_read_chunk"). Returns the target slice.
    pub fn grow_tail(&mut self, chunk: usize) -> &mut [u8] {
        let target_len = self.offset + chunk;
        if self.buffer.len() < target_len {
            self.buffer.resize(target_len, 0);
        } else {
            self.buffer.truncate(target_len);
        }
        &mut self.buffer[self.offset..target_len]
    }

    /// Applies a successful read completion: grows `offset` by `bytes`
    /// and truncates the buffer to the new valid prefix.
    pub fn complete(&mut self, bytes: usize) {
        self.offset += bytes;
        self.buffer.truncate(self.offset);
        self.pending = false;
    }

    /// Drops the first `consumed` bytes of the valid prefix, keeping the
    /// remainder as the new buffer (frame codec step 3: "retain only
    /// `[cursor, B.len)`"). Never shrinks capacity below `min_capacity`.
    pub fn retain_from(&mut self, consumed: usize, min_capacity: usize) {
        if consumed == 0 {
            return;
        }
        self.buffer.drain(0..consumed);
        self.offset -= consumed;
        if self.buffer.capacity() < min_capacity {
            self.buffer.reserve(min_capacity - self.buffer.capacity());
        }
    }
}

/// Per-direction write state: the outbound buffer currently kernel-owned,
/// if any.
#[derive(Debug, Default)]
pub struct WriteState {
    pub buffer: Vec<u8>,
    pub pending: bool,
}

impl WriteState {
    pub fn start(&mut self, payload: Vec<u8>) {
        self.buffer = payload;
        self.pending = true;
    }

    pub fn complete(&mut self) {
        self.buffer.clear();
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_tail_preserves_prefix_and_extends() {
        let mut rs = ReadState::default();
        rs.buffer.extend_from_slice(b"abcd");
        rs.offset = 4;
        {
            let tail = rs.grow_tail(4);
            tail.copy_from_slice(b"wxyz");
        }
        assert_eq!(&rs.buffer, b"abcdwxyz");
    }

    #[test]
    fn complete_advances_offset_and_truncates() {
        let mut rs = ReadState::default();
        rs.buffer = vec![0; 8];
        rs.offset = 0;
        rs.pending = true;
        rs.complete(3);
        assert_eq!(rs.offset, 3);
        assert_eq!(rs.buffer.len(), 3);
        assert!(!rs.pending);
    }

    #[test]
    fn retain_from_keeps_remainder_and_floor_capacity() {
        let mut rs = ReadState::default();
        rs.buffer = b"HELLOworld".to_vec();
        rs.offset = 10;
        rs.retain_from(5, 4096);
        assert_eq!(rs.buffer, b"world");
        assert_eq!(rs.offset, 5);
        assert!(rs.buffer.capacity() >= 4096);
    }
}
