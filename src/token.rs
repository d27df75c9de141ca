//! Opaque identifiers handed out by [`crate::Reactor::register`] and echoed
//! back on every completion.
//!
//! This replaces the source's pattern of storing a raw integer that is later
//! `reinterpret_cast` to a handler base-class pointer (see `calf::io_completion_service`
//! in the original source, and the rewrite note in spec §9). A `Token` is an
//! opaque handle the caller chose; the reactor never interprets it as
//! anything but a `usize` round-tripped through the OS completion queue.

use std::fmt;

/// An opaque per-registration identifier.
///
/// Tokens are caller-assigned (mirroring `mio::Token`): the reactor does not
/// allocate them and does not dereference them as pointers. A completion's
/// `token` is always exactly the value passed to `register`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Token(pub usize);

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

/// The token the worker service posts to the reactor to wake a blocked
/// `wait_one` call when a task has been queued. It carries no endpoint
/// identity; the run loop treats a completion with a `None` overlapped
/// pointer as "drain the worker queue", regardless of which token it used.
pub const WAKE_TOKEN: Token = Token(usize::MAX);
