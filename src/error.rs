//! Error taxonomy (spec §7).
//!
//! The original source throws Windows structured exceptions out of
//! `CALF_CHECK`/`CALF_WIN32_CHECK` macros (see `win32_debug.hpp`,
//! `networking.hpp`'s `wsa_check`) as its only error-propagation
//! mechanism. Per the rewrite note in spec §9 ("exceptions thrown from
//! check macros as a control-flow primitive ... re-express as explicit
//! result returns at the module boundary"), every fallible public
//! operation here returns a `Result<T, Error>` instead.

use std::io;

/// Errors surfaced across the public API.
///
/// Variants line up with the kinds in spec §7's error taxonomy table.
/// `Pending` is deliberately absent: spec §7 classifies it as "not an
/// error; it drives the state machine", so it is represented as `Ok`
/// with an internal `pending` flag rather than as an `Err` variant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OS reported a retryable busy condition (pipe busy on open).
    /// Recoverable: the caller retries internally within a bounded
    /// timeout before this ever surfaces.
    #[error("pipe busy: {0}")]
    Transient(io::Error),

    /// The peer end of the connection closed. Terminal for the channel
    /// that observes it; not logged as unexpected (spec §4.D).
    #[error("peer closed the connection")]
    PeerClosed,

    /// A frame header advertised a payload larger than
    /// [`crate::config::PipeConfig::max_message_size`].
    #[error("frame of {size} bytes exceeds the {limit} byte maximum")]
    ProtocolError { size: u64, limit: u64 },

    /// A condition that can't be repaired by this process: handle
    /// registration failed, the client exhausted its busy-wait retry,
    /// or an allocation for a submission buffer failed.
    #[error("fatal local failure: {0}")]
    FatalLocal(io::Error),

    /// Any other OS-level failure that doesn't classify as one of the
    /// above; propagated as-is.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True if this error represents the normal, expected end-of-life of
    /// a channel (peer hangup) rather than an operational failure.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Error::PeerClosed)
    }

    pub(crate) fn fatal(err: io::Error) -> Error {
        Error::FatalLocal(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
