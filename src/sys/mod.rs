//! Platform backends. Windows (the design-bearing named-pipe/IOCP path) and
//! Unix (the supplementary Unix-domain-socket/epoll path, per spec §6's
//! "on hosts without named pipes, substitute a Unix-domain socket") expose
//! the same shapes — a `Selector` the [`crate::reactor::Reactor`] wraps,
//! and a `PlatformEndpoint` implementing [`crate::endpoint::Endpoint`].

#[cfg(windows)]
pub mod windows;
#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub use self::windows::selector::{RawCompletion, Selector};
#[cfg(windows)]
pub use self::windows::pipe::PipeEndpoint as PlatformEndpoint;

#[cfg(unix)]
pub use self::unix::selector::{RawCompletion, Selector};
#[cfg(unix)]
pub use self::unix::pipe::UnixPipeEndpoint as PlatformEndpoint;
