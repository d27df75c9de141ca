//! A completion-port-driven reactor and a length-prefixed, framed duplex
//! message channel on top of named pipes (Unix: domain sockets, same wire
//! format).
//!
//! The pieces, smallest to largest:
//!
//! - [`Reactor`] multiplexes OS completions (an I/O completion port on
//!   Windows, `epoll` plus a self-pipe waker on Unix) into one blocking
//!   `wait_one` call.
//! - [`WorkerService`] is a FIFO task queue drained by whichever thread
//!   calls `run_one`/`run_loop`, used to bridge arbitrary work back onto
//!   the reactor thread.
//! - [`Endpoint`] is the async byte-stream contract a platform pipe
//!   backend implements; [`codec`] frames messages over it.
//! - [`Channel`] pairs one endpoint with per-direction queues and a user
//!   callback; [`MessageService`] owns a collection of channels plus the
//!   reactor and worker that drive them, and auto-spawns the next server
//!   instance once one accepts.
//!
//! ```no_run
//! use napipe::{Callback, Channel, MessageService, PipeConfig, Role};
//!
//! fn make_callback() -> Callback {
//!     Box::new(|channel: &mut Channel| {
//!         while let Some(msg) = channel.receive() {
//!             log::info!("received {} bytes", msg.payload.len());
//!         }
//!     })
//! }
//!
//! let config = PipeConfig::new(r"\\.\pipe\example", Role::Server);
//! let service = MessageService::new(config)?;
//! let token = service.create_channel(make_callback)?;
//! # let _ = token;
//! # let service_for_quit = service.clone();
//! # std::thread::spawn(move || service_for_quit.quit());
//! service.run()?;
//! # Ok::<(), napipe::Error>(())
//! ```

mod channel;
mod codec;
mod config;
mod endpoint;
mod error;
mod overlapped;
mod reactor;
mod service;
mod sys;
mod token;
mod worker;

pub use channel::{Callback, Channel, ChannelState};
pub use codec::{decode, encode, Message};
pub use config::{InstanceLimit, PipeConfig, Role};
pub use endpoint::{ConnectOutcome, Endpoint};
pub use error::{Error, Result};
pub use overlapped::{DriveOutcome, OperationKind, ReadinessHint};
pub use reactor::{Completion, Reactor};
pub use service::MessageService;
pub use token::{Token, WAKE_TOKEN};
pub use worker::{TaskHandle, WorkerService};
