//! Component F: the message channel (spec §3 `Channel`, §4.F).
//!
//! Grounded on `calf::pipe_message_service` in
//! `examples/original_source/include/calf/platform/windows/system_services.hpp`
//! for the send/receive FIFO split and the `send_pump`/`receive_pump` shape, and on
//! `mio::net::TcpStream`'s readiness-driven read/write loop for expressing
//! "pump until the endpoint would block" without the original's raw
//! callback-on-context indirection.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::codec::{self, Message};
use crate::endpoint::{ConnectOutcome, Endpoint};
use crate::error::{Error, Result};
use crate::overlapped::{DriveOutcome, OperationKind, ReadinessHint};
use crate::sys::PlatformEndpoint;
use crate::token::Token;

/// The channel's lifecycle (spec §3's `Channel` state set).
///
/// `Connecting` and `Connected` are each entered at most once per channel
/// (spec §4.F: "the pair (Connecting, Connected) is set at most once").
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelState {
    New,
    Connecting,
    Connected,
    Closed,
}

/// A callback invoked on the reactor thread whenever a channel's state
/// changes in a way the user should observe, or new messages arrive (spec
/// §4.F's "callback contract"). Taken out of the channel for the duration
/// of the call so the callback can freely call `send`/`receive` on `&mut
/// Channel` without a self-referential borrow.
pub type Callback = Box<dyn FnMut(&mut Channel) + Send>;

/// One endpoint plus its send/receive FIFOs and user callback (spec §3).
///
/// `send` and `receive` lock their own FIFO mutex independently, matching
/// the spec's "send FIFO mutated only under the channel's send mutex" /
/// "receive FIFO mutated only under the channel's receive mutex"
/// invariants; neither touches the endpoint directly, so they're safe to
/// call from any thread while the reactor thread drives `send_pump` /
/// `receive_pump`.
pub struct Channel {
    token: Token,
    endpoint: PlatformEndpoint,
    state: ChannelState,
    send_queue: Mutex<VecDeque<Message>>,
    recv_queue: Mutex<VecDeque<Message>>,
    callback: Option<Callback>,
    max_message_size: usize,
    default_read_chunk: usize,
}

impl Channel {
    pub(crate) fn new(endpoint: PlatformEndpoint, callback: Callback, max_message_size: usize, default_read_chunk: usize) -> Channel {
        Channel {
            token: endpoint.token(),
            endpoint,
            state: ChannelState::New,
            send_queue: Mutex::new(VecDeque::new()),
            recv_queue: Mutex::new(VecDeque::new()),
            callback: Some(callback),
            max_message_size,
            default_read_chunk,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Appends `message` to the send FIFO (spec §4.F step 1 of `send`).
    /// Actually transmitting it is the reactor thread's job, via
    /// `send_pump`; the caller only needs to make sure the reactor wakes
    /// up and eventually calls it (left to [`crate::service::MessageService`],
    /// which schedules `send_pump` on the worker after pushing).
    pub fn send(&self, message: Message) {
        self.send_queue.lock().unwrap().push_back(message);
    }

    /// Pops the oldest unread message, or `None` if the receive FIFO is
    /// empty (spec §4.F).
    pub fn receive(&self) -> Option<Message> {
        self.recv_queue.lock().unwrap().pop_front()
    }

    fn fire_callback(&mut self) {
        if let Some(mut cb) = self.callback.take() {
            cb(self);
            self.callback = Some(cb);
        }
    }

    pub(crate) fn start_connect(&mut self) -> Result<()> {
        if self.state != ChannelState::New {
            return Ok(());
        }
        self.state = ChannelState::Connecting;
        match self.endpoint.submit_connect()? {
            ConnectOutcome::Immediate => self.on_connected(),
            ConnectOutcome::Pending => {}
        }
        Ok(())
    }

    fn on_connected(&mut self) {
        self.state = ChannelState::Connected;
        self.fire_callback();
        self.send_pump();
        self.receive_pump();
    }

    fn on_broken(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.state = ChannelState::Closed;
        self.endpoint.close();
        self.fire_callback();
    }

    /// Drives the send side (spec §4.F `send_pump`): pops one message off
    /// the FIFO and submits it as a write, stopping as soon as a write is
    /// already outstanding or the channel isn't connected.
    pub(crate) fn send_pump(&mut self) {
        if self.endpoint.is_broken() || self.state != ChannelState::Connected {
            return;
        }
        let next = {
            let mut q = self.send_queue.lock().unwrap();
            q.pop_front()
        };
        let message = match next {
            Some(m) => m,
            None => return,
        };
        if let Err(e) = self.endpoint.submit_write(message.encode()) {
            self.fail(e);
        }
    }

    /// Drives the receive side (spec §4.F `receive_pump`): submits a read
    /// targeting the tail of the buffer if none is already pending.
    pub(crate) fn receive_pump(&mut self) {
        if self.endpoint.is_broken() || self.state != ChannelState::Connected {
            return;
        }
        if let Err(e) = self.endpoint.submit_read() {
            self.fail(e);
        }
    }

    fn fail(&mut self, err: Error) {
        if err.is_peer_closed() {
            log::debug!("channel {:?} peer closed", self.token);
        } else {
            log::warn!("channel {:?} failed: {}", self.token, err);
        }
        self.on_broken();
    }

    /// Resolves a reactor completion to the operation it belongs to (spec
    /// §9's index-based correlation via [`crate::endpoint::Endpoint::identify`]).
    pub(crate) fn identify(&self, raw_addr: Option<usize>) -> Option<OperationKind> {
        self.endpoint.identify(raw_addr)
    }

    /// Applies one reactor completion and re-enters the appropriate pump
    /// (spec §4.F: "on completion re-enter step 1" / "on Ok completion run
    /// the frame codec ... recurse").
    pub(crate) fn handle_completion(&mut self, kind: OperationKind, hint: ReadinessHint) {
        let outcome = self.endpoint.drive(kind, hint);
        match outcome {
            Ok(DriveOutcome::StillPending) => {}
            Ok(DriveOutcome::Broken) => self.on_broken(),
            Ok(DriveOutcome::Completed) => match kind {
                OperationKind::Connect => self.on_connected(),
                OperationKind::Write => self.send_pump(),
                OperationKind::Read => self.on_read_completed(),
            },
            Err(e) => self.fail(e),
        }
    }

    fn on_read_completed(&mut self) {
        let mut messages = Vec::new();
        let consumed = {
            let buffer = self.endpoint.read_buffer();
            match codec::decode(buffer, buffer.len(), self.max_message_size, &mut messages) {
                Ok(consumed) => consumed,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        };
        self.endpoint.consume_read_buffer(consumed, self.default_read_chunk);

        if !messages.is_empty() {
            {
                let mut q = self.recv_queue.lock().unwrap();
                q.extend(messages);
            }
            self.fire_callback();
            // The callback may have enqueued a reply (e.g. an echo) via
            // `send`; give it a chance to go out without waiting for an
            // unrelated write completion to re-enter send_pump.
            self.send_pump();
        }
        self.receive_pump();
    }

    /// Arms the epoll write interest for this channel's endpoint after a
    /// pending flag change. A no-op on Windows, where the completion port
    /// doesn't need re-arming.
    #[cfg(unix)]
    pub(crate) fn rearm_interest(&mut self, selector: &crate::sys::Selector) {
        self.endpoint.rearm_interest(selector);
    }

    pub(crate) fn close(&mut self) {
        self.endpoint.close();
        self.on_broken();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Message;

    #[test]
    fn send_and_receive_queues_are_independent_mutexes() {
        // This test exercises only the FIFO wrapper logic, not the
        // endpoint; a real Channel needs a constructed platform endpoint,
        // which integration tests cover end-to-end.
        let send_queue: Mutex<VecDeque<Message>> = Mutex::new(VecDeque::new());
        let recv_queue: Mutex<VecDeque<Message>> = Mutex::new(VecDeque::new());

        send_queue.lock().unwrap().push_back(Message::new(1, b"a".to_vec()));
        recv_queue.lock().unwrap().push_back(Message::new(2, b"b".to_vec()));

        assert_eq!(send_queue.lock().unwrap().pop_front().unwrap().id, 1);
        assert_eq!(recv_queue.lock().unwrap().pop_front().unwrap().id, 2);
    }
}
