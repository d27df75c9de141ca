//! Component G: the message service (spec §3 `MessageService`, §4.G).
//!
//! Grounded on `calf::pipe_message_service` in
//! `examples/original_source/include/calf/platform/windows/system_services.hpp`
//! for the create/close/run shape and the server auto-spawn rule, and on
//! `mio::Poll`'s registry-owns-handlers layout for expressing "Service owns
//! Channels; Channel owns Endpoint" (spec §9) as an owned collection behind
//! a mutex instead of the source's raw handler-pointer registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::{Callback, Channel, ChannelState};
use crate::config::PipeConfig;
use crate::error::{Error, Result};
use crate::reactor::{Completion, Reactor};
use crate::sys::PlatformEndpoint;
use crate::token::{Token, WAKE_TOKEN};
use crate::worker::WorkerService;

#[cfg(unix)]
use std::os::unix::net::UnixListener;

type CallbackFactory = dyn Fn() -> Callback + Send + Sync;

struct Inner {
    reactor: Reactor,
    worker: WorkerService,
    channels: Mutex<HashMap<Token, Channel>>,
    next_token: AtomicUsize,
    config: PipeConfig,
    factory: Mutex<Option<Arc<CallbackFactory>>>,
    first_instance_taken: AtomicBool,
    #[cfg(unix)]
    unix_listener: Mutex<Option<Arc<UnixListener>>>,
}

/// Owns the reactor, worker service, and channel collection for one pipe
/// name (spec §3 `MessageService`). Cheap to clone: internally an `Arc`,
/// so the same service handle can be shared with dispatched worker tasks
/// and the thread that calls [`MessageService::run`].
#[derive(Clone)]
pub struct MessageService {
    inner: Arc<Inner>,
}

impl MessageService {
    pub fn new(config: PipeConfig) -> Result<MessageService> {
        let reactor = Reactor::new().map_err(Error::fatal)?;
        Ok(MessageService {
            inner: Arc::new(Inner {
                reactor,
                worker: WorkerService::new(),
                channels: Mutex::new(HashMap::new()),
                next_token: AtomicUsize::new(0),
                config,
                factory: Mutex::new(None),
                first_instance_taken: AtomicBool::new(false),
                #[cfg(unix)]
                unix_listener: Mutex::new(None),
            }),
        })
    }

    fn next_token(&self) -> Token {
        Token(self.inner.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a channel, appends it to the collection under the
    /// collection mutex, and schedules its connect on the worker (spec
    /// §4.G). `make_callback` is retained as the factory for any
    /// server-side auto-spawned instances that follow this one.
    pub fn create_channel<F>(&self, make_callback: F) -> Result<Token>
    where
        F: Fn() -> Callback + Send + Sync + 'static,
    {
        let factory: Arc<CallbackFactory> = Arc::new(make_callback);
        *self.inner.factory.lock().unwrap() = Some(factory.clone());
        self.spawn_channel(factory)
    }

    fn spawn_channel(&self, factory: Arc<CallbackFactory>) -> Result<Token> {
        let token = self.next_token();
        let selector = self.inner.reactor.selector();
        let config = &self.inner.config;

        let endpoint = self.create_endpoint(selector, token, config)?;
        let callback = factory();
        let channel = Channel::new(endpoint, callback, config.max_message_size(), config.default_read_chunk());

        self.inner.channels.lock().unwrap().insert(token, channel);

        let inner = self.inner.clone();
        self.inner.worker.dispatch(move || {
            let mut channels = inner.channels.lock().unwrap();
            if let Some(channel) = channels.get_mut(&token) {
                if let Err(e) = channel.start_connect() {
                    log::warn!("channel {:?} failed to start connect: {}", token, e);
                }
                #[cfg(unix)]
                channel.rearm_interest(inner.reactor.selector());
            }
        });
        self.inner.reactor.post(WAKE_TOKEN).map_err(Error::fatal)?;
        Ok(token)
    }

    #[cfg(windows)]
    fn create_endpoint(&self, selector: &crate::sys::Selector, token: Token, config: &PipeConfig) -> Result<PlatformEndpoint> {
        match config.role() {
            crate::config::Role::Client => PlatformEndpoint::open_client(selector, token, config),
            crate::config::Role::Server => {
                if !self.inner.first_instance_taken.swap(true, Ordering::AcqRel) {
                    PlatformEndpoint::create_server_first(selector, token, config)
                } else {
                    PlatformEndpoint::create_server_additional(selector, token, config)
                }
            }
        }
    }

    #[cfg(unix)]
    fn create_endpoint(&self, selector: &crate::sys::Selector, token: Token, config: &PipeConfig) -> Result<PlatformEndpoint> {
        match config.role() {
            crate::config::Role::Client => PlatformEndpoint::open_client(selector, token, config),
            crate::config::Role::Server => {
                if !self.inner.first_instance_taken.swap(true, Ordering::AcqRel) {
                    let endpoint = PlatformEndpoint::create_server_first(selector, token, config)?;
                    if let Some(listener) = endpoint.listener() {
                        *self.inner.unix_listener.lock().unwrap() = Some(listener);
                    }
                    Ok(endpoint)
                } else {
                    let listener = self
                        .inner
                        .unix_listener
                        .lock()
                        .unwrap()
                        .clone()
                        .expect("first server instance must exist before an additional one is spawned");
                    PlatformEndpoint::create_server_additional(selector, token, listener, config)
                }
            }
        }
    }

    /// Removes a channel, closing its endpoint and cancelling pending I/O
    /// (spec §4.G). Scheduled on the worker so the removal happens on the
    /// reactor thread, per spec §3's "Channels are removed only from the
    /// loop thread."
    pub fn close_channel(&self, token: Token) {
        let inner = self.inner.clone();
        self.inner.worker.dispatch(move || {
            let mut channels = inner.channels.lock().unwrap();
            if let Some(mut channel) = channels.remove(&token) {
                channel.close();
            }
        });
        let _ = self.inner.reactor.post(WAKE_TOKEN);
    }

    /// Runs the reactor loop on the calling thread until [`MessageService::quit`]
    /// is called (spec §4.G). Returns cleanly on shutdown.
    pub fn run(&self) -> Result<()> {
        loop {
            match self.inner.reactor.wait_one(None).map_err(Error::fatal)? {
                Some(Completion::Io { token, raw_addr, hint }) => self.dispatch_io(token, raw_addr, hint),
                Some(Completion::Wake { .. }) => self.inner.worker.run_one(),
                Some(Completion::Terminal) => {
                    self.inner.worker.quit();
                    return Ok(());
                }
                None => {}
            }
        }
    }

    fn dispatch_io(&self, token: Token, raw_addr: Option<usize>, hint: crate::overlapped::ReadinessHint) {
        let mut channels = self.inner.channels.lock().unwrap();
        let channel = match channels.get_mut(&token) {
            Some(channel) => channel,
            None => return,
        };
        let kind = match channel.identify(raw_addr) {
            Some(kind) => kind,
            None => return,
        };
        let was_connecting = channel.state() == ChannelState::Connecting;
        channel.handle_completion(kind, hint);
        let just_connected = was_connecting && channel.state() == ChannelState::Connected;
        #[cfg(unix)]
        channel.rearm_interest(self.inner.reactor.selector());
        drop(channels);

        if just_connected && self.inner.config.role() == crate::config::Role::Server {
            self.auto_spawn_next_instance();
        }
    }

    /// Server-side auto-spawn (spec §4.G): once an instance accepts a
    /// connection, immediately create another non-first-instance channel
    /// so a listener is always pending. Failure is logged, not fatal.
    fn auto_spawn_next_instance(&self) {
        let factory = self.inner.factory.lock().unwrap().clone();
        let factory = match factory {
            Some(factory) => factory,
            None => return,
        };
        if let Err(e) = self.spawn_channel(factory) {
            log::warn!("failed to auto-spawn next server instance: {}", e);
        }
    }

    /// Forwards to [`Reactor::shutdown`]; `run` returns cleanly afterward
    /// (spec §4.G).
    pub fn quit(&self) {
        self.inner.reactor.shutdown();
    }

    /// Appends `message` to `token`'s send FIFO and schedules a
    /// `send_pump` on the worker (spec §4.F `send`). Returns `Err` only
    /// if `token` no longer names a live channel.
    pub fn send(&self, token: Token, message: crate::codec::Message) -> Result<()> {
        {
            let channels = self.inner.channels.lock().unwrap();
            match channels.get(&token) {
                Some(channel) => channel.send(message),
                None => return Err(Error::PeerClosed),
            }
        }
        let inner = self.inner.clone();
        self.inner.worker.dispatch(move || {
            let mut channels = inner.channels.lock().unwrap();
            if let Some(channel) = channels.get_mut(&token) {
                channel.send_pump();
                #[cfg(unix)]
                channel.rearm_interest(inner.reactor.selector());
            }
        });
        self.inner.reactor.post(WAKE_TOKEN).map_err(Error::fatal)
    }

    /// Pops the oldest unread message for `token` (spec §4.F `receive`).
    pub fn receive(&self, token: Token) -> Option<crate::codec::Message> {
        let channels = self.inner.channels.lock().unwrap();
        channels.get(&token).and_then(|channel| channel.receive())
    }

    pub fn state(&self, token: Token) -> Option<ChannelState> {
        let channels = self.inner.channels.lock().unwrap();
        channels.get(&token).map(|channel| channel.state())
    }
}
