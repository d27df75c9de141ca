//! S2: a client started before its server retries opening the pipe until
//! the server exists, instead of failing immediately.

mod common;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use napipe::{ChannelState, MessageService, PipeConfig, Role};

#[test]
fn client_waits_for_server_to_appear() {
    common::init();
    let name = common::unique_pipe_name("busy-wait");

    let client = MessageService::new(
        PipeConfig::new(name.as_str(), Role::Client).with_busy_wait_timeout_ms(4000),
    )
    .expect("client service");

    // `create_channel` busy-waits synchronously on the calling thread until
    // the server's instance appears, so the open has to happen in the
    // background for the server below to actually get a chance to start up
    // while the client is still retrying.
    let (token_tx, token_rx) = mpsc::channel();
    let client_for_connect = client.clone();
    thread::spawn(move || {
        let token = client_for_connect
            .create_channel(|| Box::new(|_: &mut napipe::Channel| {}))
            .expect("client channel");
        let _ = token_tx.send(token);
    });
    let client_for_run = client.clone();
    let client_thread = thread::spawn(move || client_for_run.run());

    // Give the client's connect attempt(s) a head start before the server
    // exists at all.
    thread::sleep(Duration::from_millis(200));

    let server = MessageService::new(PipeConfig::new(name.as_str(), Role::Server)).expect("server service");
    server.create_channel(|| Box::new(|_: &mut napipe::Channel| {})).expect("server channel");
    let server_for_run = server.clone();
    let server_thread = thread::spawn(move || server_for_run.run());

    let client_token = token_rx
        .recv_timeout(common::DEFAULT_TEST_TIMEOUT)
        .expect("client's busy-wait connect never returned");

    let connected = common::spin_until(
        || client.state(client_token) == Some(ChannelState::Connected),
        common::DEFAULT_TEST_TIMEOUT,
    );
    assert!(connected, "client never reached Connected despite server appearing within its busy-wait budget");

    client.quit();
    server.quit();
    client_thread.join().expect("client thread panicked").expect("client run errored");
    server_thread.join().expect("server thread panicked").expect("server run errored");
}
