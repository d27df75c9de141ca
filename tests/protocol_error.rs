//! S3: a frame whose declared size exceeds the receiver's configured
//! limit breaks the channel instead of being buffered indefinitely.

mod common;

use std::thread;
use std::time::Duration;

use napipe::{Channel, ChannelState, Message, MessageService, PipeConfig, Role};

#[test]
fn oversize_frame_closes_receiving_channel() {
    common::init();
    let name = common::unique_pipe_name("protocol-error");

    let server = MessageService::new(
        PipeConfig::new(name.as_str(), Role::Server).with_max_message_size(64),
    )
    .expect("server service");
    let server_token = server
        .create_channel(|| Box::new(|_: &mut Channel| {}))
        .expect("server channel");
    let server_for_run = server.clone();
    let server_thread = thread::spawn(move || server_for_run.run());

    let client = MessageService::new(PipeConfig::new(name.as_str(), Role::Client)).expect("client service");
    let client_token = client
        .create_channel(|| Box::new(|_: &mut Channel| {}))
        .expect("client channel");
    let client_for_run = client.clone();
    let client_thread = thread::spawn(move || client_for_run.run());

    // A payload well past the server's 64-byte cap.
    client
        .send(client_token, Message::new(1, vec![0u8; 4096]))
        .expect("send");

    let closed = common::spin_until(
        || server.state(server_token) == Some(ChannelState::Closed),
        common::DEFAULT_TEST_TIMEOUT,
    );
    assert!(closed, "server channel never closed after receiving an oversize frame");

    client.quit();
    server.quit();
    // The client's own channel should also observe the peer going away;
    // give it a moment before tearing the threads down.
    thread::sleep(Duration::from_millis(100));
    client_thread.join().expect("client thread panicked").expect("client run errored");
    server_thread.join().expect("server thread panicked").expect("server run errored");
}
