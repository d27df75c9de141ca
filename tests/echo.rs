//! S1: a client sends a message, the server echoes it back unchanged.

mod common;

use std::sync::mpsc;
use std::thread;

use napipe::{Message, MessageService, PipeConfig, Role};

#[test]
fn echo_roundtrip() {
    common::init();
    let name = common::unique_pipe_name("echo");

    let server = MessageService::new(PipeConfig::new(name.as_str(), Role::Server)).expect("server service");
    server.create_channel(common::echoing_callback).expect("server channel");
    let server_for_run = server.clone();
    let server_thread = thread::spawn(move || server_for_run.run());

    let client = MessageService::new(PipeConfig::new(name.as_str(), Role::Client)).expect("client service");
    let (tx, rx) = mpsc::channel();
    let tx_for_factory = tx.clone();
    let client_token = client
        .create_channel(move || common::forwarding_callback(tx_for_factory.clone()))
        .expect("client channel");

    client
        .send(client_token, Message::new(7, b"hello from the client".to_vec()))
        .expect("send");

    let reply = rx
        .recv_timeout(common::DEFAULT_TEST_TIMEOUT)
        .expect("echo reply never arrived");
    assert_eq!(reply.id, 7);
    assert_eq!(reply.payload, b"hello from the client");

    client.quit();
    server.quit();
    server_thread.join().expect("server thread panicked").expect("server run errored");
}

#[test]
fn multiple_messages_preserve_order() {
    common::init();
    let name = common::unique_pipe_name("echo-order");

    let server = MessageService::new(PipeConfig::new(name.as_str(), Role::Server)).expect("server service");
    server.create_channel(common::echoing_callback).expect("server channel");
    let server_for_run = server.clone();
    let server_thread = thread::spawn(move || server_for_run.run());

    let client = MessageService::new(PipeConfig::new(name.as_str(), Role::Client)).expect("client service");
    let (tx, rx) = mpsc::channel();
    let tx_for_factory = tx.clone();
    let client_token = client
        .create_channel(move || common::forwarding_callback(tx_for_factory.clone()))
        .expect("client channel");

    for i in 0..20u32 {
        client
            .send(client_token, Message::new(i, vec![i as u8; 37]))
            .expect("send");
    }

    for i in 0..20u32 {
        let reply = rx
            .recv_timeout(common::DEFAULT_TEST_TIMEOUT)
            .unwrap_or_else(|_| panic!("reply {} never arrived", i));
        assert_eq!(reply.id, i);
        assert_eq!(reply.payload, vec![i as u8; 37]);
    }

    client.quit();
    server.quit();
    server_thread.join().expect("server thread panicked").expect("server run errored");
}
