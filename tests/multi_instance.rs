//! S5: a server keeps a fresh instance listening after each accept, so
//! two independent clients can both connect to the same pipe name.

mod common;

use std::sync::mpsc;
use std::thread;

use napipe::{Message, MessageService, PipeConfig, Role};

#[test]
fn two_clients_connect_to_one_server_name() {
    common::init();
    let name = common::unique_pipe_name("multi-instance");

    let server = MessageService::new(PipeConfig::new(name.as_str(), Role::Server)).expect("server service");
    server.create_channel(common::echoing_callback).expect("server first instance");
    let server_for_run = server.clone();
    let server_thread = thread::spawn(move || server_for_run.run());

    let mut client_threads = Vec::new();
    let mut receivers = Vec::new();
    let mut clients = Vec::new();

    for i in 0..2u32 {
        let client = MessageService::new(PipeConfig::new(name.as_str(), Role::Client)).expect("client service");
        let (tx, rx) = mpsc::channel();
        let tx_for_factory = tx.clone();
        let token = client
            .create_channel(move || common::forwarding_callback(tx_for_factory.clone()))
            .expect("client channel");
        client.send(token, Message::new(i, format!("hello from client {}", i).into_bytes())).expect("send");

        let client_for_run = client.clone();
        client_threads.push(thread::spawn(move || client_for_run.run()));
        receivers.push(rx);
        clients.push(client);
    }

    for (i, rx) in receivers.iter().enumerate() {
        let reply = rx
            .recv_timeout(common::DEFAULT_TEST_TIMEOUT)
            .unwrap_or_else(|_| panic!("client {} never got its echo back", i));
        assert_eq!(reply.id, i as u32);
        assert_eq!(reply.payload, format!("hello from client {}", i).into_bytes());
    }

    for client in &clients {
        client.quit();
    }
    server.quit();
    for handle in client_threads {
        handle.join().expect("client thread panicked").expect("client run errored");
    }
    server_thread.join().expect("server thread panicked").expect("server run errored");
}
