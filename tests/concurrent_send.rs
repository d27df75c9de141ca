//! S6: many threads calling `send` on the same channel concurrently
//! don't corrupt the wire framing or drop messages.

mod common;

use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;

use napipe::{Message, MessageService, PipeConfig, Role};

#[test]
fn concurrent_senders_all_reach_the_peer() {
    common::init();
    let name = common::unique_pipe_name("concurrent-send");
    const SENDERS: u32 = 8;
    const PER_SENDER: u32 = 25;

    let server = MessageService::new(PipeConfig::new(name.as_str(), Role::Server)).expect("server service");
    let (tx, rx) = mpsc::channel();
    server
        .create_channel(move || common::forwarding_callback(tx.clone()))
        .expect("server channel");
    let server_for_run = server.clone();
    let server_thread = thread::spawn(move || server_for_run.run());

    let client = MessageService::new(PipeConfig::new(name.as_str(), Role::Client)).expect("client service");
    let client_token = client.create_channel(|| Box::new(|_: &mut napipe::Channel| {})).expect("client channel");
    let client_for_run = client.clone();
    let client_thread = thread::spawn(move || client_for_run.run());

    let mut senders = Vec::new();
    for s in 0..SENDERS {
        let client = client.clone();
        senders.push(thread::spawn(move || {
            for n in 0..PER_SENDER {
                let id = s * PER_SENDER + n;
                client
                    .send(client_token, Message::new(id, id.to_le_bytes().to_vec()))
                    .expect("send");
            }
        }));
    }
    for handle in senders {
        handle.join().expect("sender thread panicked");
    }

    let mut seen = HashSet::new();
    for _ in 0..(SENDERS * PER_SENDER) {
        let msg = rx
            .recv_timeout(common::DEFAULT_TEST_TIMEOUT)
            .expect("server never received all concurrently sent messages");
        assert_eq!(msg.payload, msg.id.to_le_bytes().to_vec(), "frame desynced under concurrent sends");
        assert!(seen.insert(msg.id), "duplicate message id {}", msg.id);
    }
    assert_eq!(seen.len(), (SENDERS * PER_SENDER) as usize);

    client.quit();
    server.quit();
    client_thread.join().expect("client thread panicked").expect("client run errored");
    server_thread.join().expect("server thread panicked").expect("server run errored");
}
