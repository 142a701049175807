//! A single message split across two reads must be dispatched exactly once,
//! whichever transport carries it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use net_session::config::NetworkConfig;
use net_session::core::{frame_into, HEADER_SIZE};
use net_session::protocol::message::encode_payload;
use net_session::transport::memory::MemoryNetwork;
use net_session::transport::tcp::TcpServerTransport;
use net_session::transport::{ClientTransport, ServerTransport};
use net_session::{Channel, ConnectionId, NetworkMessage, NetworkServer};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::Write;
use std::net::TcpStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Position {
    x: u32,
    y: u32,
    z: u16,
}

impl NetworkMessage for Position {
    const ID: u16 = 0x0500;
}

const SAMPLE: Position = Position {
    x: 0x0102_0304,
    y: 0x0A0B_0C0D,
    z: 0xBEEF,
};

type Received = Rc<RefCell<Vec<(ConnectionId, Position)>>>;

fn record_positions(server: &mut NetworkServer) -> Received {
    let received: Received = Rc::default();
    let sink = Rc::clone(&received);
    server
        .register_handler::<Position, _>(false, move |_, connection, position| {
            sink.borrow_mut().push((connection, position));
            Ok(())
        })
        .unwrap();
    received
}

/// 2-byte id + 10-byte body behind a 4-byte header
fn sample_frame() -> Vec<u8> {
    let mut payload = Vec::new();
    encode_payload(&SAMPLE, &mut payload).unwrap();
    assert_eq!(payload.len(), 12);
    assert_eq!(&payload[..2], &[0x05, 0x00]);

    let mut frame = Vec::new();
    frame_into(&payload, &mut frame).unwrap();
    assert_eq!(frame.len(), HEADER_SIZE + 12);
    assert_eq!(&frame[..HEADER_SIZE], &[0, 0, 0, 12]);
    frame
}

#[test]
fn test_message_split_in_two_memory_reads_fires_once() {
    let network = MemoryNetwork::with_chunk_size(8);
    let config = NetworkConfig::default();
    let mut server = common::server(&network, &config);
    let received = record_positions(&mut server);

    let mut raw = network.client_transport();
    raw.connect("memory").unwrap();
    server.update();

    let frame = sample_frame();
    assert!(raw.send(&frame, Channel::Reliable));

    // Two 8-byte chunks: connect event aside, both arrive as Data events
    assert_eq!(server.update(), 2);
    assert_eq!(*received.borrow(), vec![(ConnectionId(1), SAMPLE)]);
    assert_eq!(
        server.connection(ConnectionId(1)).unwrap().buffered(),
        0,
        "nothing left behind after the second chunk"
    );

    // A second update with no traffic dispatches nothing more
    assert_eq!(server.update(), 0);
    assert_eq!(received.borrow().len(), 1);
}

#[test]
fn test_message_split_in_two_tcp_writes_fires_once() {
    let config = NetworkConfig::default();
    let mut transport = TcpServerTransport::new("127.0.0.1:0");
    transport.start().unwrap();
    let address = transport.local_addr().unwrap();
    let mut server = NetworkServer::new(&config, transport);
    server.start().unwrap();
    let received = record_positions(&mut server);

    let mut stream = TcpStream::connect(address).unwrap();
    stream.set_nodelay(true).unwrap();

    let frame = sample_frame();
    stream.write_all(&frame[..8]).unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    server.update();
    assert!(received.borrow().is_empty());

    stream.write_all(&frame[8..]).unwrap();
    stream.flush().unwrap();

    let started = Instant::now();
    while received.borrow().is_empty() && started.elapsed() < Duration::from_secs(5) {
        server.update();
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));
    server.update();

    assert_eq!(*received.borrow(), vec![(ConnectionId(1), SAMPLE)]);
    assert!(server.connections().contains(ConnectionId(1)));
}
