//! Connection table lifecycle and exactly-once notifications

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::PLAYER;
use net_session::config::NetworkConfig;
use net_session::transport::memory::MemoryNetwork;
use net_session::{ConnectionId, NetworkId, NetworkServer, ServerEntity, SessionState};
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<(ConnectionId, Vec<NetworkId>)>>>;

fn track_disconnects(server: &mut NetworkServer) -> Log {
    let log: Log = Rc::default();
    let sink = Rc::clone(&log);
    server.on_disconnected(move |_, connection, owned| {
        sink.borrow_mut().push((connection, owned.to_vec()));
    });
    log
}

#[test]
fn test_double_disconnect_notifies_once() {
    let network = MemoryNetwork::new();
    let config = NetworkConfig::default();
    let mut server = common::server(&network, &config);
    let log = track_disconnects(&mut server);

    let (mut a, _) = common::client(&network, &config);
    let (mut b, _) = common::client(&network, &config);
    a.connect("memory").unwrap();
    b.connect("memory").unwrap();
    common::pump(&mut server, &mut [&mut a, &mut b]);
    assert_eq!(server.connections().len(), 2);

    assert!(server.disconnect(ConnectionId(1)));
    assert!(!server.disconnect(ConnectionId(1)));
    common::pump(&mut server, &mut [&mut a, &mut b]);

    assert_eq!(server.connections().len(), 1);
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(log.borrow()[0].0, ConnectionId(1));
    assert_eq!(a.state(), SessionState::Disconnected);
    assert!(b.is_connected());
}

#[test]
fn test_client_drop_is_reported_once_with_owned_ids() {
    let network = MemoryNetwork::new();
    let config = NetworkConfig::default();
    let mut server = common::server(&network, &config);
    let log = track_disconnects(&mut server);

    let (mut client, _) = common::client(&network, &config);
    client.connect("memory").unwrap();
    common::pump(&mut server, &mut [&mut client]);
    server
        .join_world(ConnectionId(1), ServerEntity::new(77, PLAYER))
        .unwrap();

    assert!(client.disconnect());
    assert!(!client.disconnect());
    common::pump(&mut server, &mut [&mut client]);

    assert!(server.connections().is_empty());
    assert_eq!(*log.borrow(), vec![(ConnectionId(1), vec![NetworkId(77)])]);
    // Manual policy: the entity outlives its owner until the caller acts
    assert!(server.spawned().contains(NetworkId(77)));
}

#[test]
fn test_connect_callbacks_and_addresses() {
    let network = MemoryNetwork::new();
    let config = NetworkConfig::default();
    let mut server = common::server(&network, &config);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    server.on_connected(move |server, connection| {
        let address = server.connection(connection).unwrap().address().to_string();
        sink.borrow_mut().push((connection, address));
    });

    let (mut client, _) = common::client(&network, &config);
    let client_connected = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&client_connected);
    client.on_connected(move |_| *counter.borrow_mut() += 1);

    assert_eq!(client.state(), SessionState::Disconnected);
    client.connect("memory").unwrap();
    assert_eq!(client.state(), SessionState::Connecting);
    common::pump(&mut server, &mut [&mut client]);

    assert_eq!(client.state(), SessionState::Connected);
    assert_eq!(*client_connected.borrow(), 1);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].0, ConnectionId(1));
    assert!(seen.borrow()[0].1.starts_with("memory:"));
}

#[test]
fn test_stop_disconnects_everyone_once() {
    let network = MemoryNetwork::new();
    let config = NetworkConfig::default();
    let mut server = common::server(&network, &config);
    let log = track_disconnects(&mut server);

    let (mut a, a_world) = common::client(&network, &config);
    let (mut b, _) = common::client(&network, &config);
    a.connect("memory").unwrap();
    b.connect("memory").unwrap();
    common::pump(&mut server, &mut [&mut a, &mut b]);
    server.spawn(ServerEntity::new(5, PLAYER), None).unwrap();
    common::pump(&mut server, &mut [&mut a, &mut b]);

    server.stop();
    assert!(!server.is_active());
    common::pump(&mut server, &mut [&mut a, &mut b]);

    assert_eq!(log.borrow().len(), 2);
    assert!(server.connections().is_empty());
    assert!(server.spawned().is_empty());
    assert!(!a.is_connected());
    assert!(!b.is_connected());
    assert_eq!(a_world.alive(), 0);
    assert_eq!(server.metrics().snapshot().connections_active, 0);
}

#[test]
fn test_client_reconnects_after_server_drop() {
    let network = MemoryNetwork::new();
    let config = NetworkConfig::default();
    let mut server = common::server(&network, &config);
    let (mut client, _) = common::client(&network, &config);

    client.connect("memory").unwrap();
    common::pump(&mut server, &mut [&mut client]);
    assert!(server.disconnect(ConnectionId(1)));
    common::pump(&mut server, &mut [&mut client]);
    assert_eq!(client.state(), SessionState::Disconnected);

    client.connect("memory").unwrap();
    common::pump(&mut server, &mut [&mut client]);
    assert!(client.is_connected());
    assert!(server.connections().contains(ConnectionId(2)));
}

#[test]
fn test_connect_without_listener_fails_softly() {
    let network = MemoryNetwork::new();
    let config = NetworkConfig::default();
    let (mut client, _) = common::client(&network, &config);

    client.connect("memory").unwrap();
    assert_eq!(client.update(), 1);
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(client.connect("memory").is_ok());
}
