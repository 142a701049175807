//! # Memory Transport
//!
//! In-process loopback: one server endpoint and any number of client endpoints
//! sharing a [`MemoryNetwork`] hub. Used for host mode (server and client in the
//! same process) and for tests.
//!
//! Bytes are delivered in send order. With [`MemoryNetwork::with_chunk_size`] every
//! send is split into pieces of at most that many bytes, the way a socket hands out
//! partial reads.
//!
//! ## Example
//! ```rust
//! use net_session::transport::memory::MemoryNetwork;
//! use net_session::transport::{Channel, ClientEvent, ClientTransport, ServerEvent, ServerTransport};
//!
//! let network = MemoryNetwork::with_chunk_size(3);
//! let mut server = network.server_transport();
//! let mut client = network.client_transport();
//!
//! server.start().unwrap();
//! client.connect("memory").unwrap();
//! assert_eq!(client.poll(), Some(ClientEvent::Connected));
//! assert!(matches!(server.poll(), Some(ServerEvent::Connected(_))));
//!
//! assert!(client.send(b"hello", Channel::Reliable));
//! let mut received = Vec::new();
//! while let Some(ServerEvent::Data(_, chunk)) = server.poll() {
//!     received.extend_from_slice(&chunk);
//! }
//! assert_eq!(received, b"hello");
//! ```

use super::{Channel, ClientEvent, ClientTransport, ServerEvent, ServerTransport};
use crate::error::Result;
use crate::server::connection::ConnectionId;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct ClientSlot {
    events: VecDeque<ClientEvent>,
    connection: Option<ConnectionId>,
}

#[derive(Debug)]
struct Hub {
    listening: bool,
    next_connection: u32,
    server_events: VecDeque<ServerEvent>,
    links: HashMap<ConnectionId, usize>,
    clients: Vec<ClientSlot>,
    chunk_size: Option<usize>,
}

impl Hub {
    fn new(chunk_size: Option<usize>) -> Self {
        Self {
            listening: false,
            next_connection: 1,
            server_events: VecDeque::new(),
            links: HashMap::new(),
            clients: Vec::new(),
            chunk_size,
        }
    }

    fn pieces<'a>(&self, bytes: &'a [u8]) -> impl Iterator<Item = Bytes> + 'a {
        let size = self.chunk_size.unwrap_or(bytes.len()).max(1);
        bytes.chunks(size).map(Bytes::copy_from_slice)
    }

    fn close_link(&mut self, connection: ConnectionId) -> bool {
        let Some(slot) = self.links.remove(&connection) else {
            return false;
        };
        let client = &mut self.clients[slot];
        client.connection = None;
        client.events.push_back(ClientEvent::Disconnected);
        true
    }
}

/// Shared in-process network hub
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryNetwork {
    /// Hub delivering each send as one chunk
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::new(None))),
        }
    }

    /// Hub splitting every send into chunks of at most `chunk_size` bytes
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::new(Some(chunk_size.max(1))))),
        }
    }

    /// Change the delivery chunk size for subsequent sends
    pub fn set_chunk_size(&self, chunk_size: Option<usize>) {
        lock(&self.hub).chunk_size = chunk_size.map(|n| n.max(1));
    }

    /// The server endpoint. A hub serves one listening server at a time.
    pub fn server_transport(&self) -> MemoryServerTransport {
        MemoryServerTransport {
            hub: Arc::clone(&self.hub),
        }
    }

    /// A new client endpoint
    pub fn client_transport(&self) -> MemoryClientTransport {
        let mut hub = lock(&self.hub);
        hub.clients.push(ClientSlot::default());
        MemoryClientTransport {
            hub: Arc::clone(&self.hub),
            slot: hub.clients.len() - 1,
        }
    }

    /// Connections currently linked
    pub fn connection_count(&self) -> usize {
        lock(&self.hub).links.len()
    }
}

/// Server endpoint of a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryServerTransport {
    hub: Arc<Mutex<Hub>>,
}

impl ServerTransport for MemoryServerTransport {
    fn start(&mut self) -> Result<()> {
        lock(&self.hub).listening = true;
        debug!("Memory transport listening");
        Ok(())
    }

    fn is_active(&self) -> bool {
        lock(&self.hub).listening
    }

    fn send(&mut self, connection: ConnectionId, bytes: &[u8], _channel: Channel) -> bool {
        let mut hub = lock(&self.hub);
        let Some(&slot) = hub.links.get(&connection) else {
            return false;
        };
        let pieces: Vec<Bytes> = hub.pieces(bytes).collect();
        trace!(connection = %connection, len = bytes.len(), chunks = pieces.len(), "Delivering to client");
        hub.clients[slot]
            .events
            .extend(pieces.into_iter().map(ClientEvent::Data));
        true
    }

    fn disconnect(&mut self, connection: ConnectionId) -> bool {
        lock(&self.hub).close_link(connection)
    }

    fn address(&self, connection: ConnectionId) -> Option<String> {
        lock(&self.hub)
            .links
            .get(&connection)
            .map(|slot| format!("memory:{slot}"))
    }

    fn stop(&mut self) {
        let mut hub = lock(&self.hub);
        hub.listening = false;
        let connections: Vec<ConnectionId> = hub.links.keys().copied().collect();
        for connection in connections {
            hub.close_link(connection);
        }
        hub.server_events.clear();
    }

    fn poll(&mut self) -> Option<ServerEvent> {
        lock(&self.hub).server_events.pop_front()
    }
}

/// Client endpoint of a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryClientTransport {
    hub: Arc<Mutex<Hub>>,
    slot: usize,
}

impl ClientTransport for MemoryClientTransport {
    /// The address is ignored; a client always reaches its hub's server.
    fn connect(&mut self, _address: &str) -> Result<()> {
        let mut hub = lock(&self.hub);
        if hub.clients[self.slot].connection.is_some() {
            return Ok(());
        }

        if !hub.listening {
            hub.clients[self.slot]
                .events
                .push_back(ClientEvent::Disconnected);
            return Ok(());
        }

        let connection = ConnectionId(hub.next_connection);
        hub.next_connection += 1;
        hub.links.insert(connection, self.slot);
        hub.server_events.push_back(ServerEvent::Connected(connection));

        let client = &mut hub.clients[self.slot];
        client.connection = Some(connection);
        client.events.push_back(ClientEvent::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.hub).clients[self.slot].connection.is_some()
    }

    fn send(&mut self, bytes: &[u8], _channel: Channel) -> bool {
        let mut hub = lock(&self.hub);
        let Some(connection) = hub.clients[self.slot].connection else {
            return false;
        };
        let pieces: Vec<Bytes> = hub.pieces(bytes).collect();
        hub.server_events
            .extend(pieces.into_iter().map(|chunk| ServerEvent::Data(connection, chunk)));
        true
    }

    fn disconnect(&mut self) {
        let mut hub = lock(&self.hub);
        let client = &mut hub.clients[self.slot];
        client.events.clear();
        if let Some(connection) = client.connection.take() {
            hub.links.remove(&connection);
            hub.server_events
                .push_back(ServerEvent::Disconnected(connection));
        }
    }

    fn poll(&mut self) -> Option<ClientEvent> {
        lock(&self.hub).clients[self.slot].events.pop_front()
    }
}

impl Drop for MemoryClientTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_without_listener_reports_disconnect() {
        let network = MemoryNetwork::new();
        let mut client = network.client_transport();
        client.connect("memory").unwrap();
        assert_eq!(client.poll(), Some(ClientEvent::Disconnected));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_server_disconnect_is_reported_to_client_only() {
        let network = MemoryNetwork::new();
        let mut server = network.server_transport();
        let mut client = network.client_transport();
        server.start().unwrap();
        client.connect("memory").unwrap();

        let Some(ServerEvent::Connected(id)) = server.poll() else {
            panic!("expected connect event");
        };
        assert!(server.send(id, b"bye", Channel::Reliable));
        assert!(server.disconnect(id));
        assert!(!server.disconnect(id));
        assert_eq!(server.poll(), None);

        assert_eq!(client.poll(), Some(ClientEvent::Connected));
        assert_eq!(client.poll(), Some(ClientEvent::Data(Bytes::from_static(b"bye"))));
        assert_eq!(client.poll(), Some(ClientEvent::Disconnected));
        assert!(!client.send(b"late", Channel::Reliable));
    }

    #[test]
    fn test_client_disconnect_and_drop_notify_server() {
        let network = MemoryNetwork::new();
        let mut server = network.server_transport();
        server.start().unwrap();

        let mut first = network.client_transport();
        first.connect("memory").unwrap();
        {
            let mut second = network.client_transport();
            second.connect("memory").unwrap();
        }
        first.disconnect();

        let events: Vec<ServerEvent> = std::iter::from_fn(|| server.poll()).collect();
        assert_eq!(
            events,
            vec![
                ServerEvent::Connected(ConnectionId(1)),
                ServerEvent::Connected(ConnectionId(2)),
                ServerEvent::Disconnected(ConnectionId(2)),
                ServerEvent::Disconnected(ConnectionId(1)),
            ]
        );
        assert_eq!(network.connection_count(), 0);
    }

    #[test]
    fn test_chunk_size_splits_sends() {
        let network = MemoryNetwork::with_chunk_size(4);
        let mut server = network.server_transport();
        let mut client = network.client_transport();
        server.start().unwrap();
        client.connect("memory").unwrap();
        let _ = server.poll();

        assert!(client.send(&[7u8; 10], Channel::Unreliable));
        let sizes: Vec<usize> = std::iter::from_fn(|| server.poll())
            .map(|event| match event {
                ServerEvent::Data(_, chunk) => chunk.len(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }
}
