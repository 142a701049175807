//! # Transport Layer
//!
//! The transport contract: raw byte delivery only, no message semantics.
//!
//! A transport may run its I/O on other threads, but it hands received bytes to the
//! owning world through [`ServerTransport::poll`] / [`ClientTransport::poll`], which
//! the world calls from its own thread. That hand-off is the only synchronization
//! point between socket I/O and framing/dispatch.
//!
//! ## Backends
//! - **memory**: in-process loopback hub, used for host mode and tests
//! - **tcp**: tokio-based TCP backend
//!
//! Transport-level failures surface as `Disconnected` events, never as errors
//! crossing into handler code.

pub mod memory;
pub mod tcp;

use crate::error::Result;
use crate::server::connection::ConnectionId;
use bytes::Bytes;

/// Delivery class requested for an outgoing message.
///
/// Transports with a single delivery mode treat both identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// Guaranteed, ordered delivery
    #[default]
    Reliable,
    /// Best-effort delivery
    Unreliable,
}

/// Event reported by a server transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected(ConnectionId),
    /// A chunk of stream bytes; carries no message boundaries
    Data(ConnectionId, Bytes),
    Disconnected(ConnectionId),
}

/// Event reported by a client transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    /// A chunk of stream bytes; carries no message boundaries
    Data(Bytes),
    Disconnected,
}

/// Server side of a transport
pub trait ServerTransport {
    /// Begin accepting connections
    fn start(&mut self) -> Result<()>;

    fn is_active(&self) -> bool;

    /// Queue bytes for one connection. Returns `false` if the connection is unknown
    /// or the bytes could not be queued.
    fn send(&mut self, connection: ConnectionId, bytes: &[u8], channel: Channel) -> bool;

    /// Close one connection. Returns `false` if it was not open.
    ///
    /// A disconnect initiated here is not reported back through `poll`.
    fn disconnect(&mut self, connection: ConnectionId) -> bool;

    /// Remote address of a connection
    fn address(&self, connection: ConnectionId) -> Option<String>;

    /// Close every connection and stop accepting
    fn stop(&mut self);

    /// Next pending event, if any
    fn poll(&mut self) -> Option<ServerEvent>;
}

/// Client side of a transport
pub trait ClientTransport {
    /// Begin connecting. Completion is reported as `ClientEvent::Connected`, failure as
    /// `ClientEvent::Disconnected`.
    fn connect(&mut self, address: &str) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Queue bytes for the server. Returns `false` when not connected.
    fn send(&mut self, bytes: &[u8], channel: Channel) -> bool;

    /// Close the connection. Not reported back through `poll`.
    fn disconnect(&mut self);

    /// Next pending event, if any
    fn poll(&mut self) -> Option<ClientEvent>;
}
