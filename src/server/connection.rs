//! Connection table
//!
//! One [`Connection`] per live transport connection, keyed by [`ConnectionId`].
//! Each connection owns its private [`FramingBuffer`]; nothing outside the owning
//! server world touches it.

use crate::core::framing::FramingBuffer;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Transport-assigned connection identifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side state of one connection
pub struct Connection {
    id: ConnectionId,
    authenticated: bool,
    address: String,
    pub(crate) framing: FramingBuffer,
    unauthenticated_attempts: u32,
    extensions: HashMap<TypeId, Box<dyn Any>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("authenticated", &self.authenticated)
            .field("address", &self.address)
            .field("buffered", &self.framing.buffered())
            .field("unauthenticated_attempts", &self.unauthenticated_attempts)
            .finish()
    }
}

impl Connection {
    pub fn new(id: ConnectionId, address: impl Into<String>, authenticated: bool) -> Self {
        Self::with_framing(id, address, authenticated, FramingBuffer::new())
    }

    /// Create a connection around a recycled framing buffer
    pub fn with_framing(
        id: ConnectionId,
        address: impl Into<String>,
        authenticated: bool,
        framing: FramingBuffer,
    ) -> Self {
        Self {
            id,
            authenticated,
            address: address.into(),
            framing,
            unauthenticated_attempts: 0,
            extensions: HashMap::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Gated messages this connection sent while unauthenticated.
    ///
    /// The core only counts; what to do about repeat offenders is up to the caller.
    pub fn unauthenticated_attempts(&self) -> u32 {
        self.unauthenticated_attempts
    }

    pub(crate) fn record_unauthenticated_attempt(&mut self) -> u32 {
        self.unauthenticated_attempts = self.unauthenticated_attempts.saturating_add(1);
        self.unauthenticated_attempts
    }

    /// Bytes of a partial message currently buffered
    pub fn buffered(&self) -> usize {
        self.framing.buffered()
    }

    /// Attach per-connection state owned by game code, replacing any value of the
    /// same type.
    pub fn insert_extension<T: Any>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn extension<T: Any>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn extension_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove_extension<T: Any>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Live connections of one server world
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection, returning a stale entry with the same id if there was one
    pub fn insert(&mut self, connection: Connection) -> Option<Connection> {
        self.connections.insert(connection.id(), connection)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn is_authenticated(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .is_some_and(Connection::is_authenticated)
    }

    /// All connection ids, ascending
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Authenticated connection ids, ascending
    pub fn authenticated_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.is_authenticated())
            .map(Connection::id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove every connection, returning them
    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, c)| c).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct PlayerName(String);

    #[test]
    fn test_table_remove_is_exactly_once() {
        let mut table = ConnectionTable::new();
        table.insert(Connection::new(ConnectionId(3), "a", true));
        table.insert(Connection::new(ConnectionId(1), "b", false));

        assert_eq!(table.ids(), vec![ConnectionId(1), ConnectionId(3)]);
        assert_eq!(table.authenticated_ids(), vec![ConnectionId(3)]);

        assert!(table.remove(ConnectionId(3)).is_some());
        assert!(table.remove(ConnectionId(3)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_extensions_are_typed() {
        let mut connection = Connection::new(ConnectionId(7), "127.0.0.1:1", true);
        assert!(connection.insert_extension(PlayerName("ann".into())).is_none());
        assert!(connection.insert_extension(5u32).is_none());

        if let Some(n) = connection.extension_mut::<u32>() {
            *n += 1;
        }
        assert_eq!(connection.extension::<u32>(), Some(&6));

        let old = connection.insert_extension(PlayerName("bo".into()));
        assert_eq!(old, Some(PlayerName("ann".into())));
        assert_eq!(
            connection.remove_extension::<PlayerName>(),
            Some(PlayerName("bo".into()))
        );
        assert!(connection.extension::<PlayerName>().is_none());
    }

    #[test]
    fn test_unauthenticated_attempts_count_up() {
        let mut connection = Connection::new(ConnectionId(1), "x", false);
        assert_eq!(connection.record_unauthenticated_attempt(), 1);
        assert_eq!(connection.record_unauthenticated_attempt(), 2);
        assert_eq!(connection.unauthenticated_attempts(), 2);
    }
}
