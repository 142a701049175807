//! # Spawn / Ownership Directory
//!
//! Identity types for networked entities and the directories that map them to
//! local runtime entities.
//!
//! The server's [`ServerSpawnDirectory`] is authoritative. Each client keeps a
//! [`ClientSpawnDirectory`] mirror built only from spawn and unspawn messages, so at
//! any consistent point a client's mirror is a subset of the server's directory.
//!
//! ## Components
//! - **Identity**: `NetworkId`, `PrefabId`, `LocalEntity`, `Ownership`
//! - **Directories**: server-side records and client-side mirrors
//! - **Prefabs**: the catalogue seam clients use to instantiate spawned entities

pub mod directory;
pub mod prefab;

pub use directory::{ClientSpawnDirectory, MirroredEntity, ServerSpawnDirectory, SpawnedEntity};
pub use prefab::{CatalogueHost, EntityWorld, PrefabCatalogue, PrefabRegistry, SpawnHost};

use crate::server::connection::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned identity of a networked entity, shared verbatim with clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u64);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable 128-bit template identifier, identical across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefabId(pub u128);

impl fmt::Display for PrefabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Handle of an entity in a client's local runtime world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalEntity(pub u64);

impl fmt::Display for LocalEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who owns a networked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Ownership {
    /// Owned by one connection (e.g. that player's avatar)
    Owned(ConnectionId),
    /// Owned by nobody (monsters, NPCs, world props)
    #[default]
    Unowned,
}

impl Ownership {
    /// The owning connection, if any
    pub fn owner(self) -> Option<ConnectionId> {
        match self {
            Ownership::Owned(connection) => Some(connection),
            Ownership::Unowned => None,
        }
    }

    /// Whether `connection` is the owner
    pub fn is_owned_by(self, connection: ConnectionId) -> bool {
        self == Ownership::Owned(connection)
    }
}

impl From<Option<ConnectionId>> for Ownership {
    fn from(owner: Option<ConnectionId>) -> Self {
        match owner {
            Some(connection) => Ownership::Owned(connection),
            None => Ownership::Unowned,
        }
    }
}

/// An entity in the server's runtime world, as handed to `spawn` / `join_world`.
///
/// The network identifier is derived from the native identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEntity {
    /// Native identity in the server's runtime world
    pub native_id: u64,
    /// Template clients instantiate for this entity
    pub prefab: PrefabId,
}

impl ServerEntity {
    pub fn new(native_id: u64, prefab: PrefabId) -> Self {
        Self { native_id, prefab }
    }

    /// Network identifier of this entity
    pub fn network_id(&self) -> NetworkId {
        NetworkId(self.native_id)
    }
}
