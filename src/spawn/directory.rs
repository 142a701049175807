//! Server and client spawn directories

use super::{LocalEntity, NetworkId, Ownership, PrefabId};
use crate::error::{ProtocolError, Result};
use crate::protocol::messages::SpawnMessage;
use crate::server::connection::ConnectionId;
use std::collections::HashMap;

/// Authoritative record of one spawned entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedEntity {
    pub network_id: NetworkId,
    pub prefab: PrefabId,
    pub owner: Ownership,
}

/// Server-side directory. On the server the network id equals the entity's native
/// id, so the id doubles as the local handle.
#[derive(Debug, Default)]
pub struct ServerSpawnDirectory {
    entities: HashMap<NetworkId, SpawnedEntity>,
    players: HashMap<ConnectionId, NetworkId>,
}

impl ServerSpawnDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly spawned entity.
    ///
    /// # Errors
    /// `AlreadySpawned` if the network id is alive already; ids are never reused
    /// while their entity lives.
    pub fn insert(&mut self, entity: SpawnedEntity) -> Result<()> {
        if self.entities.contains_key(&entity.network_id) {
            return Err(ProtocolError::AlreadySpawned(entity.network_id));
        }
        self.entities.insert(entity.network_id, entity);
        Ok(())
    }

    /// Remove an entity, dropping any player mapping that points at it.
    pub fn remove(&mut self, network_id: NetworkId) -> Option<SpawnedEntity> {
        let removed = self.entities.remove(&network_id)?;
        self.players.retain(|_, player| *player != network_id);
        Some(removed)
    }

    pub fn get(&self, network_id: NetworkId) -> Option<&SpawnedEntity> {
        self.entities.get(&network_id)
    }

    pub fn contains(&self, network_id: NetworkId) -> bool {
        self.entities.contains_key(&network_id)
    }

    /// Change the owner, returning the previous one.
    pub fn set_owner(&mut self, network_id: NetworkId, owner: Ownership) -> Result<Ownership> {
        let entity = self
            .entities
            .get_mut(&network_id)
            .ok_or(ProtocolError::UnknownEntity(network_id))?;
        Ok(std::mem::replace(&mut entity.owner, owner))
    }

    /// Entities owned by `connection`, in ascending id order.
    pub fn owned_by(&self, connection: ConnectionId) -> Vec<NetworkId> {
        let mut owned: Vec<NetworkId> = self
            .entities
            .values()
            .filter(|e| e.owner.is_owned_by(connection))
            .map(|e| e.network_id)
            .collect();
        owned.sort_unstable();
        owned
    }

    pub fn set_player(&mut self, connection: ConnectionId, network_id: NetworkId) {
        self.players.insert(connection, network_id);
    }

    pub fn player_of(&self, connection: ConnectionId) -> Option<NetworkId> {
        self.players.get(&connection).copied()
    }

    pub fn remove_player(&mut self, connection: ConnectionId) -> Option<NetworkId> {
        self.players.remove(&connection)
    }

    /// All spawned ids, in ascending order
    pub fn ids(&self) -> Vec<NetworkId> {
        let mut ids: Vec<NetworkId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpawnedEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.players.clear();
    }

    /// The spawn message `recipient` should see for `network_id`.
    ///
    /// Only the owner's message carries `owned = true`.
    pub fn spawn_message_for(
        &self,
        network_id: NetworkId,
        recipient: ConnectionId,
    ) -> Option<SpawnMessage> {
        self.entities.get(&network_id).map(|e| SpawnMessage {
            network_id: e.network_id,
            prefab: e.prefab,
            owned: e.owner.is_owned_by(recipient),
        })
    }
}

/// Client-side mirror of one spawned entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirroredEntity {
    pub network_id: NetworkId,
    pub local: LocalEntity,
    pub prefab: PrefabId,
    /// Whether this client owns the entity
    pub owned: bool,
}

/// Client-side bidirectional mirror: network id <-> local entity
#[derive(Debug, Default)]
pub struct ClientSpawnDirectory {
    by_network: HashMap<NetworkId, MirroredEntity>,
    by_local: HashMap<LocalEntity, NetworkId>,
}

impl ClientSpawnDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mirror entry, replacing a stale one under the same network id.
    pub fn insert(&mut self, entity: MirroredEntity) -> Option<MirroredEntity> {
        let previous = self.by_network.insert(entity.network_id, entity);
        if let Some(prev) = previous {
            self.by_local.remove(&prev.local);
        }
        self.by_local.insert(entity.local, entity.network_id);
        previous
    }

    pub fn remove(&mut self, network_id: NetworkId) -> Option<MirroredEntity> {
        let removed = self.by_network.remove(&network_id)?;
        self.by_local.remove(&removed.local);
        Some(removed)
    }

    pub fn get(&self, network_id: NetworkId) -> Option<&MirroredEntity> {
        self.by_network.get(&network_id)
    }

    pub fn get_mut(&mut self, network_id: NetworkId) -> Option<&mut MirroredEntity> {
        self.by_network.get_mut(&network_id)
    }

    pub fn network_id_of(&self, local: LocalEntity) -> Option<NetworkId> {
        self.by_local.get(&local).copied()
    }

    /// Network ids of entities this client owns, ascending
    pub fn owned(&self) -> Vec<NetworkId> {
        let mut owned: Vec<NetworkId> = self
            .by_network
            .values()
            .filter(|e| e.owned)
            .map(|e| e.network_id)
            .collect();
        owned.sort_unstable();
        owned
    }

    /// Empty the mirror, returning every entry
    pub fn drain(&mut self) -> Vec<MirroredEntity> {
        self.by_local.clear();
        self.by_network.drain().map(|(_, e)| e).collect()
    }

    pub fn len(&self) -> usize {
        self.by_network.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_network.is_empty()
    }
}
