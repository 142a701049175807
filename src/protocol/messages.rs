//! Core messages
//!
//! Message ids `0xFF00..=0xFFFF` are reserved for the runtime itself.

use super::message::NetworkMessage;
use crate::spawn::{NetworkId, PrefabId};
use serde::{Deserialize, Serialize};

/// First id of the reserved range
pub const RESERVED_ID_START: u16 = 0xFF00;

/// Server -> client: instantiate (or update the ownership of) a networked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnMessage {
    pub network_id: NetworkId,
    pub prefab: PrefabId,
    /// True only in the copy sent to the owning connection
    pub owned: bool,
}

impl NetworkMessage for SpawnMessage {
    const ID: u16 = 0xFF01;
}

/// Server -> client: destroy a mirrored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspawnMessage {
    pub network_id: NetworkId,
}

impl NetworkMessage for UnspawnMessage {
    const ID: u16 = 0xFF02;
}

/// Client -> server: credentials for the basic authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequestMessage {
    pub username: String,
    pub password: String,
}

impl NetworkMessage for AuthRequestMessage {
    const ID: u16 = 0xFF10;
}

/// Server -> client: verdict of the basic authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponseMessage {
    pub accepted: bool,
}

impl NetworkMessage for AuthResponseMessage {
    const ID: u16 = 0xFF11;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_ids_are_reserved_and_distinct() {
        let ids = [
            SpawnMessage::ID,
            UnspawnMessage::ID,
            AuthRequestMessage::ID,
            AuthResponseMessage::ID,
        ];
        assert!(ids.iter().all(|id| *id >= RESERVED_ID_START));

        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }
}
