//! Shared fixtures for the integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use net_session::config::NetworkConfig;
use net_session::server::NetworkServer;
use net_session::spawn::{CatalogueHost, EntityWorld, PrefabRegistry};
use net_session::transport::memory::MemoryNetwork;
use net_session::{LocalEntity, NetworkClient, NetworkId, PrefabId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const PLAYER: PrefabId = PrefabId(0x0000_00A1);
pub const MONSTER: PrefabId = PrefabId(0x0000_00B2);
pub const UNKNOWN: PrefabId = PrefabId(0xDEAD_BEEF_0000_0000_0000_0000_0000_0001);

/// A local entity as the test world sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instance {
    pub template: &'static str,
    pub network_id: NetworkId,
    pub owned: bool,
}

#[derive(Debug, Default)]
pub struct WorldState {
    next: u64,
    pub alive: HashMap<LocalEntity, Instance>,
    pub destroyed: Vec<LocalEntity>,
}

/// Client-side entity world shared between the test and the client's spawn host
#[derive(Debug, Clone, Default)]
pub struct SharedWorld(pub Rc<RefCell<WorldState>>);

impl SharedWorld {
    pub fn alive(&self) -> usize {
        self.0.borrow().alive.len()
    }

    pub fn find(&self, network_id: NetworkId) -> Option<Instance> {
        self.0
            .borrow()
            .alive
            .values()
            .find(|i| i.network_id == network_id)
            .copied()
    }

    pub fn destroyed(&self) -> usize {
        self.0.borrow().destroyed.len()
    }
}

impl EntityWorld<&'static str> for SharedWorld {
    fn instantiate(
        &mut self,
        template: &&'static str,
        network_id: NetworkId,
        owned: bool,
    ) -> LocalEntity {
        let mut state = self.0.borrow_mut();
        state.next += 1;
        let entity = LocalEntity(1000 + state.next);
        state.alive.insert(
            entity,
            Instance {
                template: *template,
                network_id,
                owned,
            },
        );
        entity
    }

    fn set_owned(&mut self, entity: LocalEntity, owned: bool) {
        if let Some(instance) = self.0.borrow_mut().alive.get_mut(&entity) {
            instance.owned = owned;
        }
    }

    fn destroy(&mut self, entity: LocalEntity) {
        let mut state = self.0.borrow_mut();
        state.alive.remove(&entity);
        state.destroyed.push(entity);
    }
}

pub fn catalogue() -> PrefabRegistry<&'static str> {
    let mut catalogue = PrefabRegistry::new();
    catalogue.register(PLAYER, "player");
    catalogue.register(MONSTER, "monster");
    catalogue
}

pub fn server(network: &MemoryNetwork, config: &NetworkConfig) -> NetworkServer {
    let mut server = NetworkServer::new(config, network.server_transport());
    server.start().expect("memory transport starts");
    server
}

pub fn client(network: &MemoryNetwork, config: &NetworkConfig) -> (NetworkClient, SharedWorld) {
    let world = SharedWorld::default();
    let host = CatalogueHost::new(catalogue(), world.clone());
    let client = NetworkClient::new(config, network.client_transport(), host);
    (client, world)
}

/// Run both sides until the memory hub is quiet
pub fn pump(server: &mut NetworkServer, clients: &mut [&mut NetworkClient]) {
    for _ in 0..16 {
        let mut processed = server.update();
        for client in clients.iter_mut() {
            processed += client.update();
        }
        if processed == 0 {
            break;
        }
    }
}
