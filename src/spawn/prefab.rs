//! Prefab catalogue seam
//!
//! Clients resolve the prefab id carried by a spawn message through a
//! [`PrefabCatalogue`] and hand the template to their [`EntityWorld`]. The client
//! world only talks to the object-safe [`SpawnHost`]; [`CatalogueHost`] glues a
//! catalogue and a world together.

use super::{LocalEntity, NetworkId, PrefabId};
use crate::error::{ProtocolError, Result};
use std::collections::HashMap;

/// Lookup of templates by prefab id
pub trait PrefabCatalogue {
    type Template;

    /// The template for `prefab`, or `None` if it is not in the catalogue
    fn get(&self, prefab: PrefabId) -> Option<&Self::Template>;
}

/// The client's local runtime world
pub trait EntityWorld<T> {
    /// Create a local entity from `template` for the given network identity
    fn instantiate(&mut self, template: &T, network_id: NetworkId, owned: bool) -> LocalEntity;

    /// The owned flag of an existing entity changed
    fn set_owned(&mut self, _entity: LocalEntity, _owned: bool) {}

    /// Destroy a local entity
    fn destroy(&mut self, entity: LocalEntity);
}

/// What the client world needs to mirror spawns locally
pub trait SpawnHost {
    /// Instantiate `prefab` for a network identity.
    ///
    /// # Errors
    /// `UnknownPrefab` when the prefab id cannot be resolved.
    fn instantiate(
        &mut self,
        prefab: PrefabId,
        network_id: NetworkId,
        owned: bool,
    ) -> Result<LocalEntity>;

    fn set_owned(&mut self, entity: LocalEntity, owned: bool);

    fn destroy(&mut self, entity: LocalEntity);
}

/// HashMap-backed catalogue
#[derive(Debug)]
pub struct PrefabRegistry<T> {
    templates: HashMap<PrefabId, T>,
}

impl<T> Default for PrefabRegistry<T> {
    fn default() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }
}

impl<T> PrefabRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, returning the one it replaced
    pub fn register(&mut self, prefab: PrefabId, template: T) -> Option<T> {
        self.templates.insert(prefab, template)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl<T> PrefabCatalogue for PrefabRegistry<T> {
    type Template = T;

    fn get(&self, prefab: PrefabId) -> Option<&T> {
        self.templates.get(&prefab)
    }
}

/// [`SpawnHost`] built from a catalogue and a world
#[derive(Debug)]
pub struct CatalogueHost<C, W> {
    pub catalogue: C,
    pub world: W,
}

impl<C, W> CatalogueHost<C, W> {
    pub fn new(catalogue: C, world: W) -> Self {
        Self { catalogue, world }
    }
}

impl<C, W> SpawnHost for CatalogueHost<C, W>
where
    C: PrefabCatalogue,
    W: EntityWorld<C::Template>,
{
    fn instantiate(
        &mut self,
        prefab: PrefabId,
        network_id: NetworkId,
        owned: bool,
    ) -> Result<LocalEntity> {
        let template = self
            .catalogue
            .get(prefab)
            .ok_or(ProtocolError::UnknownPrefab(prefab))?;
        Ok(self.world.instantiate(template, network_id, owned))
    }

    fn set_owned(&mut self, entity: LocalEntity, owned: bool) {
        self.world.set_owned(entity, owned);
    }

    fn destroy(&mut self, entity: LocalEntity) {
        self.world.destroy(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        next: u64,
        alive: Vec<LocalEntity>,
    }

    impl EntityWorld<&'static str> for Counter {
        fn instantiate(&mut self, _t: &&'static str, _id: NetworkId, _owned: bool) -> LocalEntity {
            self.next += 1;
            let entity = LocalEntity(self.next);
            self.alive.push(entity);
            entity
        }

        fn destroy(&mut self, entity: LocalEntity) {
            self.alive.retain(|e| *e != entity);
        }
    }

    #[test]
    fn test_unknown_prefab_is_reported() {
        let mut catalogue = PrefabRegistry::new();
        catalogue.register(PrefabId(1), "player");
        let mut host = CatalogueHost::new(catalogue, Counter::default());

        assert!(host.instantiate(PrefabId(1), NetworkId(5), false).is_ok());
        assert!(matches!(
            host.instantiate(PrefabId(2), NetworkId(6), false),
            Err(ProtocolError::UnknownPrefab(PrefabId(2)))
        ));
        assert_eq!(host.world.alive.len(), 1);
    }
}
