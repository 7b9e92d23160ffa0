//! Entity lookups for graph search.
//!
//! The host keeps [`EntityRegistry`] current as buildings are placed and
//! upgraded; matching workers read it concurrently through
//! [`EntityDirectory`].

use brokerage_core::id::EntityId;
use brokerage_core::network::{EntityDirectory, NodeClass, OutsideConnection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// What graph search needs to know about one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityInfo {
    /// Set for outside connections. Their offers are synthetic.
    pub connection: Option<OutsideConnection>,
    pub air_service: bool,
    pub node_class: NodeClass,
}

/// Thread-safe entity table. Unknown entities are ordinary road-bound
/// buildings.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entries: RwLock<HashMap<EntityId, EntityInfo>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityId, EntityInfo>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityId, EntityInfo>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an entity. Returns the previous entry.
    pub fn register(&self, entity: EntityId, info: EntityInfo) -> Option<EntityInfo> {
        self.write().insert(entity, info)
    }

    pub fn unregister(&self, entity: EntityId) -> Option<EntityInfo> {
        self.write().remove(&entity)
    }

    pub fn get(&self, entity: EntityId) -> Option<EntityInfo> {
        self.read().get(&entity).copied()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl EntityDirectory for EntityRegistry {
    fn connection(&self, entity: EntityId) -> Option<OutsideConnection> {
        self.read().get(&entity).and_then(|info| info.connection)
    }

    fn is_air_service(&self, entity: EntityId) -> bool {
        self.read().get(&entity).is_some_and(|info| info.air_service)
    }

    fn node_class(&self, entity: EntityId) -> NodeClass {
        self.read()
            .get(&entity)
            .map(|info| info.node_class)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_entities_are_plain_buildings() {
        let registry = EntityRegistry::new();
        let e = EntityId::Building(3);
        assert!(registry.connection(e).is_none());
        assert!(!registry.is_air_service(e));
        assert_eq!(registry.node_class(e), NodeClass::Road);
    }

    #[test]
    fn register_replaces_and_unregister_forgets() {
        let registry = EntityRegistry::new();
        let e = EntityId::Building(1);
        registry.register(
            e,
            EntityInfo {
                connection: Some(OutsideConnection {
                    incoming: true,
                    outgoing: false,
                }),
                air_service: false,
                node_class: NodeClass::Harbor,
            },
        );
        let previous = registry.register(
            e,
            EntityInfo {
                air_service: true,
                ..EntityInfo::default()
            },
        );
        assert_eq!(previous.unwrap().node_class, NodeClass::Harbor);
        assert!(registry.is_air_service(e));
        assert!(registry.connection(e).is_none());

        registry.unregister(e);
        assert!(registry.is_empty());
    }

    #[test]
    fn readers_share_the_registry_across_threads() {
        let registry = std::sync::Arc::new(EntityRegistry::new());
        registry.register(
            EntityId::Vehicle(7),
            EntityInfo {
                node_class: NodeClass::Rail,
                ..EntityInfo::default()
            },
        );
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let r = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || r.node_class(EntityId::Vehicle(7)))
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), NodeClass::Rail);
        }
    }
}
