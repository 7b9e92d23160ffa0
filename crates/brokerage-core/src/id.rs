use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a node (junction, stop or dead end) in the transport network.
    pub struct NodeId;

    /// Identifies a segment (a stretch of road, track or path) between two nodes.
    pub struct SegmentId;
}

/// Identifies a resource kind in the catalog. Cheap to copy and compare.
///
/// Offers of different kinds never match each other; every kind owns its
/// own offer tables and is scheduled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKind(pub u16);

impl ResourceKind {
    /// Position of this kind in per-kind arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The host entity behind an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Building(u32),
    Vehicle(u32),
    Citizen(u32),
}

impl EntityId {
    /// The building index, if this entity is a building.
    pub fn building(self) -> Option<u32> {
        match self {
            EntityId::Building(id) => Some(id),
            _ => None,
        }
    }
}
