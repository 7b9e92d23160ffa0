//! Offer value types shared by the store, the matchers and the sink.

use crate::id::{EntityId, ResourceKind};
use serde::{Deserialize, Serialize};

/// Number of priority bands. Band 7 is the most urgent.
pub const PRIORITY_COUNT: usize = 8;

/// Highest valid priority value.
pub const MAX_PRIORITY: u8 = (PRIORITY_COUNT - 1) as u8;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A point on the ground plane, in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    /// Squared Euclidean distance to another position.
    pub fn distance_sq(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        dx * dx + dz * dz
    }

    pub fn distance(&self, other: &Position) -> f32 {
        self.distance_sq(other).sqrt()
    }
}

// ---------------------------------------------------------------------------
// Offers
// ---------------------------------------------------------------------------

/// Which side of the market an offer sits on.
///
/// Supply offers arrive through `submit_outgoing`, demand offers through
/// `submit_incoming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Supply,
    Demand,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Supply, Side::Demand];

    pub fn index(self) -> usize {
        match self {
            Side::Supply => 0,
            Side::Demand => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Supply => Side::Demand,
            Side::Demand => Side::Supply,
        }
    }
}

/// A pending supply or demand request. Plain value data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub entity: EntityId,
    pub position: Position,
    pub amount: u32,
    /// Urgency band, `0..PRIORITY_COUNT`.
    pub priority: u8,
    /// Buffered (warehouse-like) offer, kept out of low bands of the other side.
    pub exclusive: bool,
    /// The offering entity starts the trip. Selects the travel direction
    /// used for directed segment costs.
    pub active: bool,
}

impl Offer {
    pub fn new(entity: EntityId, position: Position, amount: u32) -> Self {
        Self {
            entity,
            position,
            amount,
            priority: 0,
            exclusive: false,
            active: false,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    /// The band this offer belongs to, clamped to the valid range.
    pub fn band(&self) -> usize {
        (self.priority.min(MAX_PRIORITY)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }
}

// ---------------------------------------------------------------------------
// Transfer records
// ---------------------------------------------------------------------------

/// A completed match, queued for the producer to apply.
///
/// `supply` and `demand` hold the offers as they were when the match was
/// made, before `amount` was subtracted from them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub kind: ResourceKind,
    pub supply: Offer,
    pub demand: Offer,
    pub amount: u32,
    /// Path cost found by the matcher (straight-line distance for the
    /// legacy matcher, travel time for graph search).
    pub cost: f32,
}

impl TransferRecord {
    pub fn involves(&self, entity: EntityId) -> bool {
        self.supply.entity == entity || self.demand.entity == entity
    }
}
