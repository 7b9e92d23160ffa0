//! Fixtures for tests and benchmarks: offer constructors, a hand-built
//! network, an explicit entity directory and a host that records transfers.
//!
//! Compiled for unit tests and, through the `test-utils` feature, for the
//! integration tests and the criterion benches.

use crate::broker::TransferHost;
use crate::id::{EntityId, NodeId, ResourceKind, SegmentId};
use crate::network::{
    CellCoord, EntityDirectory, GridSpec, Lane, LaneDirection, NetNode, NetSegment, NodeClass,
    OutsideConnection, TransportNetwork,
};
use crate::offer::{Offer, Position};
use crate::policy::LaneClasses;
use slotmap::{SecondaryMap, SlotMap};
use std::collections::{HashMap, HashSet};

// ===========================================================================
// Offer constructors
// ===========================================================================

/// A building offer at `(x, z)`.
pub fn offer_at(entity: u32, x: f32, z: f32, amount: u32, priority: u8) -> Offer {
    Offer::new(EntityId::Building(entity), Position::new(x, z), amount).with_priority(priority)
}

// ===========================================================================
// Network
// ===========================================================================

/// Small hand-built network. Roads have speed 1, so a road's cost equals
/// its length.
#[derive(Debug, Default)]
pub struct GridNetwork {
    grid: GridSpec,
    nodes: SlotMap<NodeId, NetNode>,
    segments: SlotMap<SegmentId, NetSegment>,
    cells: HashMap<CellCoord, Vec<NodeId>>,
    interchanges: SecondaryMap<NodeId, Vec<NodeId>>,
}

impl GridNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, position: Position, class: NodeClass) -> NodeId {
        let id = self.nodes.insert(NetNode {
            position,
            class,
            lanes: LaneClasses::VEHICLE | LaneClasses::CARGO | LaneClasses::TRANSIT,
            segments: Vec::new(),
            lane_segment: None,
        });
        self.cells
            .entry(self.grid.cell_of(position))
            .or_default()
            .push(id);
        id
    }

    /// Two-way road usable by vehicles and cargo.
    pub fn add_road(&mut self, a: NodeId, b: NodeId, cost: f32) -> SegmentId {
        self.add_road_with(a, b, cost, LaneClasses::VEHICLE | LaneClasses::CARGO)
    }

    pub fn add_road_with(&mut self, a: NodeId, b: NodeId, cost: f32, classes: LaneClasses) -> SegmentId {
        let id = self.segments.insert(NetSegment {
            start: a,
            end: b,
            length: cost,
            traffic_density: 0.0,
            inverted: false,
            lanes: vec![Lane {
                class: classes,
                direction: LaneDirection::Both,
                speed_limit: 1.0,
            }],
            stops: Vec::new(),
        });
        for node in [a, b] {
            if let Some(n) = self.nodes.get_mut(node) {
                n.segments.push(id);
            }
        }
        id
    }

    /// Place `stop` on `segment`'s lanes.
    pub fn add_stop(&mut self, segment: SegmentId, stop: NodeId) {
        if let Some(s) = self.segments.get_mut(segment) {
            s.stops.push(stop);
        }
        if let Some(n) = self.nodes.get_mut(stop) {
            n.lane_segment = Some(segment);
        }
    }

    /// One-way transshipment link.
    pub fn add_interchange(&mut self, from: NodeId, to: NodeId) {
        if let Some(list) = self.interchanges.entry(from) {
            list.or_default().push(to);
        }
    }

    pub fn segment_mut(&mut self, id: SegmentId) -> Option<&mut NetSegment> {
        self.segments.get_mut(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NetNode> {
        self.nodes.get_mut(id)
    }
}

impl TransportNetwork for GridNetwork {
    fn grid(&self) -> GridSpec {
        self.grid
    }

    fn nodes_in_cell(&self, cell: CellCoord) -> &[NodeId] {
        self.cells.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    fn node(&self, id: NodeId) -> Option<&NetNode> {
        self.nodes.get(id)
    }

    fn segment(&self, id: SegmentId) -> Option<&NetSegment> {
        self.segments.get(id)
    }

    fn interchanges(&self, node: NodeId) -> &[NodeId] {
        self.interchanges
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A straight road of `len + 1` nodes spaced 100 units apart along x,
/// each road costing `cost`.
pub fn chain_network(len: usize, cost: f32) -> (GridNetwork, Vec<NodeId>) {
    let mut net = GridNetwork::new();
    let nodes: Vec<NodeId> = (0..=len)
        .map(|i| net.add_node(Position::new(i as f32 * 100.0, 0.0), NodeClass::Road))
        .collect();
    for pair in nodes.windows(2) {
        net.add_road(pair[0], pair[1], cost);
    }
    (net, nodes)
}

// ===========================================================================
// Directory
// ===========================================================================

/// Entity directory with explicit flags. Unlisted entities are ordinary
/// road-bound buildings.
#[derive(Debug, Default, Clone)]
pub struct TestDirectory {
    connections: HashMap<EntityId, OutsideConnection>,
    air: HashSet<EntityId>,
    classes: HashMap<EntityId, NodeClass>,
}

impl TestDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, entity: EntityId, connection: OutsideConnection) -> Self {
        self.connections.insert(entity, connection);
        self
    }

    pub fn with_air(mut self, entity: EntityId) -> Self {
        self.air.insert(entity);
        self
    }

    pub fn with_class(mut self, entity: EntityId, class: NodeClass) -> Self {
        self.classes.insert(entity, class);
        self
    }
}

impl EntityDirectory for TestDirectory {
    fn connection(&self, entity: EntityId) -> Option<OutsideConnection> {
        self.connections.get(&entity).copied()
    }

    fn is_air_service(&self, entity: EntityId) -> bool {
        self.air.contains(&entity)
    }

    fn node_class(&self, entity: EntityId) -> NodeClass {
        self.classes.get(&entity).copied().unwrap_or_default()
    }
}

// ===========================================================================
// Host
// ===========================================================================

/// One transfer as the host saw it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedTransfer {
    pub kind: ResourceKind,
    pub supply: Offer,
    pub demand: Offer,
    pub amount: u32,
}

/// Host that records every transfer it is asked to start.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub transfers: Vec<AppliedTransfer>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_amount(&self) -> u64 {
        self.transfers.iter().map(|t| t.amount as u64).sum()
    }
}

impl TransferHost for RecordingHost {
    fn apply_transfer(&mut self, kind: ResourceKind, supply: &Offer, demand: &Offer, amount: u32) {
        self.transfers.push(AppliedTransfer {
            kind,
            supply: *supply,
            demand: *demand,
            amount,
        });
    }
}
