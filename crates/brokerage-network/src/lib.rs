//! In-memory transport network and entity registry for the broker.
//!
//! [`RoadNetwork`] stores nodes and segments in slotmaps and keeps a
//! cell index for nearest-node lookups. Topology changes are queued and
//! applied together with [`RoadNetwork::apply_mutations`], so a host can
//! batch a frame's worth of edits and swap the finished network into the
//! broker while it is paused.
//!
//! ```rust,ignore
//! let mut net = RoadNetwork::new();
//! let a = net.queue_add_node(Position::new(0.0, 0.0), NodeClass::Road);
//! let b = net.queue_add_node(Position::new(64.0, 0.0), NodeClass::Road);
//! let result = net.apply_mutations();
//! let (a, b) = (result.resolve_node(a).unwrap(), result.resolve_node(b).unwrap());
//! net.queue_connect(a, b, SegmentSpec::two_way(LaneClasses::VEHICLE, 1.0));
//! net.apply_mutations();
//! broker.set_network(Arc::new(net));
//! ```

use brokerage_core::id::{NodeId, SegmentId};
use brokerage_core::network::{
    CellCoord, GridSpec, Lane, LaneDirection, NetNode, NetSegment, NodeClass, TransportNetwork,
};
use brokerage_core::offer::Position;
use brokerage_core::policy::LaneClasses;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub mod registry;
pub use registry::{EntityInfo, EntityRegistry};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from network mutations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),
    #[error("segment not found: {0:?}")]
    SegmentNotFound(SegmentId),
    #[error("segment would start and end at node {0:?}")]
    SelfLoop(NodeId),
    #[error("segment has no lanes")]
    NoLanes,
}

// ---------------------------------------------------------------------------
// Pending ids
// ---------------------------------------------------------------------------

/// Placeholder for a node queued but not yet applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingNodeId(pub u64);

/// Placeholder for a segment queued but not yet applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingSegmentId(pub u64);

/// Shape of a segment to be added.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSpec {
    pub lanes: Vec<Lane>,
    /// Travel length. Defaults to the straight-line distance between the
    /// end nodes.
    pub length: Option<f32>,
    pub inverted: bool,
}

impl SegmentSpec {
    /// One lane usable in both directions.
    pub fn two_way(class: LaneClasses, speed_limit: f32) -> Self {
        Self {
            lanes: vec![Lane {
                class,
                direction: LaneDirection::Both,
                speed_limit,
            }],
            length: None,
            inverted: false,
        }
    }

    /// One lane usable from start to end only.
    pub fn one_way(class: LaneClasses, speed_limit: f32) -> Self {
        Self {
            lanes: vec![Lane {
                class,
                direction: LaneDirection::Forward,
                speed_limit,
            }],
            length: None,
            inverted: false,
        }
    }

    pub fn with_length(mut self, length: f32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_lane(mut self, lane: Lane) -> Self {
        self.lanes.push(lane);
        self
    }
}

// ---------------------------------------------------------------------------
// Queued mutations
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Mutation {
    AddNode {
        position: Position,
        class: NodeClass,
        pending_id: PendingNodeId,
    },
    RemoveNode {
        node: NodeId,
    },
    Connect {
        from: NodeId,
        to: NodeId,
        spec: SegmentSpec,
        pending_id: PendingSegmentId,
    },
    Disconnect {
        segment: SegmentId,
    },
    AddStop {
        segment: SegmentId,
        stop: NodeId,
    },
    Link {
        from: NodeId,
        to: NodeId,
    },
    SetTraffic {
        segment: SegmentId,
        density: f32,
    },
}

/// Result of applying queued mutations.
#[derive(Debug, Default)]
pub struct MutationResult {
    pub added_nodes: Vec<(PendingNodeId, NodeId)>,
    pub added_segments: Vec<(PendingSegmentId, SegmentId)>,
    /// Mutations that referenced something missing, in queue order. They
    /// were skipped; everything else was applied.
    pub rejected: Vec<NetworkError>,
}

impl MutationResult {
    pub fn resolve_node(&self, pending: PendingNodeId) -> Option<NodeId> {
        self.added_nodes
            .iter()
            .find(|(p, _)| *p == pending)
            .map(|(_, id)| *id)
    }

    pub fn resolve_segment(&self, pending: PendingSegmentId) -> Option<SegmentId> {
        self.added_segments
            .iter()
            .find(|(p, _)| *p == pending)
            .map(|(_, id)| *id)
    }
}

// ---------------------------------------------------------------------------
// RoadNetwork
// ---------------------------------------------------------------------------

/// Nodes, segments and the cell index used to find the node nearest an
/// offer.
///
/// The cell index is derived data and is not serialized; call
/// [`RoadNetwork::rebuild_index`] after deserializing.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RoadNetwork {
    grid: GridSpec,
    nodes: SlotMap<NodeId, NetNode>,
    segments: SlotMap<SegmentId, NetSegment>,
    interchanges: SecondaryMap<NodeId, Vec<NodeId>>,

    #[serde(skip)]
    cells: BTreeMap<CellCoord, Vec<NodeId>>,
    #[serde(skip)]
    mutations: Vec<Mutation>,
    #[serde(skip)]
    next_pending_node: u64,
    #[serde(skip)]
    next_pending_segment: u64,
}

impl Clone for RoadNetwork {
    fn clone(&self) -> Self {
        Self {
            grid: self.grid,
            nodes: self.nodes.clone(),
            segments: self.segments.clone(),
            interchanges: self.interchanges.clone(),
            cells: self.cells.clone(),
            // Pending mutations belong to the original.
            mutations: Vec::new(),
            next_pending_node: self.next_pending_node,
            next_pending_segment: self.next_pending_segment,
        }
    }
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grid(grid: GridSpec) -> Self {
        Self {
            grid,
            ..Self::default()
        }
    }

    // -----------------------------------------------------------------------
    // Queued mutations
    // -----------------------------------------------------------------------

    pub fn queue_add_node(&mut self, position: Position, class: NodeClass) -> PendingNodeId {
        let pending = PendingNodeId(self.next_pending_node);
        self.next_pending_node += 1;
        self.mutations.push(Mutation::AddNode {
            position,
            class,
            pending_id: pending,
        });
        pending
    }

    /// Queue a node for removal, together with every segment ending at it.
    pub fn queue_remove_node(&mut self, node: NodeId) {
        self.mutations.push(Mutation::RemoveNode { node });
    }

    pub fn queue_connect(&mut self, from: NodeId, to: NodeId, spec: SegmentSpec) -> PendingSegmentId {
        let pending = PendingSegmentId(self.next_pending_segment);
        self.next_pending_segment += 1;
        self.mutations.push(Mutation::Connect {
            from,
            to,
            spec,
            pending_id: pending,
        });
        pending
    }

    pub fn queue_disconnect(&mut self, segment: SegmentId) {
        self.mutations.push(Mutation::Disconnect { segment });
    }

    /// Queue `stop` as a transit stop on `segment`'s lanes.
    pub fn queue_add_stop(&mut self, segment: SegmentId, stop: NodeId) {
        self.mutations.push(Mutation::AddStop { segment, stop });
    }

    /// Queue a one-way transshipment link from `from` to `to`.
    pub fn queue_link(&mut self, from: NodeId, to: NodeId) {
        self.mutations.push(Mutation::Link { from, to });
    }

    /// Queue a new congestion value for `segment`.
    pub fn queue_set_traffic(&mut self, segment: SegmentId, density: f32) {
        self.mutations.push(Mutation::SetTraffic { segment, density });
    }

    /// Apply all queued mutations in order.
    pub fn apply_mutations(&mut self) -> MutationResult {
        let mutations = std::mem::take(&mut self.mutations);
        let mut result = MutationResult::default();

        for mutation in mutations {
            let outcome = match mutation {
                Mutation::AddNode {
                    position,
                    class,
                    pending_id,
                } => {
                    let id = self.add_node_immediate(position, class);
                    result.added_nodes.push((pending_id, id));
                    Ok(())
                }
                Mutation::RemoveNode { node } => self.remove_node_immediate(node),
                Mutation::Connect {
                    from,
                    to,
                    spec,
                    pending_id,
                } => self.connect_immediate(from, to, spec).map(|id| {
                    result.added_segments.push((pending_id, id));
                }),
                Mutation::Disconnect { segment } => self.disconnect_immediate(segment),
                Mutation::AddStop { segment, stop } => self.add_stop_immediate(segment, stop),
                Mutation::Link { from, to } => self.link_immediate(from, to),
                Mutation::SetTraffic { segment, density } => self
                    .segments
                    .get_mut(segment)
                    .map(|s| s.traffic_density = density.max(0.0))
                    .ok_or(NetworkError::SegmentNotFound(segment)),
            };
            if let Err(err) = outcome {
                warn!(%err, "network mutation skipped");
                result.rejected.push(err);
            }
        }

        debug!(
            nodes = self.nodes.len(),
            segments = self.segments.len(),
            rejected = result.rejected.len(),
            "network mutations applied"
        );
        result
    }

    pub fn has_pending_mutations(&self) -> bool {
        !self.mutations.is_empty()
    }

    // -----------------------------------------------------------------------
    // Immediate mutations
    // -----------------------------------------------------------------------

    fn add_node_immediate(&mut self, position: Position, class: NodeClass) -> NodeId {
        let id = self.nodes.insert(NetNode {
            position,
            class,
            lanes: LaneClasses::NONE,
            segments: Vec::new(),
            lane_segment: None,
        });
        self.cells
            .entry(self.grid.cell_of(position))
            .or_default()
            .push(id);
        id
    }

    fn remove_node_immediate(&mut self, node: NodeId) -> Result<(), NetworkError> {
        let data = self.nodes.get(node).ok_or(NetworkError::NodeNotFound(node))?;
        let attached = data.segments.clone();
        let cell = self.grid.cell_of(data.position);
        let lane_segment = data.lane_segment;

        for segment in attached {
            self.disconnect_immediate(segment)?;
        }
        if let Some(segment) = lane_segment.and_then(|s| self.segments.get_mut(s)) {
            segment.stops.retain(|&s| s != node);
        }
        if let Some(list) = self.cells.get_mut(&cell) {
            list.retain(|&n| n != node);
            if list.is_empty() {
                self.cells.remove(&cell);
            }
        }
        self.interchanges.remove(node);
        for (_, targets) in self.interchanges.iter_mut() {
            targets.retain(|&n| n != node);
        }
        self.nodes.remove(node);
        Ok(())
    }

    fn connect_immediate(
        &mut self,
        from: NodeId,
        to: NodeId,
        spec: SegmentSpec,
    ) -> Result<SegmentId, NetworkError> {
        if from == to {
            return Err(NetworkError::SelfLoop(from));
        }
        if spec.lanes.is_empty() {
            return Err(NetworkError::NoLanes);
        }
        let a = self.nodes.get(from).ok_or(NetworkError::NodeNotFound(from))?;
        let b = self.nodes.get(to).ok_or(NetworkError::NodeNotFound(to))?;
        let length = spec
            .length
            .unwrap_or_else(|| a.position.distance(&b.position));
        let classes = spec
            .lanes
            .iter()
            .fold(LaneClasses::NONE, |acc, lane| acc | lane.class);

        let id = self.segments.insert(NetSegment {
            start: from,
            end: to,
            length,
            traffic_density: 0.0,
            inverted: spec.inverted,
            lanes: spec.lanes,
            stops: Vec::new(),
        });
        for node in [from, to] {
            if let Some(n) = self.nodes.get_mut(node) {
                n.segments.push(id);
                n.lanes = n.lanes | classes;
            }
        }
        Ok(id)
    }

    fn disconnect_immediate(&mut self, segment: SegmentId) -> Result<(), NetworkError> {
        let data = self
            .segments
            .remove(segment)
            .ok_or(NetworkError::SegmentNotFound(segment))?;
        for node in [data.start, data.end] {
            self.refresh_node(node, segment);
        }
        for stop in data.stops {
            if let Some(n) = self.nodes.get_mut(stop) {
                n.lane_segment = None;
            }
        }
        Ok(())
    }

    /// Drop `removed` from a node's segment list and recompute its lane classes.
    fn refresh_node(&mut self, node: NodeId, removed: SegmentId) {
        let Some(n) = self.nodes.get_mut(node) else {
            return;
        };
        n.segments.retain(|&s| s != removed);
        let segments = &self.segments;
        n.lanes = n
            .segments
            .iter()
            .filter_map(|&s| segments.get(s))
            .flat_map(|s| s.lanes.iter())
            .fold(LaneClasses::NONE, |acc, lane| acc | lane.class);
    }

    fn add_stop_immediate(&mut self, segment: SegmentId, stop: NodeId) -> Result<(), NetworkError> {
        let classes = self
            .segments
            .get(segment)
            .ok_or(NetworkError::SegmentNotFound(segment))?
            .lanes
            .iter()
            .fold(LaneClasses::NONE, |acc, lane| acc | lane.class);
        let node = self
            .nodes
            .get_mut(stop)
            .ok_or(NetworkError::NodeNotFound(stop))?;
        if let Some(previous) = node.lane_segment.replace(segment) {
            if let Some(s) = self.segments.get_mut(previous) {
                s.stops.retain(|&n| n != stop);
            }
        }
        node.lanes = node.lanes | classes;
        if let Some(s) = self.segments.get_mut(segment) {
            s.stops.push(stop);
        }
        Ok(())
    }

    fn link_immediate(&mut self, from: NodeId, to: NodeId) -> Result<(), NetworkError> {
        for node in [from, to] {
            if !self.nodes.contains_key(node) {
                return Err(NetworkError::NodeNotFound(node));
            }
        }
        if let Some(entry) = self.interchanges.entry(from) {
            let targets = entry.or_default();
            if !targets.contains(&to) {
                targets.push(to);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn contains_segment(&self, segment: SegmentId) -> bool {
        self.segments.contains_key(segment)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NetNode)> {
        self.nodes.iter()
    }

    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &NetSegment)> {
        self.segments.iter()
    }

    /// Recompute the cell index from node positions.
    pub fn rebuild_index(&mut self) {
        self.cells.clear();
        for (id, node) in &self.nodes {
            self.cells
                .entry(self.grid.cell_of(node.position))
                .or_default()
                .push(id);
        }
    }
}

impl TransportNetwork for RoadNetwork {
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
