//! Read-only views of host data injected into the broker.
//!
//! The broker never owns the transport network or the entity model. Graph
//! search reads them through [`TransportNetwork`] and [`EntityDirectory`];
//! topology changes happen between jobs, while the broker is paused.

use crate::id::{EntityId, NodeId, SegmentId};
use crate::offer::Position;
use crate::policy::LaneClasses;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Spatial grid
// ---------------------------------------------------------------------------

/// Layout of the node lookup grid: square cells centered on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub cell_size: f32,
    pub cells_per_side: u32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            cell_size: 64.0,
            cells_per_side: 270,
        }
    }
}

/// Column/row of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl GridSpec {
    /// The cell containing `position`, clamped to the grid edge.
    pub fn cell_of(&self, position: Position) -> CellCoord {
        let half = (self.cells_per_side / 2) as f32;
        let max = self.cells_per_side as i32 - 1;
        let x = ((position.x / self.cell_size) + half) as i32;
        let z = ((position.z / self.cell_size) + half) as i32;
        CellCoord::new(x.clamp(0, max), z.clamp(0, max))
    }

    pub fn contains(&self, cell: CellCoord) -> bool {
        let n = self.cells_per_side as i32;
        (0..n).contains(&cell.x) && (0..n).contains(&cell.z)
    }
}

// ---------------------------------------------------------------------------
// Nodes and segments
// ---------------------------------------------------------------------------

/// Which kind of network a node belongs to. Offers anchor on nodes of the
/// class their entity uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeClass {
    #[default]
    Road,
    Rail,
    Harbor,
    Airport,
    Footpath,
}

/// Travel direction relative to a segment's start-to-end orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TravelDirection {
    Forward,
    Backward,
}

impl TravelDirection {
    pub fn reverse(self) -> Self {
        match self {
            TravelDirection::Forward => TravelDirection::Backward,
            TravelDirection::Backward => TravelDirection::Forward,
        }
    }
}

/// Directions a lane can be driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaneDirection {
    Forward,
    Backward,
    Both,
}

impl LaneDirection {
    pub fn allows(self, direction: TravelDirection) -> bool {
        matches!(
            (self, direction),
            (LaneDirection::Both, _)
                | (LaneDirection::Forward, TravelDirection::Forward)
                | (LaneDirection::Backward, TravelDirection::Backward)
        )
    }
}

/// One lane of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub class: LaneClasses,
    pub direction: LaneDirection,
    pub speed_limit: f32,
}

/// A network node as seen by graph search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetNode {
    pub position: Position,
    pub class: NodeClass,
    /// Classes of the lanes meeting at this node.
    pub lanes: LaneClasses,
    /// Segments ending at this node.
    pub segments: Vec<SegmentId>,
    /// Segment this node sits on as a lane stop, if any.
    pub lane_segment: Option<SegmentId>,
}

/// A segment between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetSegment {
    pub start: NodeId,
    pub end: NodeId,
    pub length: f32,
    /// Live congestion metric, larger is slower.
    pub traffic_density: f32,
    /// Lane directions are mirrored on this segment.
    pub inverted: bool,
    pub lanes: Vec<Lane>,
    /// Stop nodes placed along this segment's lanes.
    pub stops: Vec<NodeId>,
}

impl NetSegment {
    /// The node at the far end when leaving `from`, with the lane direction
    /// of that traversal given the searcher's forward direction.
    pub fn traverse(&self, from: NodeId, forward: TravelDirection) -> (NodeId, TravelDirection) {
        let reverse = forward.reverse();
        if from == self.start {
            let dir = if self.inverted { reverse } else { forward };
            (self.end, dir)
        } else {
            let dir = if self.inverted { forward } else { reverse };
            (self.start, dir)
        }
    }

    /// The last lane usable by `classes` in `direction`.
    pub fn usable_lane(&self, classes: LaneClasses, direction: TravelDirection) -> Option<&Lane> {
        self.lanes
            .iter()
            .rev()
            .find(|lane| lane.class.intersects(classes) && lane.direction.allows(direction))
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Read-only transport network topology.
pub trait TransportNetwork: Send + Sync {
    fn grid(&self) -> GridSpec;

    /// Nodes registered in a grid cell. Empty outside the grid.
    fn nodes_in_cell(&self, cell: CellCoord) -> &[NodeId];

    fn node(&self, id: NodeId) -> Option<&NetNode>;

    fn segment(&self, id: SegmentId) -> Option<&NetSegment>;

    /// Nodes of other transport modes reachable from `node` by transshipment
    /// (a cargo station next to a road junction, say).
    fn interchanges(&self, _node: NodeId) -> &[NodeId] {
        &[]
    }
}

/// Outside-connection flags of an entity that models trade with other cities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutsideConnection {
    pub incoming: bool,
    pub outgoing: bool,
}

/// Read-only lookups into the host entity model.
pub trait EntityDirectory: Send + Sync {
    /// Outside-connection flags, `None` for ordinary entities. Offers from
    /// outside connections are synthetic and bypass backpressure.
    fn connection(&self, entity: EntityId) -> Option<OutsideConnection>;

    /// Whether the entity serves by air, off the network.
    fn is_air_service(&self, entity: EntityId) -> bool;

    /// Network class the entity anchors on.
    fn node_class(&self, entity: EntityId) -> NodeClass;
}

/// A network with no nodes. Every graph lookup fails, so graph kinds match
/// nothing until a real network is installed.
#[derive(Debug, Default)]
pub struct EmptyNetwork;

impl TransportNetwork for EmptyNetwork {
    fn grid(&self) -> GridSpec {
        GridSpec::default()
    }

    fn nodes_in_cell(&self, _cell: CellCoord) -> &[NodeId] {
        &[]
    }

    fn node(&self, _id: NodeId) -> Option<&NetNode> {
        None
    }

    fn segment(&self, _id: SegmentId) -> Option<&NetSegment> {
        None
    }
}

/// A directory where every entity is an ordinary road-bound building.
#[derive(Debug, Default)]
pub struct PlainDirectory;

impl EntityDirectory for PlainDirectory {
    fn connection(&self, _entity: EntityId) -> Option<OutsideConnection> {
        None
    }

    fn is_air_service(&self, _entity: EntityId) -> bool {
        false
    }

    fn node_class(&self, _entity: EntityId) -> NodeClass {
        NodeClass::Road
    }
}
