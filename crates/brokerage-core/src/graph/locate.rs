//! Nearest-node lookup on the spatial grid.

use crate::id::NodeId;
use crate::network::{CellCoord, NodeClass, TransportNetwork};
use crate::offer::Position;

/// Rings searched around the center cell before giving up.
pub const MAX_RING: i32 = 4;

/// The nearest node of `class` to `position`.
///
/// The center cell is searched first. Only if it has no node of the class
/// are the rings around it searched, one at a time, stopping at the first
/// ring that yields a node.
pub fn nearest_node(
    network: &dyn TransportNetwork,
    position: Position,
    class: NodeClass,
) -> Option<NodeId> {
    let grid = network.grid();
    let center = grid.cell_of(position);

    let mut best: Option<(NodeId, f32)> = None;
    scan_cell(network, center, position, class, &mut best);
    if best.is_some() {
        return best.map(|(id, _)| id);
    }

    for ring in 1..=MAX_RING {
        for cell in ring_cells(center, ring) {
            if grid.contains(cell) {
                scan_cell(network, cell, position, class, &mut best);
            }
        }
        if best.is_some() {
            break;
        }
    }
    best.map(|(id, _)| id)
}

fn scan_cell(
    network: &dyn TransportNetwork,
    cell: CellCoord,
    position: Position,
    class: NodeClass,
    best: &mut Option<(NodeId, f32)>,
) {
    for &id in network.nodes_in_cell(cell) {
        let Some(node) = network.node(id) else {
            continue;
        };
        if node.class != class {
            continue;
        }
        let d2 = node.position.distance_sq(&position);
        if best.is_none_or(|(_, b)| d2 < b) {
            *best = Some((id, d2));
        }
    }
}

/// Cells on the perimeter of the square `ring` cells out from `center`.
fn ring_cells(center: CellCoord, ring: i32) -> impl Iterator<Item = CellCoord> {
    let horizontal = (-ring..=ring).flat_map(move |dx| {
        [
            CellCoord::new(center.x + dx, center.z - ring),
            CellCoord::new(center.x + dx, center.z + ring),
        ]
    });
    let vertical = (1 - ring..ring).flat_map(move |dz| {
        [
            CellCoord::new(center.x - ring, center.z + dz),
            CellCoord::new(center.x + ring, center.z + dz),
        ]
    });
    horizontal.chain(vertical)
}
