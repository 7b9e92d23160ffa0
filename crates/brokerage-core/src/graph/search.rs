//! Per-node scratch state for graph search.
//!
//! The claim map and frontier live as long as the worker that owns them and
//! are reused across jobs. Only nodes touched by a pass are cleared after
//! it, so a pass costs what it visits rather than the size of the network.

use crate::id::NodeId;
use crate::session::OfferRef;
use slotmap::SecondaryMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Who holds a node during one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Claim {
    /// A query offer anchored here, waiting to be reached.
    Query(OfferRef),
    /// An object offer reached (or was seeded at) this node.
    Object { object: OfferRef, cost: f32 },
}

/// A frontier entry: `object` can reach `node` at `cost`.
#[derive(Debug, Clone, Copy)]
pub struct Frontier {
    /// Heap priority. Equal to `cost` except for seeds.
    pub priority: f32,
    /// Accumulated path cost from the object's own node.
    pub cost: f32,
    pub object: OfferRef,
    pub node: NodeId,
    /// Entry placed by the object pass at the object's own node.
    pub seed: bool,
    seq: u64,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // Reversed: BinaryHeap is a max-heap and we pop the cheapest first,
    // oldest first among equals.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Reusable search arena.
#[derive(Debug, Default)]
pub struct SearchScratch {
    claims: SecondaryMap<NodeId, Claim>,
    touched: Vec<NodeId>,
    frontier: BinaryHeap<Frontier>,
    seq: u64,
}

impl SearchScratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, node: NodeId) -> Option<Claim> {
        self.claims.get(node).copied()
    }

    pub fn set_claim(&mut self, node: NodeId, claim: Claim) {
        if self.claims.insert(node, claim).is_none() {
            self.touched.push(node);
        }
    }

    /// True if nothing has reached `node` by expansion yet. Query anchors
    /// count as unreached.
    pub fn is_open(&self, node: NodeId) -> bool {
        !matches!(self.claims.get(node), Some(Claim::Object { .. }))
    }

    pub fn push(&mut self, object: OfferRef, node: NodeId, cost: f32) {
        self.push_entry(object, node, cost, cost, false);
    }

    pub fn push_seed(&mut self, object: OfferRef, node: NodeId, priority: f32) {
        self.push_entry(object, node, priority, 0.0, true);
    }

    fn push_entry(&mut self, object: OfferRef, node: NodeId, priority: f32, cost: f32, seed: bool) {
        self.seq += 1;
        self.frontier.push(Frontier {
            priority,
            cost,
            object,
            node,
            seed,
            seq: self.seq,
        });
    }

    pub fn pop(&mut self) -> Option<Frontier> {
        self.frontier.pop()
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    pub fn touched_len(&self) -> usize {
        self.touched.len()
    }

    /// Forget the last pass.
    pub fn reset(&mut self) {
        for node in self.touched.drain(..) {
            self.claims.remove(node);
        }
        self.frontier.clear();
        self.seq = 0;
    }
}
