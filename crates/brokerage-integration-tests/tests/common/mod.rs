//! Shared fixtures for the cross-crate scenarios.

#![allow(dead_code)]

use brokerage_core::coordinator::BrokerObserver;
use brokerage_core::id::{NodeId, ResourceKind, SegmentId};
use brokerage_core::network::{CellCoord, GridSpec, NetNode, NetSegment, NodeClass, TransportNetwork};
use brokerage_core::offer::Position;
use brokerage_core::policy::LaneClasses;
use brokerage_network::{RoadNetwork, SegmentSpec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// Road of `len + 1` nodes spaced 100 apart along x. Every segment costs
/// `cost` to cross for vehicles and cargo.
pub fn chain_road(len: usize, cost: f32) -> (RoadNetwork, Vec<NodeId>) {
    let mut net = RoadNetwork::new();
    let pending: Vec<_> = (0..=len)
        .map(|i| net.queue_add_node(Position::new(i as f32 * 100.0, 0.0), NodeClass::Road))
        .collect();
    let result = net.apply_mutations();
    let nodes: Vec<NodeId> = pending
        .into_iter()
        .filter_map(|p| result.resolve_node(p))
        .collect();
    for pair in nodes.windows(2) {
        net.queue_connect(
            pair[0],
            pair[1],
            SegmentSpec::two_way(LaneClasses::VEHICLE | LaneClasses::CARGO, 1.0).with_length(cost),
        );
    }
    net.apply_mutations();
    (net, nodes)
}

/// Network wrapper that holds every lookup until [`GateNetwork::open`] is
/// called, so a test can keep a graph job busy. Also records how many
/// callers were inside `grid` at once.
pub struct GateNetwork {
    inner: RoadNetwork,
    open: Mutex<bool>,
    opened: Condvar,
    inside: AtomicUsize,
    max_inside: AtomicUsize,
}

impl GateNetwork {
    pub fn closed(inner: RoadNetwork) -> Self {
        Self {
            inner,
            open: Mutex::new(false),
            opened: Condvar::new(),
            inside: AtomicUsize::new(0),
            max_inside: AtomicUsize::new(0),
        }
    }

    /// Callers currently in `grid`, blocked or not.
    pub fn inside(&self) -> usize {
        self.inside.load(Ordering::SeqCst)
    }

    pub fn max_inside(&self) -> usize {
        self.max_inside.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl TransportNetwork for GateNetwork {
    fn grid(&self) -> GridSpec {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        drop(open);
        let grid = self.inner.grid();
        self.inside.fetch_sub(1, Ordering::SeqCst);
        grid
    }

    fn nodes_in_cell(&self, cell: CellCoord) -> &[NodeId] {
        self.inner.nodes_in_cell(cell)
    }

    fn node(&self, id: NodeId) -> Option<&NetNode> {
        self.inner.node(id)
    }

    fn segment(&self, id: SegmentId) -> Option<&NetSegment> {
        self.inner.segment(id)
    }

    fn interchanges(&self, node: NodeId) -> &[NodeId] {
        self.inner.interchanges(node)
    }
}

/// Counts finished jobs, in total and per kind.
#[derive(Debug, Default)]
pub struct CountingObserver {
    pub finished: AtomicUsize,
    per_kind: Mutex<HashMap<ResourceKind, usize>>,
}

impl CountingObserver {
    pub fn count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn count_for(&self, kind: ResourceKind) -> usize {
        self.per_kind.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

impl BrokerObserver for CountingObserver {
    fn on_job_finished(&self, kind: ResourceKind) {
        *self.per_kind.lock().unwrap().entry(kind).or_default() += 1;
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Route broker logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Spin until `f` holds, for at most a few seconds.
pub fn wait_for(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..5000 {
        if f() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    false
}
