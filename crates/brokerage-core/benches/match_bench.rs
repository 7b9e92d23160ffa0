//! Criterion benchmarks for the matchers.
//!
//! Two benchmark groups:
//! - `legacy`: proximity matching of 200 and 1000 offers per side
//! - `graph`: graph search over a 64x64 road grid with 200 offers per side

use brokerage_core::config::MatchmakingConfig;
use brokerage_core::coordinator::JobOptions;
use brokerage_core::graph::cost::CostModel;
use brokerage_core::graph::search::SearchScratch;
use brokerage_core::graph::{self, GraphContext};
use brokerage_core::id::{NodeId, ResourceKind};
use brokerage_core::legacy;
use brokerage_core::network::{NodeClass, PlainDirectory};
use brokerage_core::offer::{Position, Side};
use brokerage_core::policy::{KindPolicy, PathConstraints};
use brokerage_core::session::MatchSession;
use brokerage_core::test_utils::*;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

// ===========================================================================
// Builders
// ===========================================================================

const GRID_SIDE: usize = 64;
const GRID_SPACING: f32 = 40.0;

/// Pseudo-random but fixed coordinate in `[-extent, extent)`.
fn coord(i: u32, salt: u32, extent: f32) -> f32 {
    let h = i.wrapping_mul(2_654_435_761).wrapping_add(salt.wrapping_mul(40_503));
    (h % 10_000) as f32 / 10_000.0 * 2.0 * extent - extent
}

fn build_session(per_side: u32, extent: f32) -> MatchSession {
    let mut session = MatchSession::new(ResourceKind(0));
    for i in 0..per_side {
        let supply = offer_at(i, coord(i, 1, extent), coord(i, 2, extent), 1 + i % 9, (i % 8) as u8);
        let demand = offer_at(
            per_side + i,
            coord(i, 3, extent),
            coord(i, 4, extent),
            1 + i % 5,
            (i % 8) as u8,
        );
        session.push(Side::Supply, supply);
        session.push(Side::Demand, demand);
    }
    session
}

/// Square road grid centered on the origin.
fn build_grid() -> GridNetwork {
    let mut net = GridNetwork::new();
    let half = GRID_SIDE as f32 * GRID_SPACING / 2.0;
    let mut ids: Vec<NodeId> = Vec::with_capacity(GRID_SIDE * GRID_SIDE);
    for row in 0..GRID_SIDE {
        for col in 0..GRID_SIDE {
            let position = Position::new(
                col as f32 * GRID_SPACING - half,
                row as f32 * GRID_SPACING - half,
            );
            ids.push(net.add_node(position, NodeClass::Road));
        }
    }
    for row in 0..GRID_SIDE {
        for col in 0..GRID_SIDE {
            let here = ids[row * GRID_SIDE + col];
            if col + 1 < GRID_SIDE {
                net.add_road(here, ids[row * GRID_SIDE + col + 1], GRID_SPACING);
            }
            if row + 1 < GRID_SIDE {
                net.add_road(here, ids[(row + 1) * GRID_SIDE + col], GRID_SPACING);
            }
        }
    }
    net
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_legacy(c: &mut Criterion) {
    let mut group = c.benchmark_group("legacy");
    let policy = KindPolicy::legacy("shopping", 2e-7);

    for per_side in [200u32, 1000] {
        group.bench_function(format!("match_{per_side}_per_side"), |b| {
            b.iter_batched(
                || build_session(per_side, 2000.0),
                |mut session| {
                    legacy::match_kind(&mut session, &policy);
                    session
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");
    let net = build_grid();
    let extent = GRID_SIDE as f32 * GRID_SPACING / 2.0;
    let policy = KindPolicy::legacy("goods", 1e-7)
        .with_constraints(PathConstraints::CARGO)
        .warehoused();
    let options = JobOptions::new(&MatchmakingConfig::default(), &policy, false);

    for (label, cost) in [
        ("uncongested", CostModel::Uncongested),
        ("congested", CostModel::Congested),
    ] {
        let ctx = GraphContext {
            network: &net,
            directory: &PlainDirectory,
            policy: &policy,
            cost,
        };
        let mut scratch = SearchScratch::new();
        group.bench_function(format!("grid_64_{label}_200_per_side"), |b| {
            b.iter_batched(
                || build_session(200, extent),
                |mut session| {
                    graph::match_kind(&mut session, &mut scratch, &ctx, &options);
                    session
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_legacy, bench_graph);
criterion_main!(benches);
