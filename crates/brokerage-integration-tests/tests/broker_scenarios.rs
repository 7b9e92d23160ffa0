//! Cross-crate broker scenarios.
//!
//! Drives a real worker pool over `brokerage-network` topology and checks
//! what the host sees: which transfers arrive, when, and with what amounts.

mod common;

use brokerage_core::broker::{Broker, Placement};
use brokerage_core::config::{Algorithm, BrokerConfig, MatchmakingConfig};
use brokerage_core::coordinator::WorkStatus;
use brokerage_core::id::EntityId;
use brokerage_core::network::{NodeClass, OutsideConnection};
use brokerage_core::test_utils::*;
use brokerage_network::{EntityInfo, EntityRegistry};
use common::*;
use std::sync::Arc;

/// Tick until the pool has run one full cycle and its results are applied.
fn run_cycle(broker: &mut Broker, host: &mut RecordingHost) {
    broker.tick(host);
    broker.wait_idle();
    broker.tick(host);
}

fn one_tick_dispatch() -> BrokerConfig {
    BrokerConfig {
        dispatch_interval: 1,
        ..BrokerConfig::default()
    }
}

// ===========================================================================
// Matching scenarios
// ===========================================================================

/// Supply 10 at (0,0) p3 and demand 6 at (1,0) p3 under proximity matching:
/// one transfer of 6.
#[test]
fn legacy_pair_moves_the_smaller_amount() {
    let mut broker = Broker::builder().workers(2).build().unwrap();
    let mut host = RecordingHost::new();
    let shopping = broker.catalog().kind_by_name("shopping").unwrap();

    broker.submit_outgoing(shopping, offer_at(1, 0.0, 0.0, 10, 3));
    broker.submit_incoming(shopping, offer_at(2, 1.0, 0.0, 6, 3));
    run_cycle(&mut broker, &mut host);

    assert_eq!(host.transfers.len(), 1);
    let t = host.transfers[0];
    assert_eq!(t.amount, 6);
    assert_eq!(t.supply.amount, 10);
    assert_eq!(t.demand.amount, 6);
}

/// Query at one end of a three-segment road, object at the other: matched
/// with the accumulated cost of the path.
#[test]
fn graph_match_over_road_network_reports_path_cost() {
    let (net, _) = chain_road(3, 2.0);
    let mut broker = Broker::builder()
        .network(Arc::new(net))
        .directory(Arc::new(EntityRegistry::new()))
        .workers(2)
        .build()
        .unwrap();
    let mut host = RecordingHost::new();
    let goods = broker.catalog().kind_by_name("goods").unwrap();
    broker.set_cache_kind(Some(goods));

    broker.submit_outgoing(goods, offer_at(1, 300.0, 0.0, 4, 3));
    broker.submit_incoming(goods, offer_at(2, 0.0, 0.0, 4, 3));
    broker.tick(&mut host);
    broker.wait_idle();

    let colored = broker.coloring(EntityId::Building(2)).unwrap();
    assert_eq!(colored.matched.unwrap().cost, 6.0);

    broker.tick(&mut host);
    assert_eq!(host.transfers.len(), 1);
    assert_eq!(host.total_amount(), 4);
}

/// Entities anchored on rail never reach a road-only object.
#[test]
fn node_class_from_registry_separates_networks() {
    let (net, _) = chain_road(3, 2.0);
    let registry = EntityRegistry::new();
    registry.register(
        EntityId::Building(2),
        EntityInfo {
            node_class: NodeClass::Rail,
            ..EntityInfo::default()
        },
    );
    let mut broker = Broker::builder()
        .network(Arc::new(net))
        .directory(Arc::new(registry))
        .workers(1)
        .build()
        .unwrap();
    let mut host = RecordingHost::new();
    let goods = broker.catalog().kind_by_name("goods").unwrap();

    broker.submit_outgoing(goods, offer_at(1, 300.0, 0.0, 4, 3));
    broker.submit_incoming(goods, offer_at(2, 0.0, 0.0, 4, 3));
    run_cycle(&mut broker, &mut host);
    assert!(host.transfers.is_empty());
}

/// A per-kind override sends a graph kind through proximity matching, so
/// it matches without any network at all.
#[test]
fn toml_override_selects_legacy_matcher() {
    let config = BrokerConfig::from_toml_str(
        r#"
        max_workers = 2

        [matchmaking.overrides]
        goods = "legacy"
        "#,
    )
    .unwrap();
    assert_eq!(config.matchmaking.algorithm_for("goods"), Algorithm::Legacy);

    let mut broker = Broker::builder().config(config).build().unwrap();
    let mut host = RecordingHost::new();
    let goods = broker.catalog().kind_by_name("goods").unwrap();
    broker.submit_outgoing(goods, offer_at(1, 0.0, 0.0, 3, 3));
    broker.submit_incoming(goods, offer_at(2, 5.0, 0.0, 3, 3));
    run_cycle(&mut broker, &mut host);
    assert_eq!(host.total_amount(), 3);
}

/// Swapping the network between cycles takes effect for the next job.
#[test]
fn set_network_applies_to_next_cycle() {
    let mut broker = Broker::builder().workers(1).build().unwrap();
    let mut host = RecordingHost::new();
    let goods = broker.catalog().kind_by_name("goods").unwrap();

    broker.submit_outgoing(goods, offer_at(1, 300.0, 0.0, 4, 3));
    broker.submit_incoming(goods, offer_at(2, 0.0, 0.0, 4, 3));
    run_cycle(&mut broker, &mut host);
    assert!(host.transfers.is_empty());

    let (net, _) = chain_road(3, 2.0);
    broker.set_network(Arc::new(net));
    broker.submit_outgoing(goods, offer_at(1, 300.0, 0.0, 4, 3));
    broker.submit_incoming(goods, offer_at(2, 0.0, 0.0, 4, 3));
    run_cycle(&mut broker, &mut host);
    assert_eq!(host.transfers.len(), 1);
}

// ===========================================================================
// Backpressure and removal
// ===========================================================================

/// Organic offers submitted while their kind is busy wait in the side
/// buffer, merge per entity, and enter the next job exactly once. Offers
/// from outside connections skip the buffer.
#[test]
fn busy_kind_buffers_organic_offers_and_merges_once() {
    init_tracing();
    let (net, _) = chain_road(3, 2.0);
    let gate = Arc::new(GateNetwork::closed(net));
    let registry = EntityRegistry::new();
    registry.register(
        EntityId::Building(50),
        EntityInfo {
            connection: Some(OutsideConnection {
                incoming: true,
                outgoing: true,
            }),
            ..EntityInfo::default()
        },
    );
    let mut broker = Broker::builder()
        .config(one_tick_dispatch())
        .network(gate.clone())
        .directory(Arc::new(registry))
        .workers(1)
        .build()
        .unwrap();
    let mut host = RecordingHost::new();
    let coal = broker.catalog().kind_by_name("coal").unwrap();

    broker.submit_outgoing(coal, offer_at(1, 300.0, 0.0, 4, 3));
    broker.submit_incoming(coal, offer_at(2, 0.0, 0.0, 4, 3));
    broker.tick(&mut host);
    let busy = wait_for(|| broker.status(coal) == Some(WorkStatus::Busy));

    let first = broker.submit_outgoing(coal, offer_at(3, 300.0, 0.0, 5, 3));
    let second = broker.submit_outgoing(coal, offer_at(3, 300.0, 0.0, 2, 3));
    let demand = broker.submit_incoming(coal, offer_at(4, 0.0, 0.0, 20, 3));
    let synthetic = broker.submit_outgoing(coal, offer_at(50, 200.0, 0.0, 1, 0));
    let buffered = broker.side_buffered(coal);

    gate.open();
    broker.wait_idle();

    assert!(busy);
    assert_eq!(first, Placement::SideBuffer);
    assert_eq!(second, Placement::SideBuffer);
    assert_eq!(demand, Placement::SideBuffer);
    assert!(matches!(synthetic, Placement::Table { .. }));
    assert_eq!(buffered, 2);

    // Applies the first job's match and folds the side buffer.
    broker.tick(&mut host);
    assert_eq!(broker.side_buffered(coal), 0);
    broker.wait_idle();
    broker.tick(&mut host);
    run_cycle(&mut broker, &mut host);

    let from_three: u32 = host
        .transfers
        .iter()
        .filter(|t| t.supply.entity == EntityId::Building(3))
        .map(|t| t.amount)
        .sum();
    assert_eq!(from_three, 7);
    assert!(host
        .transfers
        .iter()
        .any(|t| t.supply.entity == EntityId::Building(1) && t.amount == 4));
}

/// Withdrawing an entity while its kind's job runs drops that job's
/// matches for the entity.
#[test]
fn removal_during_job_drops_its_matches() {
    init_tracing();
    let (net, _) = chain_road(3, 2.0);
    let gate = Arc::new(GateNetwork::closed(net));
    let mut broker = Broker::builder()
        .network(gate.clone())
        .workers(1)
        .build()
        .unwrap();
    let mut host = RecordingHost::new();
    let coal = broker.catalog().kind_by_name("coal").unwrap();

    broker.submit_outgoing(coal, offer_at(1, 300.0, 0.0, 4, 3));
    broker.submit_incoming(coal, offer_at(2, 0.0, 0.0, 4, 3));
    broker.tick(&mut host);
    let busy = wait_for(|| broker.status(coal) == Some(WorkStatus::Busy));
    broker.remove_offers(coal, EntityId::Building(1));
    gate.open();
    broker.wait_idle();

    let report = broker.tick(&mut host);
    assert!(busy);
    assert_eq!(report.applied, 0);
    assert_eq!(report.dropped, 1);
    assert!(host.transfers.is_empty());
}

/// Withdrawing an entity whose match is queued for the host reverts it:
/// the partner's offer comes back and can be matched again.
#[test]
fn removal_reverts_queued_match_to_partner() {
    let mut broker = Broker::builder().workers(1).build().unwrap();
    let mut host = RecordingHost::new();
    let shopping = broker.catalog().kind_by_name("shopping").unwrap();

    broker.submit_outgoing(shopping, offer_at(1, 0.0, 0.0, 4, 3));
    broker.submit_incoming(shopping, offer_at(2, 1.0, 0.0, 4, 3));
    broker.tick(&mut host);
    broker.wait_idle();

    broker.remove_offers(shopping, EntityId::Building(2));
    broker.submit_incoming(shopping, offer_at(5, 2.0, 0.0, 10, 3));
    run_cycle(&mut broker, &mut host);

    assert_eq!(host.transfers.len(), 1);
    let t = host.transfers[0];
    assert_eq!(t.supply.entity, EntityId::Building(1));
    assert_eq!(t.demand.entity, EntityId::Building(5));
    assert_eq!(t.amount, 4);
}

/// A kind held busy across many dispatch ticks never gets a second job:
/// every tick finds it busy, nothing new is queued and the pool never has
/// two of its jobs running at once.
#[test]
fn busy_kind_runs_one_job_at_a_time() {
    init_tracing();
    let (net, _) = chain_road(3, 2.0);
    let gate = Arc::new(GateNetwork::closed(net));
    let observer = Arc::new(CountingObserver::default());
    let mut broker = Broker::builder()
        .config(one_tick_dispatch())
        .network(gate.clone())
        .observer(observer.clone())
        .workers(4)
        .build()
        .unwrap();
    let mut host = RecordingHost::new();
    let coal = broker.catalog().kind_by_name("coal").unwrap();

    broker.submit_outgoing(coal, offer_at(1, 300.0, 0.0, 4, 3));
    broker.submit_incoming(coal, offer_at(2, 0.0, 0.0, 4, 3));
    broker.tick(&mut host);
    assert!(wait_for(|| gate.inside() == 1));
    assert_eq!(broker.status(coal), Some(WorkStatus::Busy));

    for i in 0..6 {
        broker.submit_outgoing(coal, offer_at(10 + i, 300.0, 0.0, 1, 3));
        broker.submit_incoming(coal, offer_at(20 + i, 0.0, 0.0, 1, 3));
        let report = broker.tick(&mut host);
        assert!(report.dispatched < broker.catalog().len(), "tick {i} requeued coal");
        assert_eq!(broker.status(coal), Some(WorkStatus::Busy));
        assert_eq!(observer.count_for(coal), 0);
    }
    // Idle workers had every chance to pick up a stray job by now.
    std::thread::sleep(std::time::Duration::from_millis(50));
    let stats = broker.stats();
    assert_eq!(stats.queued_jobs, 0);
    assert_eq!(stats.busy_kinds, 1);
    assert_eq!(stats.queue_full_kinds, 1);
    assert_eq!(gate.inside(), 1);
    assert_eq!(broker.side_buffered(coal), 12);

    gate.open();
    broker.wait_idle();
    assert!(wait_for(|| observer.count_for(coal) == 1));

    // The next dispatch folds the buffered offers into one new job.
    broker.tick(&mut host);
    assert_eq!(broker.side_buffered(coal), 0);
    broker.wait_idle();
    broker.tick(&mut host);
    assert!(wait_for(|| observer.count_for(coal) == 2));

    assert_eq!(gate.max_inside(), 1);
    assert!(host
        .transfers
        .iter()
        .any(|t| t.supply.entity == EntityId::Building(1) && t.amount == 4));
    assert!(host
        .transfers
        .iter()
        .any(|t| t.supply.entity != EntityId::Building(1)));
}

// ===========================================================================
// Lifecycle
// ===========================================================================

/// Many kinds with offers, several workers: `wait_idle` returns, nothing is
/// left queued and the observer heard about every job.
#[test]
fn pool_converges_to_idle() {
    init_tracing();
    let (net, _) = chain_road(10, 3.0);
    let observer = Arc::new(CountingObserver::default());
    let mut broker = Broker::builder()
        .network(Arc::new(net))
        .observer(observer.clone())
        .workers(4)
        .build()
        .unwrap();
    let mut host = RecordingHost::new();
    let kinds: Vec<_> = broker.catalog().kinds().collect();

    for (i, &kind) in kinds.iter().enumerate() {
        let i = i as u32;
        broker.submit_outgoing(kind, offer_at(i * 2, 100.0 * (i % 10) as f32, 0.0, 3, 4));
        broker.submit_incoming(kind, offer_at(i * 2 + 1, 0.0, 0.0, 3, 4));
    }
    let report = broker.tick(&mut host);
    broker.wait_idle();

    // The observer hears about a job just after the pool goes idle.
    let heard_all = wait_for(|| observer.count() == report.dispatched);
    let stats = broker.stats();
    assert!(heard_all);
    assert_eq!(stats.busy_kinds, 0);
    assert_eq!(stats.queued_jobs, 0);
    assert!(stats.last_cycle.is_some());
    for &kind in &kinds {
        assert_eq!(broker.status(kind), Some(WorkStatus::Idle));
    }
}

/// Disabling discards pending offers and ignores new ones until enabled.
#[test]
fn disable_discards_and_ignores_offers() {
    let mut broker = Broker::builder().workers(1).build().unwrap();
    let mut host = RecordingHost::new();
    let shopping = broker.catalog().kind_by_name("shopping").unwrap();

    broker.submit_outgoing(shopping, offer_at(1, 0.0, 0.0, 4, 3));
    broker.set_enabled(false);
    assert_eq!(
        broker.submit_incoming(shopping, offer_at(2, 1.0, 0.0, 4, 3)),
        Placement::Ignored
    );
    assert_eq!(broker.tick(&mut host).dispatched, 0);

    broker.set_enabled(true);
    broker.submit_incoming(shopping, offer_at(2, 1.0, 0.0, 4, 3));
    run_cycle(&mut broker, &mut host);
    assert!(host.transfers.is_empty());

    broker.submit_outgoing(shopping, offer_at(1, 0.0, 0.0, 4, 3));
    broker.submit_incoming(shopping, offer_at(2, 1.0, 0.0, 4, 3));
    run_cycle(&mut broker, &mut host);
    assert_eq!(host.total_amount(), 4);
}

/// Changing the cache kind forgets the old kind's coloring.
#[test]
fn cache_follows_cache_kind() {
    let mut config = one_tick_dispatch();
    config.matchmaking = MatchmakingConfig {
        cache_kind: Some("shopping".into()),
        ..MatchmakingConfig::default()
    };
    let mut broker = Broker::builder().config(config).workers(1).build().unwrap();
    let mut host = RecordingHost::new();
    let shopping = broker.catalog().kind_by_name("shopping").unwrap();
    let worker = broker.catalog().kind_by_name("worker").unwrap();

    broker.submit_outgoing(shopping, offer_at(1, 0.0, 0.0, 4, 3));
    broker.submit_incoming(shopping, offer_at(9, 1.0e6, 1.0e6, 4, 0));
    broker.tick(&mut host);
    broker.wait_idle();
    assert!(broker.coloring(EntityId::Building(1)).is_some());

    broker.set_cache_kind(Some(worker));
    assert!(broker.coloring(EntityId::Building(1)).is_none());
}
