//! Property-based tests driving the broker with random host activity.
//!
//! Whatever order offers, withdrawals and ticks arrive in, no entity is ever
//! asked to ship or receive more than it offered.

use brokerage_core::broker::{Broker, Placement};
use brokerage_core::id::{EntityId, ResourceKind};
use brokerage_core::test_utils::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum HostOp {
    Supply { kind: usize, entity: u32, slot: u32, amount: u32, priority: u8 },
    Demand { kind: usize, entity: u32, slot: u32, amount: u32, priority: u8 },
    Remove { kind: usize, entity: u32 },
    Tick,
    Settle,
}

const KINDS: [&str; 2] = ["shopping", "goods"];

fn arb_ops() -> impl Strategy<Value = Vec<HostOp>> {
    proptest::collection::vec(
        prop_oneof![
            4 => (0..2usize, 0..12u32, 0..=10u32, 1..20u32, 0..8u8).prop_map(
                |(kind, entity, slot, amount, priority)| HostOp::Supply { kind, entity, slot, amount, priority }
            ),
            4 => (0..2usize, 0..12u32, 0..=10u32, 1..20u32, 0..8u8).prop_map(
                |(kind, entity, slot, amount, priority)| HostOp::Demand { kind, entity, slot, amount, priority }
            ),
            1 => (0..2usize, 0..12u32).prop_map(|(kind, entity)| HostOp::Remove { kind, entity }),
            3 => Just(HostOp::Tick),
            1 => Just(HostOp::Settle),
        ],
        1..80,
    )
}

/// Units accepted by the broker per (kind, side, entity).
#[derive(Default)]
struct Ledger {
    offered: HashMap<(ResourceKind, bool, EntityId), u64>,
}

impl Ledger {
    fn accept(&mut self, placement: Placement, kind: ResourceKind, supply: bool, entity: EntityId, amount: u32) {
        if placement != Placement::Ignored {
            *self.offered.entry((kind, supply, entity)).or_default() += amount as u64;
        }
    }

    fn check(&self, host: &RecordingHost) {
        let mut moved: HashMap<(ResourceKind, bool, EntityId), u64> = HashMap::new();
        for t in &host.transfers {
            *moved.entry((t.kind, true, t.supply.entity)).or_default() += t.amount as u64;
            *moved.entry((t.kind, false, t.demand.entity)).or_default() += t.amount as u64;
        }
        for (key, amount) in moved {
            let offered = self.offered.get(&key).copied().unwrap_or(0);
            assert!(amount <= offered, "{key:?} moved {amount} of {offered}");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn transfers_never_exceed_offers(ops in arb_ops()) {
        let (net, _) = chain_network(10, 3.0);
        let mut broker = Broker::builder()
            .network(Arc::new(net))
            .workers(2)
            .build()
            .unwrap();
        let kinds: Vec<ResourceKind> = KINDS
            .iter()
            .map(|name| broker.catalog().kind_by_name(name).unwrap())
            .collect();
        let mut host = RecordingHost::new();
        let mut ledger = Ledger::default();

        for op in ops {
            match op {
                HostOp::Supply { kind, entity, slot, amount, priority } => {
                    let offer = offer_at(entity, slot as f32 * 100.0, 0.0, amount, priority);
                    let placed = broker.submit_outgoing(kinds[kind], offer);
                    ledger.accept(placed, kinds[kind], true, offer.entity, amount);
                }
                HostOp::Demand { kind, entity, slot, amount, priority } => {
                    let offer = offer_at(entity, slot as f32 * 100.0, 0.0, amount, priority);
                    let placed = broker.submit_incoming(kinds[kind], offer);
                    ledger.accept(placed, kinds[kind], false, offer.entity, amount);
                }
                HostOp::Remove { kind, entity } => {
                    broker.remove_offers(kinds[kind], EntityId::Building(entity));
                }
                HostOp::Tick => {
                    broker.tick(&mut host);
                }
                HostOp::Settle => {
                    broker.wait_idle();
                    broker.tick(&mut host);
                }
            }
        }
        broker.wait_idle();
        broker.tick(&mut host);
        ledger.check(&host);
    }
}
