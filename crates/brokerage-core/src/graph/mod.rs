//! Multi-source nearest-neighbor matching over the transport network.
//!
//! Each pass fixes one side as *queries* and the other as *objects*.
//! Queries anchor on their nearest network node at distance zero. Objects
//! are seeded at their own nodes and grow outwards together, Dijkstra
//! style, from one shared frontier; the first object to reach a query's
//! node is matched with it. A node belongs to the first object that
//! reaches it, so every object covers the region it is closest to.
//!
//! A job runs several passes ([`MatchMode`]) one after another, re-running a
//! pass while it leaves matchable work behind.

pub mod cost;
pub mod locate;
pub mod search;

use crate::coordinator::JobOptions;
use crate::id::NodeId;
use crate::network::{EntityDirectory, TransportNetwork, TravelDirection};
use crate::offer::{Offer, Position, Side, MAX_PRIORITY, PRIORITY_COUNT};
use crate::policy::{AirService, KindPolicy, PathConstraints};
use crate::session::{MatchSession, OfferRef};
use cost::CostModel;
use search::{Claim, Frontier, SearchScratch};
use std::ops::RangeInclusive;
use tracing::{debug, error};

/// Frontier priority of an object at its own node. Non-zero so a seeded
/// node is never mistaken for a query anchor.
pub const SEED_COST: f32 = 0.125;

/// Flat cost per unit of straight-line distance for air carriers.
pub const AIR_COST_FACTOR: f32 = 0.05;

/// Extra cost of switching transport mode at an interchange.
pub const INTERCHANGE_COST: f32 = 1000.0;

/// Lowest band of the object side in the rebalancing, import and export
/// passes.
const SURPLUS_BAND: usize = 2;

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// One graph-search pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// Supply travels to urgent demand.
    SatisfyDemand,
    /// Demand (warehouses, services) soaks up remaining supply.
    SoakSupply,
    /// Nearly full warehouses feed nearly empty ones.
    Rebalance,
    /// Outside connections fill urgent demand.
    Imports,
    /// Surplus leaves through outside connections.
    Exports,
}

impl MatchMode {
    /// Passes run for a kind, in order.
    pub fn sequence(policy: &KindPolicy, exports: bool) -> Vec<MatchMode> {
        let mut modes = vec![MatchMode::SatisfyDemand, MatchMode::SoakSupply];
        if policy.warehoused {
            modes.extend([MatchMode::Rebalance, MatchMode::Imports]);
            if exports {
                modes.push(MatchMode::Exports);
            }
        }
        modes
    }

    /// Side whose offers travel through the network.
    pub fn object_side(self) -> Side {
        match self {
            MatchMode::SatisfyDemand | MatchMode::Rebalance | MatchMode::Exports => Side::Supply,
            MatchMode::SoakSupply | MatchMode::Imports => Side::Demand,
        }
    }

    pub fn query_side(self) -> Side {
        self.object_side().opposite()
    }

    pub fn query_bands(self, constraints: &PathConstraints) -> RangeInclusive<usize> {
        let top = MAX_PRIORITY as usize;
        match self {
            MatchMode::SatisfyDemand => constraints.min_query_satisfy as usize..=top,
            MatchMode::SoakSupply => constraints.min_query_soak as usize..=top,
            MatchMode::Rebalance => 0..=1,
            MatchMode::Imports => 0..=0,
            MatchMode::Exports => 0..=top,
        }
    }

    pub fn min_object_band(self, constraints: &PathConstraints) -> usize {
        match self {
            MatchMode::SatisfyDemand => constraints.min_object_satisfy as usize,
            MatchMode::SoakSupply => constraints.min_object_soak as usize,
            MatchMode::Rebalance | MatchMode::Imports | MatchMode::Exports => SURPLUS_BAND,
        }
    }

    pub fn allows_air(self, air: AirService) -> bool {
        match air {
            AirService::Disabled => false,
            AirService::Always => true,
            AirService::SoakOnly => self == MatchMode::SoakSupply,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Read-only inputs of one graph job.
pub struct GraphContext<'a> {
    pub network: &'a dyn TransportNetwork,
    pub directory: &'a dyn EntityDirectory,
    pub policy: &'a KindPolicy,
    pub cost: CostModel,
}

impl GraphContext<'_> {
    fn locate(&self, offer: &Offer) -> Option<NodeId> {
        let class = self.directory.node_class(offer.entity);
        locate::nearest_node(self.network, offer.position, class)
    }

    fn query_allowed(&self, mode: MatchMode, offer: &Offer, band: usize) -> bool {
        let connection = self.directory.connection(offer.entity);
        let allowed = match mode {
            MatchMode::Imports => connection.is_some_and(|c| c.outgoing),
            MatchMode::Exports => !connection.is_some_and(|c| c.outgoing),
            MatchMode::SoakSupply => !offer.exclusive,
            MatchMode::SatisfyDemand => !(offer.exclusive && band < 2),
            MatchMode::Rebalance => !(offer.exclusive && band < 1),
        };
        // Air carriers never wait at a node.
        allowed && !self.directory.is_air_service(offer.entity)
    }

    fn object_allowed(&self, mode: MatchMode, offer: &Offer, band: usize) -> bool {
        let connection = self.directory.connection(offer.entity);
        match mode {
            MatchMode::Imports => !connection.is_some_and(|c| c.incoming),
            MatchMode::Exports => {
                !(offer.exclusive && band < SURPLUS_BAND) && !connection.is_some_and(|c| c.outgoing)
            }
            MatchMode::Rebalance => !(offer.exclusive && band < SURPLUS_BAND),
            MatchMode::SatisfyDemand | MatchMode::SoakSupply => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Run every pass of a job. Returns how many transfers were made.
pub fn match_kind(
    session: &mut MatchSession,
    scratch: &mut SearchScratch,
    ctx: &GraphContext<'_>,
    options: &JobOptions,
) -> usize {
    let start = session.records().len();
    for mode in MatchMode::sequence(ctx.policy, options.exports) {
        for pass in 1..=options.max_passes {
            let before = session.records().len();
            let again = run_mode(session, scratch, ctx, mode);
            scratch.reset();
            let made = session.records().len() - before;
            debug!(kind = %ctx.policy.name, ?mode, pass, transfers = made, again, "graph pass done");
            if !again || made == 0 {
                break;
            }
        }
    }
    session.records().len() - start
}

/// Move what an object and a query can exchange. Flags a deferral when
/// either was already exhausted.
fn exchange(
    session: &mut MatchSession,
    object: OfferRef,
    query: OfferRef,
    cost: f32,
    deferred: &mut bool,
) -> u64 {
    let moved = match object.side {
        Side::Supply => session.transfer(object, query, cost),
        Side::Demand => session.transfer(query, object, cost),
    };
    if moved == 0 {
        *deferred = true;
    }
    moved as u64
}

/// One pass. Returns `true` if matchable amount was left behind because an
/// offer ran out mid-pass, so a re-run may find more matches.
pub fn run_mode(
    session: &mut MatchSession,
    scratch: &mut SearchScratch,
    ctx: &GraphContext<'_>,
    mode: MatchMode,
) -> bool {
    let constraints = &ctx.policy.constraints;
    let query_side = mode.query_side();
    let object_side = mode.object_side();

    // Anchor queries.
    let mut anchors: Vec<(NodeId, Position)> = Vec::new();
    let mut queries = 0usize;
    for band in mode.query_bands(constraints).rev() {
        for index in 0..session.offers(query_side, band).len() {
            let r = OfferRef::new(query_side, band, index);
            let offer = *session.offer(r);
            if offer.is_empty() || !ctx.query_allowed(mode, &offer, band) {
                continue;
            }
            let Some(node) = ctx.locate(&offer) else {
                continue;
            };
            if matches!(scratch.claim(node), Some(Claim::Query(_))) {
                continue;
            }
            scratch.set_claim(node, Claim::Query(r));
            anchors.push((node, offer.position));
            queries += 1;
        }
    }
    if queries == 0 {
        return false;
    }

    // Seed objects.
    let air = mode.allows_air(constraints.air_service);
    let mut deferred = false;
    let mut remaining: u64 = 0;
    'objects: for band in (mode.min_object_band(constraints)..PRIORITY_COUNT).rev() {
        for index in 0..session.offers(object_side, band).len() {
            let r = OfferRef::new(object_side, band, index);
            let offer = *session.offer(r);
            if offer.is_empty() || !ctx.object_allowed(mode, &offer, band) {
                continue;
            }

            if air && ctx.directory.is_air_service(offer.entity) {
                for &(node, position) in &anchors {
                    let cost = offer.position.distance(&position) * AIR_COST_FACTOR;
                    scratch.push(r, node, cost);
                }
                remaining += offer.amount as u64;
                continue;
            }

            let Some(node) = ctx.locate(&offer) else {
                continue;
            };
            match scratch.claim(node) {
                Some(Claim::Object { .. }) => {
                    remaining += offer.amount as u64;
                    continue;
                }
                Some(Claim::Query(q)) if session.offer(q).entity == offer.entity => {
                    if mode == MatchMode::Rebalance {
                        continue;
                    }
                    // The entity would be matching with itself; drop its query.
                    queries -= 1;
                    if queries == 0 {
                        break 'objects;
                    }
                    remaining += offer.amount as u64;
                }
                Some(Claim::Query(q)) => {
                    // Already at the query's node: deliver on the spot.
                    remaining += offer.amount as u64;
                    remaining -= exchange(session, r, q, 0.0, &mut deferred);
                    if !session.offer(q).is_empty() {
                        continue;
                    }
                    queries -= 1;
                    if queries == 0 {
                        break 'objects;
                    }
                    if session.offer(r).is_empty() {
                        continue;
                    }
                }
                None => remaining += offer.amount as u64,
            }
            scratch.set_claim(
                node,
                Claim::Object {
                    object: r,
                    cost: 0.0,
                },
            );
            scratch.push_seed(r, node, SEED_COST);
        }
    }
    if queries == 0 {
        return deferred && remaining != 0;
    }

    // Expand.
    let mut forward: Option<TravelDirection> = None;
    while queries > 0 {
        let Some(entry) = scratch.pop() else {
            break;
        };
        let direction = *forward.get_or_insert_with(|| {
            if session.offer(entry.object).active {
                TravelDirection::Forward
            } else {
                TravelDirection::Backward
            }
        });

        match scratch.claim(entry.node) {
            Some(Claim::Query(q)) => {
                let moved = exchange(session, entry.object, q, entry.cost, &mut deferred);
                remaining = remaining.saturating_sub(moved);
                if remaining == 0 {
                    break;
                }
                if !session.offer(q).is_empty() {
                    deferred = true;
                }
                queries -= 1;
                if queries == 0 {
                    break;
                }
            }
            Some(Claim::Object { .. }) if !entry.seed => continue,
            _ => {}
        }

        expand(scratch, ctx, &entry, direction);
        scratch.set_claim(
            entry.node,
            Claim::Object {
                object: entry.object,
                cost: entry.cost,
            },
        );
    }

    deferred && remaining != 0
}

/// Push the unreached neighbors of `entry.node`. Segments the node lists
/// but the network does not know are logged and skipped.
fn expand(
    scratch: &mut SearchScratch,
    ctx: &GraphContext<'_>,
    entry: &Frontier,
    direction: TravelDirection,
) {
    let constraints = &ctx.policy.constraints;
    let Some(node) = ctx.network.node(entry.node) else {
        return;
    };

    for seg_id in node.segments.iter().copied().chain(node.lane_segment) {
        let Some(segment) = ctx.network.segment(seg_id) else {
            error!(
                kind = %ctx.policy.name,
                node = ?entry.node,
                segment = ?seg_id,
                segments = node.segments.len(),
                "node lists a segment missing from the network, skipping it"
            );
            continue;
        };
        let (next, lane_direction) = segment.traverse(entry.node, direction);
        if !scratch.is_open(next) {
            continue;
        }
        let cost = ctx.cost.cost(seg_id, segment, constraints.lanes, lane_direction);
        if cost == 0.0 {
            continue;
        }
        scratch.push(entry.object, next, entry.cost + cost);

        if constraints.public_transport {
            for &stop in &segment.stops {
                let usable = ctx
                    .network
                    .node(stop)
                    .is_some_and(|n| n.lanes.intersects(constraints.lanes));
                if usable && scratch.is_open(stop) {
                    scratch.push(entry.object, stop, entry.cost + cost * 2.0);
                }
            }
        }
    }

    for &next in ctx.network.interchanges(entry.node) {
        if scratch.is_open(next) {
            scratch.push(entry.object, next, entry.cost + INTERCHANGE_COST);
        }
    }
}
