//! Brokerage Core -- concurrent matching of resource supply and demand.
//!
//! Entities offer to give away or to receive units of a resource kind. The
//! broker collects those offers on the host's simulation thread, matches
//! them on a pool of worker threads and hands the resulting transfers back
//! to the host on a later tick.
//!
//! # Tick Pipeline
//!
//! Each call to [`broker::Broker::tick`] does two things:
//!
//! 1. **Drain** -- Apply every finished match through the host's
//!    [`broker::TransferHost`], skipping matches whose parties were
//!    withdrawn while their job ran.
//! 2. **Dispatch** -- Every `dispatch_interval` ticks, snapshot the offer
//!    tables of each idle kind and queue one job per kind for the pool.
//!
//! A kind never has more than one job in flight. Offers arriving for a busy
//! kind wait in a side buffer and join the next job.
//!
//! # Matchers
//!
//! - [`legacy`] -- Straight-line proximity scored against the kind's
//!   distance multiplier.
//! - [`graph`] -- Multi-source cheapest-path search over the host's
//!   transport network, run in several modes (satisfy demand, soak supply,
//!   rebalance, imports, exports).
//!
//! # Key Types
//!
//! - [`broker::Broker`] -- Producer-facing facade, built with
//!   [`broker::BrokerBuilder`].
//! - [`store::OfferBook`] -- Bounded per-(kind, side, band) offer rings.
//! - [`coordinator::Coordination`] -- Job queue and per-kind status shared
//!   with the workers.
//! - [`worker::WorkerPool`] -- Fixed set of matching threads.
//! - [`policy::ResourceCatalog`] -- Immutable per-kind matching policy.
//! - [`network::TransportNetwork`] / [`network::EntityDirectory`] --
//!   Read-only host data injected at construction.

pub mod broker;
pub mod config;
pub mod coordinator;
pub mod graph;
pub mod id;
pub mod legacy;
pub mod network;
pub mod offer;
pub mod policy;
pub mod rng;
pub mod session;
pub mod sink;
pub mod store;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
