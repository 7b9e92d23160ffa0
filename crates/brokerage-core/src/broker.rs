//! Producer-facing facade.
//!
//! A [`Broker`] is owned by the host's simulation thread. It accepts offers,
//! withdraws them, hands matching work to the pool once every dispatch
//! interval and applies finished matches through a [`TransferHost`] on every
//! tick. Nothing here blocks except the lifecycle calls that wait for the
//! pool to drain (`pause`, `set_network`, `set_enabled(false)`, `wait_idle`).

use crate::config::{BrokerConfig, ConfigError, MatchmakingConfig};
use crate::coordinator::{
    BrokerObserver, Coordination, JobOptions, MatchJob, WorkItem, WorkStatus,
};
use crate::id::{EntityId, ResourceKind};
use crate::network::{EmptyNetwork, EntityDirectory, PlainDirectory, TransportNetwork};
use crate::offer::{MAX_PRIORITY, Offer, Side};
use crate::policy::ResourceCatalog;
use crate::sink::CacheEntry;
use crate::store::SideBuffers;
use crate::worker::{WorkerPool, default_worker_count};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ===========================================================================
// Host interface
// ===========================================================================

/// Receives matched transfers on the producer thread.
pub trait TransferHost {
    /// Start moving `amount` units of `kind` from `supply` to `demand`.
    /// The offers are as they were when matched.
    fn apply_transfer(&mut self, kind: ResourceKind, supply: &Offer, demand: &Offer, amount: u32);
}

/// Errors raised while starting a broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start matching worker: {0}")]
    Spawn(#[from] io::Error),
}

/// Where a submitted offer ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Written into the kind's table at `band`.
    Table { band: usize },
    /// Held back until the next dispatch of its kind.
    SideBuffer,
    /// Dropped: the broker is disabled or the kind is unknown.
    Ignored,
}

/// What one call to [`Broker::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Transfers handed to the host.
    pub applied: usize,
    /// Transfers dropped because a party was withdrawn mid-job.
    pub dropped: usize,
    /// Jobs queued for the pool.
    pub dispatched: usize,
}

/// Point-in-time scheduling counters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrokerStats {
    pub busy_kinds: usize,
    pub queued_jobs: usize,
    pub queue_full_kinds: usize,
    pub completed_jobs: u64,
    /// Transfers published by workers since start.
    pub transfers: u64,
    /// Time from the first dispatch of the last cycle until the pool went idle.
    pub last_cycle: Option<Duration>,
}

// ===========================================================================
// Builder
// ===========================================================================

/// Assembles a [`Broker`] from configuration and host collaborators.
pub struct BrokerBuilder {
    config: BrokerConfig,
    catalog: Option<ResourceCatalog>,
    network: Arc<dyn TransportNetwork>,
    directory: Arc<dyn EntityDirectory>,
    observer: Option<Arc<dyn BrokerObserver>>,
    workers: Option<usize>,
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self {
            config: BrokerConfig::default(),
            catalog: None,
            network: Arc::new(EmptyNetwork),
            directory: Arc::new(PlainDirectory),
            observer: None,
            workers: None,
        }
    }
}

impl BrokerBuilder {
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this catalog instead of the one the configuration describes.
    pub fn catalog(mut self, catalog: ResourceCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn network(mut self, network: Arc<dyn TransportNetwork>) -> Self {
        self.network = network;
        self
    }

    pub fn directory(mut self, directory: Arc<dyn EntityDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn BrokerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Exact pool size, bypassing the core-count heuristic. A pool of zero
    /// queues jobs that never run, which is only useful for inspecting
    /// dispatch.
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = Some(count);
        self
    }

    pub fn build(self) -> Result<Broker, BrokerError> {
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => self.config.catalog()?,
        };
        self.config.validate(&catalog)?;
        let kinds = catalog.len();

        let shared = Arc::new(Coordination::new(
            Arc::new(catalog),
            self.network,
            self.directory,
            self.observer,
            self.config.matchmaking.clone(),
        ));
        let workers = self
            .workers
            .unwrap_or_else(|| default_worker_count(self.config.max_workers));
        let pool = WorkerPool::spawn(Arc::clone(&shared), workers)?;
        info!(workers, kinds, "broker started");

        Ok(Broker {
            shared,
            pool,
            side: SideBuffers::new(kinds),
            dispatch_interval: u64::from(self.config.dispatch_interval.max(1)),
            ticks: 0,
            paused: false,
            enabled: true,
            stopped: false,
            last_removed: None,
        })
    }
}

// ===========================================================================
// Broker
// ===========================================================================

/// The matching broker, as seen from the producer thread.
#[derive(Debug)]
pub struct Broker {
    shared: Arc<Coordination>,
    pool: WorkerPool,
    side: SideBuffers,
    dispatch_interval: u64,
    ticks: u64,
    paused: bool,
    enabled: bool,
    /// Set by `shutdown`; ticks do nothing afterwards.
    stopped: bool,
    /// Last entity passed to `remove_offers`; repeats are ignored until the
    /// next submission.
    last_removed: Option<EntityId>,
}

impl Broker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.shared.catalog
    }

    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Scheduling state of `kind`, or `None` if the catalog has no such kind.
    pub fn status(&self, kind: ResourceKind) -> Option<WorkStatus> {
        self.shared
            .catalog
            .contains(kind)
            .then(|| self.shared.status(kind))
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Offer `offer.amount` units of `kind` for pickup.
    pub fn submit_outgoing(&mut self, kind: ResourceKind, offer: Offer) -> Placement {
        self.submit(kind, Side::Supply, offer)
    }

    /// Ask for `offer.amount` units of `kind`.
    pub fn submit_incoming(&mut self, kind: ResourceKind, offer: Offer) -> Placement {
        self.submit(kind, Side::Demand, offer)
    }

    fn submit(&mut self, kind: ResourceKind, side: Side, mut offer: Offer) -> Placement {
        self.last_removed = None;
        if !self.enabled {
            return Placement::Ignored;
        }
        if !self.shared.catalog.contains(kind) {
            warn!(kind = kind.0, entity = ?offer.entity, "offer for unknown resource kind dropped");
            return Placement::Ignored;
        }
        offer.priority = offer.priority.min(MAX_PRIORITY);
        let organic = self.shared.directory.connection(offer.entity).is_none();

        let mut queue = self.shared.lock_queue();
        let state = queue.kind_mut(kind);
        if state.queue_full && organic {
            state.missed += 1;
            drop(queue);
            self.side.merge(kind, side, offer);
            return Placement::SideBuffer;
        }
        let placed = if state.status != WorkStatus::Busy || !organic {
            self.shared.book.place(kind, side, offer)
        } else {
            None
        };
        drop(queue);

        match placed {
            Some(band) => Placement::Table { band },
            None => {
                self.side.merge(kind, side, offer);
                Placement::SideBuffer
            }
        }
    }

    /// Withdraw every offer `entity` has made, for every kind.
    ///
    /// Matches already queued for the host that involve the entity are
    /// reverted: the partner's offer is submitted again with the matched
    /// amount. Kinds with a job in flight remember the entity and drop its
    /// matches when they are drained.
    pub fn remove_offers(&mut self, kind: ResourceKind, entity: EntityId) {
        if !self.enabled || self.last_removed == Some(entity) {
            return;
        }

        let reverted = self.shared.sink.take_involving(entity);
        for record in &reverted {
            let (side, partner) = if record.supply.entity == entity {
                (Side::Demand, record.demand)
            } else {
                (Side::Supply, record.supply)
            };
            if partner.entity == entity {
                continue;
            }
            let partner = Offer {
                amount: record.amount,
                ..partner
            };
            self.submit(record.kind, side, partner);
        }
        // Set after the resubmissions above, which clear it.
        self.last_removed = Some(entity);

        let mut queue = self.shared.lock_queue();
        let mut cleared = 0;
        for k in self.shared.catalog.kinds() {
            if queue.kind(k).status == WorkStatus::Busy {
                queue.kind_mut(k).removed.insert(entity);
            } else {
                cleared += self.shared.book.remove_entity(k, entity);
            }
        }
        drop(queue);

        for k in self.shared.catalog.kinds() {
            self.side.remove_entity(k, entity);
        }
        debug!(
            kind = kind.0,
            ?entity,
            cleared,
            reverted = reverted.len(),
            "offers withdrawn"
        );
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Apply finished matches, then dispatch new jobs if this tick is a
    /// dispatch tick. Does nothing once the broker is shut down.
    pub fn tick(&mut self, host: &mut dyn TransferHost) -> TickReport {
        if self.stopped {
            return TickReport::default();
        }
        let (applied, dropped) = self.drain(host);
        self.ticks += 1;
        let dispatched = if self.enabled && !self.paused && self.ticks % self.dispatch_interval == 0
        {
            self.dispatch()
        } else {
            0
        };
        TickReport {
            applied,
            dropped,
            dispatched,
        }
    }

    fn drain(&mut self, host: &mut dyn TransferHost) -> (usize, usize) {
        let records = self.shared.sink.drain();
        if records.is_empty() {
            return (0, 0);
        }

        let queue = self.shared.lock_queue();
        let (live, withdrawn): (Vec<_>, Vec<_>) = records.into_iter().partition(|record| {
            let removed = &queue.kind(record.kind).removed;
            !removed.contains(&record.supply.entity) && !removed.contains(&record.demand.entity)
        });
        drop(queue);

        for record in &live {
            host.apply_transfer(record.kind, &record.supply, &record.demand, record.amount);
            self.side
                .subtract(record.kind, Side::Supply, record.supply.entity, record.amount);
            self.side
                .subtract(record.kind, Side::Demand, record.demand.entity, record.amount);
        }
        if !withdrawn.is_empty() {
            debug!(dropped = withdrawn.len(), "dropped matches of withdrawn offers");
        }
        (live.len(), withdrawn.len())
    }

    /// Queue a job for every idle kind. Returns how many were queued.
    fn dispatch(&mut self) -> usize {
        let mut queue = self.shared.lock_queue();
        let cache_kind = queue.cache_kind;
        let mut dispatched = 0;

        for kind in self.shared.catalog.kinds() {
            let Some(policy) = self.shared.catalog.get(kind) else {
                continue;
            };
            if queue.kind(kind).status != WorkStatus::Idle {
                queue.mark_queue_full(kind, &policy.name);
                continue;
            }

            let state = queue.kind_mut(kind);
            if !state.removed.is_empty() {
                // Matches published after the last drain may still name
                // entities withdrawn during that job.
                let dropped = self.shared.sink.discard_involving(kind, &state.removed);
                if dropped > 0 {
                    debug!(kind = %policy.name, dropped, "dropped matches of withdrawn offers");
                }
                state.removed.clear();
            }
            state.status = WorkStatus::Pending;

            let folded = self.side.fold_into(kind, &self.shared.book);
            if folded > 0 {
                debug!(kind = %policy.name, folded, "side buffer folded into tables");
            }
            let job = MatchJob {
                kind,
                ends: self.shared.book.snapshot_ends(kind),
                options: JobOptions::new(&queue.config, policy, cache_kind == Some(kind)),
            };
            queue.items.push_back(WorkItem::Match(job));
            dispatched += 1;
        }

        if dispatched > 0 && queue.cycle_started.is_none() {
            queue.cycle_started = Some(Instant::now());
        }
        drop(queue);
        self.shared.notify_workers();
        dispatched
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Block until no job is running or queued.
    pub fn wait_idle(&self) {
        self.shared.wait_idle();
    }

    /// Let running jobs finish, then stop dispatching.
    pub fn pause(&mut self) {
        self.shared.wait_idle();
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Install a new network once the pool is idle.
    pub fn set_network(&mut self, network: Arc<dyn TransportNetwork>) {
        self.shared.wait_idle();
        self.shared.replace_network(network);
        info!("transport network replaced");
    }

    /// Disabling waits for the pool, then discards every pending offer and
    /// every unapplied match. Submissions are ignored while disabled.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled && !enabled {
            self.shared.wait_idle();
            self.shared.book.discard_all();
            self.side.clear();
            let discarded = self.shared.sink.drain().len();
            info!(discarded, "broker disabled, pending offers discarded");
        } else if !self.enabled && enabled {
            info!("broker enabled");
        }
        self.enabled = enabled;
    }

    /// Replace the matchmaking settings. Jobs already queued keep the
    /// options they were dispatched with.
    pub fn set_config(&mut self, config: MatchmakingConfig) -> Result<(), ConfigError> {
        config.validate(&self.shared.catalog)?;
        let cache_kind = config
            .cache_kind
            .as_deref()
            .and_then(|name| self.shared.catalog.kind_by_name(name));

        let mut queue = self.shared.lock_queue();
        if queue.cache_kind != cache_kind {
            queue.cache_kind = cache_kind;
            self.shared.cache.clear();
        }
        queue.config = config;
        Ok(())
    }

    /// Record matches of `kind` for [`Broker::coloring`], or stop recording.
    pub fn set_cache_kind(&mut self, kind: Option<ResourceKind>) {
        let mut queue = self.shared.lock_queue();
        if queue.cache_kind != kind {
            queue.cache_kind = kind;
            queue.config.cache_kind = kind
                .and_then(|k| self.shared.catalog.get(k))
                .map(|policy| policy.name.clone());
            self.shared.cache.clear();
        }
    }

    /// What the last job of the cached kind saw for `entity`.
    pub fn coloring(&self, entity: EntityId) -> Option<CacheEntry> {
        self.shared.cache.get(entity)
    }

    pub fn side_buffered(&self, kind: ResourceKind) -> usize {
        self.side.len(kind)
    }

    pub fn stats(&self) -> BrokerStats {
        let queue = self.shared.lock_queue();
        BrokerStats {
            busy_kinds: queue
                .kinds
                .iter()
                .filter(|k| k.status == WorkStatus::Busy)
                .count(),
            queued_jobs: queue
                .items
                .iter()
                .filter(|item| matches!(item, WorkItem::Match(_)))
                .count(),
            queue_full_kinds: queue.kinds.iter().filter(|k| k.queue_full).count(),
            completed_jobs: queue.completed_jobs,
            transfers: queue.transfers,
            last_cycle: queue.last_cycle,
        }
    }

    /// Finish queued jobs and stop the pool. Unapplied matches stay in the
    /// sink until the broker is dropped.
    pub fn shutdown(&mut self) {
        self.stopped = true;
        self.pool.shutdown();
        info!("broker stopped");
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Coordination {
        &self.shared
    }
}
