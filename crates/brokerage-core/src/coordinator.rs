//! Shared state between the producer thread and the matching workers.
//!
//! Everything that both sides touch lives in [`Coordination`]. Scheduling
//! state (job queue, per-kind status, busy counter, configuration) sits
//! behind a single mutex with two condition variables: `jobs_ready` wakes
//! workers, `went_idle` wakes `wait_idle` callers. Offer tables, the
//! transfer sink and the results cache carry their own short-lived locks,
//! always taken after the queue lock and never the other way round.

use crate::config::{Algorithm, MatchmakingConfig};
use crate::graph::cost::CostModel;
use crate::id::{EntityId, ResourceKind};
use crate::network::{EntityDirectory, TransportNetwork};
use crate::policy::{KindPolicy, ResourceCatalog};
use crate::sink::{ResultsCache, TransferSink};
use crate::store::{OfferBook, SnapshotEnds};
use crate::worker::panic_message;
use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Stop reporting "falling behind" after this many reports.
pub const MAX_MISSED_REPORTS: u32 = 200;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Scheduling state of one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkStatus {
    /// No job queued or running; the next dispatch may enqueue one.
    #[default]
    Idle,
    /// A job is queued but no worker has picked it up yet.
    Pending,
    /// A worker is matching this kind.
    Busy,
}

/// Per-job settings, fixed at dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobOptions {
    pub algorithm: Algorithm,
    pub cost: CostModel,
    /// Record this job's offers and matches in the results cache.
    pub fill_cache: bool,
    pub exports: bool,
    pub max_passes: u32,
}

impl JobOptions {
    pub fn new(config: &MatchmakingConfig, policy: &KindPolicy, fill_cache: bool) -> Self {
        Self {
            algorithm: config.algorithm_for(&policy.name),
            cost: CostModel::from_config(config),
            fill_cache,
            exports: config.enable_exports,
            max_passes: config.max_mode_passes.max(1),
        }
    }
}

/// One dispatched unit of matching work.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchJob {
    pub kind: ResourceKind,
    pub ends: SnapshotEnds,
    pub options: JobOptions,
}

/// What a worker pulls off the queue.
#[derive(Debug)]
pub(crate) enum WorkItem {
    Match(MatchJob),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Queue state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct KindState {
    pub status: WorkStatus,
    /// A dispatch found this kind still busy.
    pub queue_full: bool,
    /// Organic offers diverted while `queue_full` was set.
    pub missed: u32,
    /// Entities withdrawn while this kind's job was in flight.
    pub removed: HashSet<EntityId>,
}

/// Everything guarded by the job-queue mutex.
#[derive(Debug)]
pub(crate) struct JobQueue {
    pub items: VecDeque<WorkItem>,
    pub kinds: Vec<KindState>,
    pub busy: usize,
    pub config: MatchmakingConfig,
    pub cache_kind: Option<ResourceKind>,
    pub missed_reports: u32,
    pub cycle_started: Option<Instant>,
    pub last_cycle: Option<Duration>,
    pub completed_jobs: u64,
    pub transfers: u64,
}

impl JobQueue {
    fn new(kinds: usize, config: MatchmakingConfig, cache_kind: Option<ResourceKind>) -> Self {
        Self {
            items: VecDeque::new(),
            kinds: (0..kinds).map(|_| KindState::default()).collect(),
            busy: 0,
            config,
            cache_kind,
            missed_reports: 0,
            cycle_started: None,
            last_cycle: None,
            completed_jobs: 0,
            transfers: 0,
        }
    }

    pub fn kind(&self, kind: ResourceKind) -> &KindState {
        &self.kinds[kind.index()]
    }

    pub fn kind_mut(&mut self, kind: ResourceKind) -> &mut KindState {
        &mut self.kinds[kind.index()]
    }

    pub fn has_match_jobs(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, WorkItem::Match(_)))
    }

    pub fn is_idle(&self) -> bool {
        self.busy == 0 && !self.has_match_jobs()
    }

    /// Flag a kind whose previous job has not finished by dispatch time.
    pub fn mark_queue_full(&mut self, kind: ResourceKind, name: &str) {
        let reports = self.missed_reports;
        let state = self.kind_mut(kind);
        state.queue_full = true;
        state.missed = 0;
        if reports < MAX_MISSED_REPORTS {
            warn!(
                kind = name,
                report = reports + 1,
                max_reports = MAX_MISSED_REPORTS,
                "matching is falling behind; diverting organic offers"
            );
            self.missed_reports += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Notified from worker threads whenever a kind's job completes. A panic
/// in the callback is logged and does not reach the worker.
pub trait BrokerObserver: Send + Sync {
    fn on_job_finished(&self, kind: ResourceKind);
}

// ---------------------------------------------------------------------------
// Coordination
// ---------------------------------------------------------------------------

/// State shared by the producer facade and every worker.
pub struct Coordination {
    queue: Mutex<JobQueue>,
    jobs_ready: Condvar,
    went_idle: Condvar,
    pub book: OfferBook,
    pub sink: TransferSink,
    pub cache: ResultsCache,
    pub catalog: Arc<ResourceCatalog>,
    pub directory: Arc<dyn EntityDirectory>,
    network: Mutex<Arc<dyn TransportNetwork>>,
    observer: Option<Arc<dyn BrokerObserver>>,
}

impl std::fmt::Debug for Coordination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordination")
            .field("kinds", &self.catalog.len())
            .field("sink", &self.sink.len())
            .finish_non_exhaustive()
    }
}

impl Coordination {
    pub fn new(
        catalog: Arc<ResourceCatalog>,
        network: Arc<dyn TransportNetwork>,
        directory: Arc<dyn EntityDirectory>,
        observer: Option<Arc<dyn BrokerObserver>>,
        config: MatchmakingConfig,
    ) -> Self {
        let cache_kind = config
            .cache_kind
            .as_deref()
            .and_then(|name| catalog.kind_by_name(name));
        Self {
            queue: Mutex::new(JobQueue::new(catalog.len(), config, cache_kind)),
            jobs_ready: Condvar::new(),
            went_idle: Condvar::new(),
            book: OfferBook::new(catalog.len()),
            sink: TransferSink::new(),
            cache: ResultsCache::new(),
            catalog,
            directory,
            network: Mutex::new(network),
            observer,
        }
    }

    /// Lock the scheduling state. A worker that panicked while holding the
    /// lock leaves consistent counters behind, so poisoning is ignored.
    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, JobQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self, kind: ResourceKind) -> WorkStatus {
        self.lock_queue().kind(kind).status
    }

    pub fn is_idle(&self) -> bool {
        self.lock_queue().is_idle()
    }

    /// Block until no job is running or queued.
    pub fn wait_idle(&self) {
        let mut queue = self.lock_queue();
        while !queue.is_idle() {
            queue = self
                .went_idle
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn network(&self) -> Arc<dyn TransportNetwork> {
        Arc::clone(&self.network.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap the network. Callers make sure no job is running.
    pub(crate) fn replace_network(&self, network: Arc<dyn TransportNetwork>) {
        *self.network.lock().unwrap_or_else(PoisonError::into_inner) = network;
    }

    pub(crate) fn notify_workers(&self) {
        self.jobs_ready.notify_all();
    }

    /// Queue one shutdown sentinel per worker.
    pub(crate) fn push_shutdown(&self, workers: usize) {
        let mut queue = self.lock_queue();
        for _ in 0..workers {
            queue.items.push_back(WorkItem::Shutdown);
        }
        drop(queue);
        self.jobs_ready.notify_all();
    }

    /// Worker side: block for the next item and claim its kind.
    pub(crate) fn next_item(&self) -> WorkItem {
        let mut queue = self.lock_queue();
        loop {
            if let Some(item) = queue.items.pop_front() {
                if let WorkItem::Match(job) = &item {
                    let kind = job.kind;
                    queue.busy += 1;
                    queue.kind_mut(kind).status = WorkStatus::Busy;
                }
                return item;
            }
            queue = self
                .jobs_ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Worker side: release the kind and wake idle waiters if this was the
    /// last running job.
    pub(crate) fn finish(&self, kind: ResourceKind, transfers: usize) {
        let mut queue = self.lock_queue();
        let name = name_of(&self.catalog, kind);

        let reports = queue.missed_reports;
        let state = queue.kind_mut(kind);
        if state.queue_full && reports < MAX_MISSED_REPORTS {
            info!(kind = name, missed = state.missed, "accepting offers again");
        }
        state.queue_full = false;
        state.missed = 0;
        state.status = WorkStatus::Idle;

        queue.busy = queue.busy.saturating_sub(1);
        queue.completed_jobs += 1;
        queue.transfers += transfers as u64;

        if queue.is_idle() {
            if let Some(started) = queue.cycle_started.take() {
                queue.last_cycle = Some(started.elapsed());
            }
            self.went_idle.notify_all();
        }
        drop(queue);

        if let Some(observer) = &self.observer {
            let notified = catch_unwind(AssertUnwindSafe(|| observer.on_job_finished(kind)));
            if let Err(payload) = notified {
                error!(
                    kind = name_of(&self.catalog, kind),
                    panic = %panic_message(payload.as_ref()),
                    "job observer panicked"
                );
            }
        }
    }
}

fn name_of(catalog: &ResourceCatalog, kind: ResourceKind) -> &str {
    catalog.get(kind).map(|p| p.name.as_str()).unwrap_or("?")
}
