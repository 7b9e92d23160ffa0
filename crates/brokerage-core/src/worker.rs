//! Matching threads.
//!
//! Each worker loops: take the next job, copy its snapshot, run the
//! matcher, publish the transfers, release the kind. A matcher that errors
//! or panics ends the job early; whatever it matched before that is still
//! published and the worker carries on with the next job. Only the shutdown
//! sentinel ends the loop.

use crate::config::Algorithm;
use crate::coordinator::{Coordination, MatchJob, WorkItem};
use crate::graph::search::SearchScratch;
use crate::graph::{self, GraphContext};
use crate::legacy;
use crate::session::{MatchError, MatchSession};
use std::any::Any;
use std::io;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info};

/// Threads the host keeps for itself: the producer and the renderer.
const RESERVED_CORES: usize = 2;

/// Available parallelism minus the reserved cores, within `[1, max_workers]`.
pub fn default_worker_count(max_workers: usize) -> usize {
    let cores = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    cores
        .saturating_sub(RESERVED_CORES)
        .clamp(1, max_workers.max(1))
}

/// Fixed set of matching threads.
#[derive(Debug)]
pub struct WorkerPool {
    shared: Arc<Coordination>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `count` workers on `shared`.
    pub fn spawn(shared: Arc<Coordination>, count: usize) -> io::Result<Self> {
        let mut pool = Self {
            shared,
            handles: Vec::with_capacity(count),
        };
        for id in 0..count {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("broker-worker-{id}"))
                .spawn(move || run_worker(id, &shared));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    pool.shutdown();
                    return Err(err);
                }
            }
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every worker after the jobs already queued, and join them.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.shared.push_shutdown(self.handles.len());
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("broker-worker").to_string();
            if handle.join().is_err() {
                error!(worker = %name, "worker thread exited with a panic");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(id: usize, shared: &Coordination) {
    info!(worker = id, "matching worker started");
    let mut scratch = SearchScratch::new();
    loop {
        match shared.next_item() {
            WorkItem::Shutdown => break,
            WorkItem::Match(job) => {
                let transfers = run_job(shared, &job, &mut scratch, id);
                shared.book.release(job.kind, &job.ends);
                shared.finish(job.kind, transfers);
            }
        }
    }
    info!(worker = id, "matching worker stopped");
}

/// Run one job to completion. Returns the number of transfers published.
pub(crate) fn run_job(
    shared: &Coordination,
    job: &MatchJob,
    scratch: &mut SearchScratch,
    worker: usize,
) -> usize {
    let started = Instant::now();
    let mut session = MatchSession::open(shared, job);

    let outcome = catch_unwind(AssertUnwindSafe(|| execute(shared, job, &mut session, scratch)));
    match outcome {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            error!(worker, kind = job.kind.0, %err, "matching failed, ending job early");
        }
        Err(payload) => {
            error!(
                worker,
                kind = job.kind.0,
                panic = %panic_message(payload.as_ref()),
                matched = session.records().len(),
                "matcher panicked, ending job early"
            );
            scratch.reset();
        }
    }

    let transfers = session.close(shared);
    debug!(
        worker,
        kind = job.kind.0,
        transfers,
        elapsed_us = started.elapsed().as_micros() as u64,
        "job finished"
    );
    transfers
}

fn execute(
    shared: &Coordination,
    job: &MatchJob,
    session: &mut MatchSession,
    scratch: &mut SearchScratch,
) -> Result<usize, MatchError> {
    let policy = shared
        .catalog
        .get(job.kind)
        .ok_or(MatchError::UnknownKind(job.kind))?;

    match job.options.algorithm {
        Algorithm::Graph if policy.constraints.uses_graph() => {
            let network = shared.network();
            let ctx = GraphContext {
                network: network.as_ref(),
                directory: shared.directory.as_ref(),
                policy,
                cost: job.options.cost,
            };
            Ok(graph::match_kind(session, scratch, &ctx, &job.options))
        }
        _ => {
            legacy::match_kind(session, policy);
            Ok(session.records().len())
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
