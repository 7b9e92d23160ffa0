//! Output side of matching: the transfer queue drained by the producer and
//! the results cache read by visualization.

use crate::id::{EntityId, ResourceKind};
use crate::offer::{Offer, Side, TransferRecord};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

// ---------------------------------------------------------------------------
// TransferSink
// ---------------------------------------------------------------------------

/// Completed matches waiting to be applied by the producer.
#[derive(Debug, Default)]
pub struct TransferSink {
    queue: Mutex<VecDeque<TransferRecord>>,
}

impl TransferSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TransferRecord>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn extend(&self, records: impl IntoIterator<Item = TransferRecord>) {
        self.lock().extend(records);
    }

    /// Take every queued record, oldest first.
    pub fn drain(&self) -> Vec<TransferRecord> {
        self.lock().drain(..).collect()
    }

    /// Pull out the queued records that involve `entity`, keeping the rest
    /// in order.
    pub fn take_involving(&self, entity: EntityId) -> Vec<TransferRecord> {
        let mut queue = self.lock();
        let mut taken = Vec::new();
        queue.retain(|record| {
            if record.involves(entity) {
                taken.push(*record);
                false
            } else {
                true
            }
        });
        taken
    }

    /// Drop queued records of `kind` that involve any of `entities`.
    /// Returns how many were dropped.
    pub fn discard_involving(&self, kind: ResourceKind, entities: &HashSet<EntityId>) -> usize {
        let mut queue = self.lock();
        let before = queue.len();
        queue.retain(|record| {
            record.kind != kind
                || !(entities.contains(&record.supply.entity)
                    || entities.contains(&record.demand.entity))
        });
        before - queue.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// ResultsCache
// ---------------------------------------------------------------------------

/// What visualization knows about one entity of the cached kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub kind: ResourceKind,
    pub side: Side,
    /// The entity's offer as seen in the last job.
    pub offer: Offer,
    /// The last match involving the entity, if any.
    pub matched: Option<TransferRecord>,
}

/// Entity-keyed record of the last job's offers and matches for one kind.
#[derive(Debug, Default)]
pub struct ResultsCache {
    entries: Mutex<HashMap<EntityId, CacheEntry>>,
}

impl ResultsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the offers a job starts with, so unmatched entities show up too.
    pub fn seed(&self, kind: ResourceKind, offers: impl IntoIterator<Item = (Side, Offer)>) {
        let mut entries = self.lock();
        for (side, offer) in offers {
            entries.insert(
                offer.entity,
                CacheEntry {
                    kind,
                    side,
                    offer,
                    matched: None,
                },
            );
        }
    }

    /// Record matches against both parties.
    pub fn record(&self, records: &[TransferRecord]) {
        let mut entries = self.lock();
        for record in records {
            for (side, offer) in [(Side::Supply, record.supply), (Side::Demand, record.demand)] {
                entries
                    .entry(offer.entity)
                    .and_modify(|entry| entry.matched = Some(*record))
                    .or_insert(CacheEntry {
                        kind: record.kind,
                        side,
                        offer,
                        matched: Some(*record),
                    });
            }
        }
    }

    pub fn get(&self, entity: EntityId) -> Option<CacheEntry> {
        self.lock().get(&entity).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
