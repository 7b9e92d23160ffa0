//! Bounded offer storage.
//!
//! One fixed-capacity ring per (kind, side, band). The producer appends at
//! the write cursor; the worker that owns the kind's job copies the range
//! up to its snapshot and releases it by moving the read cursor. One slot
//! always stays empty so that `read == write` means "empty".
//!
//! Offers that find no room, or that arrive for a kind with a job in
//! flight, wait in [`SideBuffers`] until the next dispatch.

use crate::id::{EntityId, ResourceKind};
use crate::offer::{Offer, Side, PRIORITY_COUNT};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::error;

/// Slots per ring, including the one kept empty.
pub const TABLE_CAPACITY: usize = 256;

/// Cursor positions of one ring, for inspection and invariant checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    pub read: usize,
    pub write: usize,
}

impl Cursors {
    pub fn len(&self) -> usize {
        (self.write + TABLE_CAPACITY - self.read) % TABLE_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }
}

// ---------------------------------------------------------------------------
// OfferTable
// ---------------------------------------------------------------------------

/// A single ring buffer of offers.
#[derive(Debug)]
pub struct OfferTable {
    slots: Mutex<Box<[Option<Offer>]>>,
    read: AtomicUsize,
    write: AtomicUsize,
}

impl Default for OfferTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OfferTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None; TABLE_CAPACITY].into_boxed_slice()),
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<[Option<Offer>]>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cursors(&self) -> Cursors {
        Cursors {
            read: self.read.load(Ordering::Acquire),
            write: self.write.load(Ordering::Acquire),
        }
    }

    #[cfg(test)]
    pub fn has_room(&self) -> bool {
        let c = self.cursors();
        (c.write + 1) % TABLE_CAPACITY != c.read
    }

    /// Append an offer. Returns `false` (and writes nothing) if the ring is full.
    pub fn push(&self, offer: Offer) -> bool {
        let mut slots = self.lock();
        let c = self.cursors();
        let next = (c.write + 1) % TABLE_CAPACITY;
        if next == c.read {
            return false;
        }
        slots[c.write] = Some(offer);
        self.write.store(next, Ordering::Release);
        true
    }

    /// Clamp a job snapshot end to the live range. A snapshot outside
    /// `[read, write]` means cursor arithmetic went wrong somewhere.
    fn checked_end(&self, end: usize) -> usize {
        let c = self.cursors();
        let span = (end + TABLE_CAPACITY - c.read) % TABLE_CAPACITY;
        if end >= TABLE_CAPACITY || span > c.len() {
            error!(
                end,
                read = c.read,
                write = c.write,
                "snapshot end outside live ring range, clamping to write cursor"
            );
            return c.write;
        }
        end
    }

    /// Copy the live offers from the read cursor up to `end`, in ring order.
    /// Cleared slots are skipped.
    pub fn snapshot(&self, end: usize) -> Vec<Offer> {
        let slots = self.lock();
        let end = self.checked_end(end);
        let mut i = self.read.load(Ordering::Acquire);
        let mut out = Vec::with_capacity((end + TABLE_CAPACITY - i) % TABLE_CAPACITY);
        while i != end {
            if let Some(offer) = slots[i] {
                out.push(offer);
            }
            i = (i + 1) % TABLE_CAPACITY;
        }
        out
    }

    /// Drop everything before `end` and move the read cursor there.
    pub fn release(&self, end: usize) {
        let mut slots = self.lock();
        let end = self.checked_end(end);
        let mut i = self.read.load(Ordering::Acquire);
        while i != end {
            slots[i] = None;
            i = (i + 1) % TABLE_CAPACITY;
        }
        self.read.store(end, Ordering::Release);
    }

    /// Clear every live slot offered by `entity`. Returns how many were cleared.
    pub fn remove_entity(&self, entity: EntityId) -> usize {
        let mut slots = self.lock();
        let c = self.cursors();
        let mut removed = 0;
        let mut i = c.read;
        while i != c.write {
            if slots[i].is_some_and(|o| o.entity == entity) {
                slots[i] = None;
                removed += 1;
            }
            i = (i + 1) % TABLE_CAPACITY;
        }
        removed
    }

    /// Live offers, in ring order.
    pub fn pending(&self) -> Vec<Offer> {
        self.snapshot(self.write.load(Ordering::Acquire))
    }
}

// ---------------------------------------------------------------------------
// OfferBook
// ---------------------------------------------------------------------------

/// Write cursors of every band of both sides of one kind, taken at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEnds {
    pub ends: [[usize; PRIORITY_COUNT]; 2],
}

impl SnapshotEnds {
    pub fn end(&self, side: Side, band: usize) -> usize {
        self.ends[side.index()][band]
    }
}

/// All offer tables of all kinds.
#[derive(Debug)]
pub struct OfferBook {
    tables: Box<[OfferTable]>,
}

impl OfferBook {
    pub fn new(kinds: usize) -> Self {
        let tables = (0..kinds * 2 * PRIORITY_COUNT)
            .map(|_| OfferTable::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { tables }
    }

    pub fn table(&self, kind: ResourceKind, side: Side, band: usize) -> &OfferTable {
        &self.tables[(kind.index() * 2 + side.index()) * PRIORITY_COUNT + band]
    }

    /// Write into the highest band from the offer's own band down to 0 that
    /// has room. Returns the band used.
    pub fn place(&self, kind: ResourceKind, side: Side, offer: Offer) -> Option<usize> {
        (0..=offer.band())
            .rev()
            .find(|&band| self.table(kind, side, band).push(offer))
    }

    pub fn snapshot_ends(&self, kind: ResourceKind) -> SnapshotEnds {
        let mut ends = [[0; PRIORITY_COUNT]; 2];
        for side in Side::BOTH {
            for (band, end) in ends[side.index()].iter_mut().enumerate() {
                *end = self.table(kind, side, band).cursors().write;
            }
        }
        SnapshotEnds { ends }
    }

    pub fn release(&self, kind: ResourceKind, ends: &SnapshotEnds) {
        for side in Side::BOTH {
            for band in 0..PRIORITY_COUNT {
                self.table(kind, side, band).release(ends.end(side, band));
            }
        }
    }

    /// Release every pending offer of every kind.
    pub fn discard_all(&self) {
        for table in self.tables.iter() {
            table.release(table.cursors().write);
        }
    }

    pub fn remove_entity(&self, kind: ResourceKind, entity: EntityId) -> usize {
        Side::BOTH
            .iter()
            .flat_map(|&side| (0..PRIORITY_COUNT).map(move |band| (side, band)))
            .map(|(side, band)| self.table(kind, side, band).remove_entity(entity))
            .sum()
    }

    /// Number of live slots of one kind and side, across bands.
    pub fn pending_len(&self, kind: ResourceKind, side: Side) -> usize {
        (0..PRIORITY_COUNT)
            .map(|band| self.table(kind, side, band).cursors().len())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// SideBuffers
// ---------------------------------------------------------------------------

/// Offers waiting for the next dispatch of their kind, merged per entity.
///
/// Owned by the producer thread; workers never see it.
#[derive(Debug)]
pub struct SideBuffers {
    queues: Vec<BTreeMap<EntityId, Offer>>,
}

impl SideBuffers {
    pub fn new(kinds: usize) -> Self {
        Self {
            queues: vec![BTreeMap::new(); kinds * 2 * PRIORITY_COUNT],
        }
    }

    fn slot(kind: ResourceKind, side: Side, band: usize) -> usize {
        (kind.index() * 2 + side.index()) * PRIORITY_COUNT + band
    }

    /// Queue an offer, summing amounts with an offer already queued for the
    /// same entity in the same band.
    pub fn merge(&mut self, kind: ResourceKind, side: Side, offer: Offer) {
        let queue = &mut self.queues[Self::slot(kind, side, offer.band())];
        queue
            .entry(offer.entity)
            .and_modify(|queued| queued.amount = queued.amount.saturating_add(offer.amount))
            .or_insert(offer);
    }

    pub fn get(&self, kind: ResourceKind, side: Side, band: usize, entity: EntityId) -> Option<&Offer> {
        self.queues[Self::slot(kind, side, band)].get(&entity)
    }

    /// Move queued offers of `kind` into the book. Offers that still find no
    /// room stay queued. Returns how many were placed.
    pub fn fold_into(&mut self, kind: ResourceKind, book: &OfferBook) -> usize {
        let mut placed = 0;
        for side in Side::BOTH {
            for band in 0..PRIORITY_COUNT {
                let queue = &mut self.queues[Self::slot(kind, side, band)];
                queue.retain(|_, offer| {
                    if book.place(kind, side, *offer).is_some() {
                        placed += 1;
                        false
                    } else {
                        true
                    }
                });
            }
        }
        placed
    }

    /// Subtract an already-matched amount from an entity's queued offers of
    /// one side, dropping those that reach zero.
    pub fn subtract(&mut self, kind: ResourceKind, side: Side, entity: EntityId, amount: u32) {
        for band in 0..PRIORITY_COUNT {
            let queue = &mut self.queues[Self::slot(kind, side, band)];
            if let Some(offer) = queue.get_mut(&entity) {
                offer.amount = offer.amount.saturating_sub(amount);
                if offer.amount == 0 {
                    queue.remove(&entity);
                }
            }
        }
    }

    pub fn remove_entity(&mut self, kind: ResourceKind, entity: EntityId) {
        for side in Side::BOTH {
            for band in 0..PRIORITY_COUNT {
                self.queues[Self::slot(kind, side, band)].remove(&entity);
            }
        }
    }

    pub fn len(&self, kind: ResourceKind) -> usize {
        Side::BOTH
            .iter()
            .flat_map(|&side| (0..PRIORITY_COUNT).map(move |band| Self::slot(kind, side, band)))
            .map(|slot| self.queues[slot].len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(BTreeMap::is_empty)
    }

    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
    }
}
