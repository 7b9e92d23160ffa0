//! Job-local working set.
//!
//! A [`MatchSession`] copies a job's snapshot out of the shared offer tables
//! once, so matchers work on plain vectors without touching a lock. Amounts
//! are decremented in the copy only; the shared slots are released
//! wholesale when the job ends.

use crate::coordinator::{Coordination, MatchJob};
use crate::id::ResourceKind;
use crate::offer::{Offer, Side, TransferRecord, PRIORITY_COUNT};
use tracing::warn;

/// Errors a matcher can hit while running a job.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("resource kind {0:?} is not in the catalog")]
    UnknownKind(ResourceKind),
}

/// Address of an offer inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OfferRef {
    pub side: Side,
    pub band: usize,
    pub index: usize,
}

impl OfferRef {
    pub fn new(side: Side, band: usize, index: usize) -> Self {
        Self { side, band, index }
    }
}

/// The offers of one job and the matches made so far.
#[derive(Debug)]
pub struct MatchSession {
    kind: ResourceKind,
    offers: [[Vec<Offer>; PRIORITY_COUNT]; 2],
    records: Vec<TransferRecord>,
    fill_cache: bool,
}

impl MatchSession {
    /// An empty session, filled through [`MatchSession::push`]. Used by
    /// benchmarks and tests that drive a matcher without a broker.
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            offers: Default::default(),
            records: Vec::new(),
            fill_cache: false,
        }
    }

    /// Copy the job's snapshot range of every table of its kind.
    pub fn open(shared: &Coordination, job: &MatchJob) -> Self {
        let mut session = Self::new(job.kind);
        session.fill_cache = job.options.fill_cache;
        for side in Side::BOTH {
            for band in 0..PRIORITY_COUNT {
                let table = shared.book.table(job.kind, side, band);
                for offer in table.snapshot(job.ends.end(side, band)) {
                    if offer.is_empty() {
                        warn!(?offer, band, "skipping zero-amount offer");
                        continue;
                    }
                    session.offers[side.index()][band].push(offer);
                }
            }
        }
        if session.fill_cache {
            shared.cache.clear();
            shared.cache.seed(job.kind, session.all_offers());
        }
        session
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Append an offer to its band. Returns its address.
    pub fn push(&mut self, side: Side, offer: Offer) -> OfferRef {
        let band = offer.band();
        let list = &mut self.offers[side.index()][band];
        list.push(offer);
        OfferRef::new(side, band, list.len() - 1)
    }

    pub fn offers(&self, side: Side, band: usize) -> &[Offer] {
        &self.offers[side.index()][band]
    }

    pub fn offer(&self, r: OfferRef) -> &Offer {
        &self.offers[r.side.index()][r.band][r.index]
    }

    /// Every offer of the session with its side, bands low to high.
    pub fn all_offers(&self) -> impl Iterator<Item = (Side, Offer)> + '_ {
        Side::BOTH.into_iter().flat_map(move |side| {
            self.offers[side.index()]
                .iter()
                .flat_map(move |band| band.iter().map(move |o| (side, *o)))
        })
    }

    /// Move `min(supply, demand)` between two offers and record the match.
    /// Returns the amount moved, zero if either offer is exhausted.
    pub fn transfer(&mut self, supply: OfferRef, demand: OfferRef, cost: f32) -> u32 {
        debug_assert_eq!(supply.side, Side::Supply);
        debug_assert_eq!(demand.side, Side::Demand);

        let s = *self.offer(supply);
        let d = *self.offer(demand);
        let amount = s.amount.min(d.amount);
        if amount == 0 {
            return 0;
        }
        self.records.push(TransferRecord {
            kind: self.kind,
            supply: s,
            demand: d,
            amount,
            cost,
        });
        self.offers[supply.side.index()][supply.band][supply.index].amount -= amount;
        self.offers[demand.side.index()][demand.band][demand.index].amount -= amount;
        amount
    }

    pub fn records(&self) -> &[TransferRecord] {
        &self.records
    }

    /// Publish the matches. Returns how many there were.
    pub fn close(self, shared: &Coordination) -> usize {
        let count = self.records.len();
        shared.sink.extend(self.records.iter().copied());
        if self.fill_cache {
            shared.cache.record(&self.records);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityId;
    use crate::offer::Position;

    fn offer(entity: u32, amount: u32, priority: u8) -> Offer {
        Offer::new(EntityId::Building(entity), Position::default(), amount).with_priority(priority)
    }

    #[test]
    fn transfer_moves_minimum_and_records_prior_amounts() {
        let mut session = MatchSession::new(ResourceKind(0));
        let s = session.push(Side::Supply, offer(1, 10, 3));
        let d = session.push(Side::Demand, offer(2, 6, 3));

        assert_eq!(session.transfer(s, d, 1.0), 6);
        assert_eq!(session.offer(s).amount, 4);
        assert_eq!(session.offer(d).amount, 0);

        let record = session.records()[0];
        assert_eq!(record.amount, 6);
        assert_eq!(record.supply.amount, 10);
        assert_eq!(record.demand.amount, 6);
    }

    #[test]
    fn transfer_with_exhausted_offer_is_noop() {
        let mut session = MatchSession::new(ResourceKind(0));
        let s = session.push(Side::Supply, offer(1, 2, 0));
        let d1 = session.push(Side::Demand, offer(2, 2, 0));
        let d2 = session.push(Side::Demand, offer(3, 2, 0));
        assert_eq!(session.transfer(s, d1, 0.0), 2);
        assert_eq!(session.transfer(s, d2, 0.0), 0);
        assert_eq!(session.records().len(), 1);
    }

    #[test]
    fn push_files_by_band() {
        let mut session = MatchSession::new(ResourceKind(0));
        let r = session.push(Side::Demand, offer(1, 1, 5));
        assert_eq!(r, OfferRef::new(Side::Demand, 5, 0));
        assert_eq!(session.offers(Side::Demand, 5).len(), 1);
        assert_eq!(session.all_offers().count(), 1);
    }
}
