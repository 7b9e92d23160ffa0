//! Greedy proximity matcher.
//!
//! Bands are visited from most to least urgent. Within a band, demand and
//! supply offers take turns: each one searches the other side for the
//! offer with the best proximity score in its own band and the bands just
//! below, and keeps transferring until it is exhausted or nothing is left
//! to pair with. Straight-line distance only; the network is not consulted.

use crate::offer::{Offer, Side, PRIORITY_COUNT};
use crate::policy::KindPolicy;
use crate::session::{MatchSession, OfferRef};

/// Proximity score of a candidate at squared distance `d2` in a band with
/// service area `area`. Larger is better.
pub fn proximity(area: f32, d2: f32, multiplier: f32) -> f32 {
    if multiplier >= 0.0 {
        area / (1.0 + d2 * multiplier)
    } else {
        area - area / (1.0 - d2 * multiplier)
    }
}

/// Match every offer of the session by proximity.
pub fn match_kind(session: &mut MatchSession, policy: &KindPolicy) {
    let multiplier = policy.distance_multiplier;
    let radius = policy.service_radius();

    for band in (0..PRIORITY_COUNT).rev() {
        let demand_len = session.offers(Side::Demand, band).len();
        let supply_len = session.offers(Side::Supply, band).len();
        let (mut d, mut s) = (0, 0);

        while d < demand_len || s < supply_len {
            if d < demand_len {
                let searcher = OfferRef::new(Side::Demand, band, d);
                fill(session, searcher, 0, multiplier, radius);
                d += 1;
            }
            if s < supply_len {
                // Demand of this band before `d` has already had its turn.
                let searcher = OfferRef::new(Side::Supply, band, s);
                fill(session, searcher, d, multiplier, radius);
                s += 1;
            }
        }
    }
}

/// Transfer from the best candidates to `searcher` until it is exhausted or
/// no candidate remains. `own_band_start` skips candidates in the
/// searcher's own band that precede it in the walk.
fn fill(
    session: &mut MatchSession,
    searcher: OfferRef,
    own_band_start: usize,
    multiplier: f32,
    radius: f32,
) {
    let band = searcher.band;
    let other = searcher.side.opposite();
    let floor = 2usize.saturating_sub(band);

    loop {
        let me = *session.offer(searcher);
        if me.is_empty() {
            return;
        }
        let exclusive_floor = if me.exclusive {
            3usize.saturating_sub(band)
        } else {
            floor
        };

        let mut best: Option<(OfferRef, f32)> = None;
        let mut nearest = -1.0f32;
        for b in (floor..=band).rev() {
            let area = b as f32 + 0.1;
            if nearest >= area {
                break;
            }
            let start = if b == band { own_band_start } else { 0 };
            for (i, candidate) in session.offers(other, b).iter().enumerate().skip(start) {
                if !eligible(&me, candidate, b, exclusive_floor) {
                    continue;
                }
                let d2 = me.position.distance_sq(&candidate.position);
                let score = proximity(area, d2, multiplier);
                if score > nearest {
                    nearest = score;
                    best = Some((OfferRef::new(other, b, i), d2));
                    if d2 < radius {
                        break;
                    }
                }
            }
        }

        let Some((found, d2)) = best else {
            return;
        };
        let (supply, demand) = match searcher.side {
            Side::Supply => (searcher, found),
            Side::Demand => (found, searcher),
        };
        if session.transfer(supply, demand, d2.sqrt()) == 0 {
            return;
        }
    }
}

fn eligible(me: &Offer, candidate: &Offer, band: usize, exclusive_floor: usize) -> bool {
    !candidate.is_empty()
        && candidate.entity != me.entity
        && !(candidate.exclusive && band < exclusive_floor)
}
