//! Edge cost functions for graph search.
//!
//! A cost of zero means "not traversable": the segment has no lane the kind
//! may use in the direction of travel.

use crate::config::MatchmakingConfig;
use crate::id::SegmentId;
use crate::network::{NetSegment, TravelDirection};
use crate::policy::LaneClasses;
use crate::rng::ChaosRng;
use slotmap::Key;

/// Resolution of the chaos frequency roll.
pub const CHAOS_SCALE: u32 = 36_864;

/// How segment costs are computed for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostModel {
    /// Travel time at the lane speed limit.
    #[default]
    Uncongested,
    /// Travel time with traffic density and a fixed junction penalty added
    /// to the length.
    Congested,
    /// Uncongested cost, multiplied on some segments by a deterministic
    /// per-segment factor.
    Chaotic {
        /// Out of [`CHAOS_SCALE`]: how many segments get warped.
        randomness: u32,
        /// Warped segments get a factor in `[1, range)`.
        range: u32,
    },
}

impl CostModel {
    pub fn from_config(config: &MatchmakingConfig) -> Self {
        if config.chaos_frequency > 0.0 {
            CostModel::Chaotic {
                randomness: (config.chaos_frequency * CHAOS_SCALE as f32) as u32,
                range: (config.chaos_amplitude * 10.0) as u32,
            }
        } else if config.congestion_aware {
            CostModel::Congested
        } else {
            CostModel::Uncongested
        }
    }

    /// Cost of crossing `segment` in `direction` for a carrier using `classes`.
    pub fn cost(
        &self,
        id: SegmentId,
        segment: &NetSegment,
        classes: LaneClasses,
        direction: TravelDirection,
    ) -> f32 {
        let Some(lane) = segment.usable_lane(classes, direction) else {
            return 0.0;
        };
        if lane.speed_limit <= 0.0 {
            return 0.0;
        }
        match *self {
            CostModel::Uncongested => segment.length / lane.speed_limit,
            CostModel::Congested => {
                (segment.length + segment.traffic_density + 10.0) / lane.speed_limit
            }
            CostModel::Chaotic { randomness, range } => {
                let base = segment.length / lane.speed_limit;
                let seed = (randomness as u64).wrapping_mul(id.data().as_ffi());
                let mut rng = ChaosRng::new(seed);
                if rng.below(CHAOS_SCALE) < randomness {
                    base * rng.range(1, range.max(1)).max(1) as f32
                } else {
                    base
                }
            }
        }
    }
}
