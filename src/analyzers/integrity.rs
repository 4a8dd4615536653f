//! Sanity check on declared vehicle ids before trip segmentation.
//!
//! Segmentation pairs consecutive pings of one vehicle, so it only means
//! something when an id really follows one taxi. A dataset whose ids were
//! replaced by a row counter (one id per row), or whose "vehicles" jump
//! across the city between pings, would produce nonsense trips.

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::analyzers::segment::group_by_vehicle;
use crate::config::Thresholds;
use crate::error::{PipelineError, Result};
use crate::features::FeaturedPing;
use crate::geo::haversine_km;

/// Below this many pings (or pairs) the ratio-based rules are not applied.
const MIN_SAMPLE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdVerdict {
    Plausible,
    /// Integer ids forming one contiguous run, one per row.
    SyntheticSequential,
    /// Nearly every ping has its own id.
    MostlyUnique,
    /// Consecutive pings of a vehicle are too far apart to be one taxi.
    Incoherent,
}

impl IdVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdVerdict::Plausible => "plausible",
            IdVerdict::SyntheticSequential => "synthetic sequential ids",
            IdVerdict::MostlyUnique => "nearly one id per ping",
            IdVerdict::Incoherent => "spatially incoherent tracks",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleIdDiagnostic {
    pub verdict: IdVerdict,
    pub pings: usize,
    pub distinct_ids: usize,
    pub distinct_ratio: f64,
    pub sequential: bool,
    pub pairs: usize,
    pub teleport_pairs: usize,
    pub teleport_share: f64,
}

impl VehicleIdDiagnostic {
    pub fn is_plausible(&self) -> bool {
        self.verdict == IdVerdict::Plausible
    }

    /// Turns a non-plausible diagnostic into [`PipelineError::SuspectVehicleIds`].
    pub fn require_plausible(self) -> Result<Self> {
        if self.is_plausible() {
            Ok(self)
        } else {
            Err(PipelineError::SuspectVehicleIds(self))
        }
    }
}

impl fmt::Display for VehicleIdDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} pings, {} distinct ids (ratio {:.2}), sequential={}, {} of {} consecutive pairs implausibly fast (share {:.2})",
            self.verdict.as_str(),
            self.pings,
            self.distinct_ids,
            self.distinct_ratio,
            self.sequential,
            self.teleport_pairs,
            self.pairs,
            self.teleport_share,
        )
    }
}

/// True when every id is an integer and row `i` carries `first + i`.
///
/// Small inputs are never called sequential: a handful of taxis with
/// consecutive fleet numbers is ordinary.
fn is_sequential(pings: &[FeaturedPing]) -> bool {
    if pings.len() < MIN_SAMPLE {
        return false;
    }
    let mut expected: Option<i64> = None;
    for p in pings {
        let Ok(id) = p.ping.vehicle_id.trim().parse::<i64>() else {
            return false;
        };
        match expected {
            Some(e) if e != id => return false,
            _ => expected = id.checked_add(1),
        }
        if expected.is_none() {
            return false;
        }
    }
    true
}

#[tracing::instrument(skip_all, fields(pings = pings.len()))]
pub fn check_vehicle_ids(pings: &[FeaturedPing], thresholds: &Thresholds) -> VehicleIdDiagnostic {
    let vehicles = group_by_vehicle(pings);
    let distinct_ids = vehicles.len();
    let distinct_ratio = if pings.is_empty() {
        0.0
    } else {
        distinct_ids as f64 / pings.len() as f64
    };
    let sequential = is_sequential(pings);

    let mut pairs = 0usize;
    let mut teleport_pairs = 0usize;
    for track in vehicles.values() {
        for w in track.windows(2) {
            let (prev, next) = (&w[0].ping, &w[1].ping);
            let distance = haversine_km(prev.lat, prev.lon, next.lat, next.lon);
            let elapsed = (next.timestamp - prev.timestamp).num_seconds();
            if elapsed <= 0 && distance == 0.0 {
                continue;
            }
            pairs += 1;
            let too_fast = elapsed <= 0
                || distance / (elapsed as f64 / 3600.0) > thresholds.teleport_speed_kmh;
            if too_fast {
                teleport_pairs += 1;
            }
        }
    }
    let teleport_share = if pairs == 0 {
        0.0
    } else {
        teleport_pairs as f64 / pairs as f64
    };

    let verdict = if sequential {
        IdVerdict::SyntheticSequential
    } else if pings.len() >= MIN_SAMPLE && distinct_ratio > thresholds.max_distinct_id_ratio {
        IdVerdict::MostlyUnique
    } else if pairs >= MIN_SAMPLE && teleport_share > thresholds.max_teleport_share {
        IdVerdict::Incoherent
    } else {
        IdVerdict::Plausible
    };

    let diagnostic = VehicleIdDiagnostic {
        verdict,
        pings: pings.len(),
        distinct_ids,
        distinct_ratio,
        sequential,
        pairs,
        teleport_pairs,
        teleport_share,
    };

    if diagnostic.is_plausible() {
        info!(%diagnostic, "Vehicle ids look usable");
    } else {
        warn!(%diagnostic, "Vehicle ids look unusable for trip segmentation");
    }

    diagnostic
}
