//! Zone activity counts and night-time demand ratios.

use std::collections::{BTreeMap, HashMap};

use crate::analyzers::types::{NightDemandZone, ZoneActivity};
use crate::features::{FeaturedPing, GridCell, TimePeriod};
use crate::ingest::Status;

/// `occupied / (available + 1)`. The +1 keeps empty cells finite and damps
/// ratios for cells with few samples.
pub fn demand_ratio(occupied: u64, available: u64) -> f64 {
    occupied as f64 / (available as f64 + 1.0)
}

/// Counts records per (cell, period, status), ordered by those keys.
pub fn zone_activity(pings: &[FeaturedPing]) -> Vec<ZoneActivity> {
    let mut counts: BTreeMap<(GridCell, TimePeriod, Status), u64> = BTreeMap::new();

    for p in pings {
        *counts
            .entry((p.cell, p.time_period, p.ping.status))
            .or_default() += 1;
    }

    counts
        .into_iter()
        .map(|((cell, time_period, status), record_count)| ZoneActivity {
            lat_bin: cell.lat_bin(),
            lon_bin: cell.lon_bin(),
            time_period,
            status,
            record_count,
        })
        .collect()
}

/// Occupied and available NIGHT counts per cell, as a full outer join where a
/// missing side counts as zero. Every cell that has at least one NIGHT ping is
/// returned, unfiltered.
pub fn night_counts(pings: &[FeaturedPing]) -> Vec<NightDemandZone> {
    let mut cells: BTreeMap<GridCell, (u64, u64)> = BTreeMap::new();

    for p in pings.iter().filter(|p| p.time_period == TimePeriod::Night) {
        let entry = cells.entry(p.cell).or_default();
        match p.ping.status {
            Status::Occupied => entry.0 += 1,
            Status::Available => entry.1 += 1,
        }
    }

    cells
        .into_iter()
        .map(|(cell, (occupied_count, available_count))| NightDemandZone {
            lat_bin: cell.lat_bin(),
            lon_bin: cell.lon_bin(),
            occupied_count,
            available_count,
            demand_supply_ratio: demand_ratio(occupied_count, available_count),
        })
        .collect()
}

/// Keeps zones with at least `min_occupied` occupied pings, ranked by
/// descending demand ratio. Ties keep cell order.
pub fn high_demand_zones(zones: Vec<NightDemandZone>, min_occupied: u64) -> Vec<NightDemandZone> {
    let mut kept: Vec<_> = zones
        .into_iter()
        .filter(|z| z.occupied_count >= min_occupied)
        .collect();
    kept.sort_by(|a, b| b.demand_supply_ratio.total_cmp(&a.demand_supply_ratio));
    kept
}

/// Total records per (period, status) across all cells.
pub fn period_totals(activity: &[ZoneActivity]) -> HashMap<(TimePeriod, Status), u64> {
    let mut totals = HashMap::new();
    for row in activity {
        *totals.entry((row.time_period, row.status)).or_default() += row.record_count;
    }
    totals
}
