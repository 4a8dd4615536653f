//! Per-period trip statistics over valid segments.

use crate::analyzers::types::{TripComparison, TripSegment};
use crate::analyzers::utility::{mean, percentile_approx};
use crate::features::TimePeriod;
use std::collections::BTreeMap;

/// Aggregates valid [`TripSegment`]s into one [`TripComparison`] row per time
/// period that has at least one segment, in DAY, NIGHT, OTHER order.
///
/// Averages are exact; medians use [`percentile_approx`] and therefore always
/// report an observed distance and duration.
pub fn compare_trips(segments: &[TripSegment]) -> Vec<TripComparison> {
    let mut by_period: BTreeMap<TimePeriod, (Vec<f64>, Vec<i64>)> = BTreeMap::new();

    for segment in segments {
        let (distances, durations) = by_period.entry(segment.time_period).or_default();
        distances.push(segment.distance_km);
        durations.push(segment.time_diff_sec);
    }

    by_period
        .into_iter()
        .filter_map(|(time_period, (distances, durations))| {
            let durations_f: Vec<f64> = durations.iter().map(|d| *d as f64).collect();

            Some(TripComparison {
                time_period,
                avg_distance_km: mean(&distances),
                avg_duration_sec: mean(&durations_f),
                trip_count: distances.len() as u64,
                median_distance_km: percentile_approx(&distances, 0.5)?,
                median_duration_sec: percentile_approx(&durations, 0.5)?,
            })
        })
        .collect()
}
