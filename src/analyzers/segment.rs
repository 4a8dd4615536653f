//! Rebuilds trip segments from consecutive pings of the same vehicle.
//!
//! Each vehicle's pings are sorted by time and scanned in adjacent pairs;
//! the first ping of a vehicle has no predecessor and yields nothing.

use std::collections::BTreeMap;
use tracing::debug;

use crate::analyzers::types::TripSegment;
use crate::config::Thresholds;
use crate::features::FeaturedPing;
use crate::geo::haversine_km;

/// Outlier limits for a segment. Both bounds are inclusive, both lower bounds
/// exclusive of zero.
#[derive(Debug, Clone, Copy)]
pub struct SegmentLimits {
    pub max_elapsed_sec: i64,
    pub max_distance_km: f64,
}

impl From<&Thresholds> for SegmentLimits {
    fn from(t: &Thresholds) -> Self {
        Self {
            max_elapsed_sec: t.max_elapsed_sec,
            max_distance_km: t.max_distance_km,
        }
    }
}

impl Default for SegmentLimits {
    fn default() -> Self {
        Self::from(&Thresholds::default())
    }
}

impl SegmentLimits {
    pub fn accepts(&self, elapsed_sec: i64, distance_km: f64) -> bool {
        elapsed_sec > 0
            && elapsed_sec <= self.max_elapsed_sec
            && distance_km > 0.0
            && distance_km <= self.max_distance_km
    }
}

/// Groups pings per vehicle, ordered by timestamp. Equal timestamps keep
/// their input order.
pub fn group_by_vehicle(pings: &[FeaturedPing]) -> BTreeMap<&str, Vec<&FeaturedPing>> {
    let mut vehicles: BTreeMap<&str, Vec<&FeaturedPing>> = BTreeMap::new();
    for p in pings {
        vehicles.entry(p.ping.vehicle_id.as_str()).or_default().push(p);
    }
    for track in vehicles.values_mut() {
        track.sort_by_key(|p| p.ping.timestamp);
    }
    vehicles
}

/// Builds a candidate segment from a predecessor and its successor.
pub fn pair_segment(prev: &FeaturedPing, next: &FeaturedPing) -> TripSegment {
    let elapsed =
        next.ping.timestamp.and_utc().timestamp() - prev.ping.timestamp.and_utc().timestamp();
    TripSegment {
        timestamp: next.ping.timestamp,
        time_period: next.time_period,
        lat_bin: next.lat_bin(),
        lon_bin: next.lon_bin(),
        distance_km: haversine_km(prev.ping.lat, prev.ping.lon, next.ping.lat, next.ping.lon),
        time_diff_sec: elapsed,
        status: next.ping.status,
    }
}

/// Returns the valid segments of every vehicle, vehicle by vehicle in id
/// order and chronologically within a vehicle.
#[tracing::instrument(skip_all, fields(pings = pings.len()))]
pub fn segment_trips(pings: &[FeaturedPing], limits: SegmentLimits) -> Vec<TripSegment> {
    let vehicles = group_by_vehicle(pings);

    let mut pairs = 0usize;
    let mut segments = Vec::new();

    for track in vehicles.values() {
        for w in track.windows(2) {
            pairs += 1;
            let segment = pair_segment(w[0], w[1]);
            if limits.accepts(segment.time_diff_sec, segment.distance_km) {
                segments.push(segment);
            }
        }
    }

    debug!(
        vehicles = vehicles.len(),
        pairs,
        kept = segments.len(),
        rejected = pairs - segments.len(),
        "Trip segmentation finished"
    );

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{TimePeriod, featurize};
    use crate::ingest::{Ping, Status};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn ping(vehicle: &str, ts: NaiveDateTime, lat: f64, lon: f64) -> FeaturedPing {
        featurize(Ping {
            timestamp: ts,
            vehicle_id: vehicle.into(),
            lat,
            lon,
            status: Status::Occupied,
            speed: None,
            engine_acc: None,
            gps_valid: None,
        })
    }

    #[test]
    fn test_limits() {
        let limits = SegmentLimits::default();
        assert!(limits.accepts(300, 1.0));
        assert!(!limits.accepts(301, 1.0));
        assert!(limits.accepts(10, 50.0));
        assert!(!limits.accepts(10, 51.0));
        assert!(!limits.accepts(0, 1.0));
        assert!(!limits.accepts(-5, 1.0));
        assert!(!limits.accepts(10, 0.0));
    }

    #[test]
    fn test_first_ping_has_no_segment() {
        let pings = [ping("A", at(11, 0, 0), 13.75, 100.5)];
        let segments = segment_trips(&pings, SegmentLimits::default());
        assert!(segments.is_empty());
    }

    #[test]
    fn test_pairs_sorted_within_vehicle() {
        // Input out of order and interleaved with another vehicle.
        let pings = vec![
            ping("A", at(11, 2, 0), 13.77, 100.5),
            ping("B", at(11, 0, 30), 13.60, 100.6),
            ping("A", at(11, 0, 0), 13.75, 100.5),
            ping("A", at(11, 1, 0), 13.76, 100.5),
        ];

        let segments = segment_trips(&pings, SegmentLimits::default());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].timestamp, at(11, 1, 0));
        assert_eq!(segments[0].time_diff_sec, 60);
        assert_eq!(segments[1].timestamp, at(11, 2, 0));
        assert_eq!(segments[1].lat_bin, 13.77);
        assert_eq!(segments[1].time_period, TimePeriod::Day);
        for s in &segments {
            assert!((s.distance_km - 1.112).abs() < 0.01);
        }
    }

    #[test]
    fn test_discards_long_gap_even_for_short_hop() {
        // ~1.1 km but 301 s apart
        let pings = vec![
            ping("A", at(11, 0, 0), 13.75, 100.5),
            ping("A", at(11, 5, 1), 13.76, 100.5),
        ];
        assert!(segment_trips(&pings, SegmentLimits::default()).is_empty());
    }

    #[test]
    fn test_discards_teleport_even_when_quick() {
        // ~51 km north in 10 s
        let pings = vec![
            ping("A", at(11, 0, 0), 13.75, 100.5),
            ping("A", at(11, 0, 10), 14.2087, 100.5),
        ];
        let pair = pair_segment(&pings[0], &pings[1]);
        assert!(
            pair.distance_km > 50.5 && pair.distance_km < 51.5,
            "got {}",
            pair.distance_km
        );
        assert!(segment_trips(&pings, SegmentLimits::default()).is_empty());
    }

    #[test]
    fn test_discards_stationary_and_duplicate_timestamps() {
        let pings = vec![
            ping("A", at(11, 0, 0), 13.75, 100.5),
            ping("A", at(11, 0, 30), 13.75, 100.5),
            ping("A", at(11, 0, 30), 13.76, 100.5),
        ];
        assert!(segment_trips(&pings, SegmentLimits::default()).is_empty());
    }

    #[test]
    fn test_vehicles_do_not_mix() {
        let pings = vec![
            ping("A", at(11, 0, 0), 13.75, 100.5),
            ping("B", at(11, 0, 30), 13.76, 100.5),
        ];
        assert!(segment_trips(&pings, SegmentLimits::default()).is_empty());
    }
}
