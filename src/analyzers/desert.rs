//! Taxi deserts: cells where, late at night, most taxis seen are idle.
//!
//! A high score means taxis are waiting but not being hired there, which
//! points at a visibility or dispatch gap rather than a demand gap.

use std::collections::BTreeMap;

use crate::analyzers::types::DesertZone;
use crate::features::{FeaturedPing, GridCell, is_late_night};
use crate::ingest::Status;

/// Per-cell unhired and total counts over the late-night window. Cells
/// without any available ping are omitted.
pub fn late_night_counts(pings: &[FeaturedPing]) -> Vec<DesertZone> {
    let mut cells: BTreeMap<GridCell, (u64, u64)> = BTreeMap::new();

    for p in pings.iter().filter(|p| is_late_night(p.hour)) {
        let entry = cells.entry(p.cell).or_default();
        if p.ping.status == Status::Available {
            entry.0 += 1;
        }
        entry.1 += 1;
    }

    cells
        .into_iter()
        .filter(|(_, (unhired, _))| *unhired > 0)
        .map(|(cell, (unhired_count, total_count))| DesertZone {
            lat_bin: cell.lat_bin(),
            lon_bin: cell.lon_bin(),
            unhired_count,
            total_count,
            desert_score: unhired_count as f64 / total_count as f64,
        })
        .collect()
}

/// Keeps cells with `unhired_count >= min_unhired` and a score strictly above
/// `min_score`, ranked by descending unhired count.
pub fn find_deserts(zones: Vec<DesertZone>, min_unhired: u64, min_score: f64) -> Vec<DesertZone> {
    let mut kept: Vec<_> = zones
        .into_iter()
        .filter(|z| z.unhired_count >= min_unhired && z.desert_score > min_score)
        .collect();
    kept.sort_by(|a, b| b.unhired_count.cmp(&a.unhired_count));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::featurize;
    use crate::ingest::Ping;
    use chrono::NaiveDate;

    fn ping(hour: u32, lat: f64, status: Status) -> FeaturedPing {
        featurize(Ping {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 2)
                .unwrap()
                .and_hms_opt(hour, 15, 0)
                .unwrap(),
            vehicle_id: "V".into(),
            lat,
            lon: 100.5,
            status,
            speed: None,
            engine_acc: None,
            gps_valid: None,
        })
    }

    fn zone(unhired: u64, total: u64) -> DesertZone {
        DesertZone {
            lat_bin: 13.75,
            lon_bin: 100.5,
            unhired_count: unhired,
            total_count: total,
            desert_score: unhired as f64 / total as f64,
        }
    }

    #[test]
    fn test_counts_only_late_night() {
        let pings = vec![
            ping(23, 13.75, Status::Available),
            ping(3, 13.75, Status::Occupied),
            ping(4, 13.75, Status::Available),
            ping(21, 13.75, Status::Available),
        ];

        let zones = late_night_counts(&pings);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].unhired_count, 1);
        assert_eq!(zones[0].total_count, 2);
        assert_eq!(zones[0].desert_score, 0.5);
    }

    #[test]
    fn test_cell_without_idle_taxis_is_omitted() {
        let zones = late_night_counts(&[ping(1, 13.75, Status::Occupied)]);
        assert!(zones.is_empty());
    }

    #[test]
    fn test_excludes_below_unhired_threshold_even_at_full_score() {
        let deserts = find_deserts(vec![zone(9, 9)], 10, 0.5);
        assert!(deserts.is_empty());
    }

    #[test]
    fn test_score_threshold_is_strict() {
        let deserts = find_deserts(vec![zone(10, 20), zone(11, 21)], 10, 0.5);
        assert_eq!(deserts.len(), 1);
        assert_eq!(deserts[0].unhired_count, 11);
    }

    #[test]
    fn test_ranked_by_unhired_count() {
        let deserts = find_deserts(vec![zone(12, 13), zone(30, 40), zone(10, 10)], 10, 0.5);
        let counts: Vec<_> = deserts.iter().map(|d| d.unhired_count).collect();
        assert_eq!(counts, vec![30, 12, 10]);
    }
}
