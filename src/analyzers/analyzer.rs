//! Runs every analysis stage in order and writes the tables.
//!
//! The zone, night-demand and desert tables never depend on vehicle ids and
//! are always written. Trip segmentation runs only when the ids pass the
//! integrity check.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::analyzers::aggregate::compare_trips;
use crate::analyzers::desert::{find_deserts, late_night_counts};
use crate::analyzers::integrity::{VehicleIdDiagnostic, check_vehicle_ids};
use crate::analyzers::segment::{SegmentLimits, segment_trips};
use crate::analyzers::types::TripComparison;
use crate::analyzers::zones::{high_demand_zones, night_counts, zone_activity};
use crate::config::PipelineConfig;
use crate::context::{ExecutionContext, RunSummary, with_context};
use crate::error::{PipelineError, Result};
use crate::features::{FeaturedPing, featurize_all};
use crate::ingest::{Ping, load_pings};
use crate::output::{
    NIGHT_DEMAND_CSV, TAXI_DESERTS_CSV, TRIP_COMPARISON_CSV, TRIP_SEGMENTS_PARQUET,
    ZONE_ACTIVITY_CSV, log_preview, write_csv_table, write_trip_segments_parquet,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOptions {
    /// Never run trip segmentation, whatever the vehicle ids look like.
    pub skip_trips: bool,
    /// Fail the whole run, before writing anything, when vehicle ids fail the
    /// integrity check.
    pub strict_ids: bool,
}

/// Row counts and diagnostics of one analysis pass.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub pings: usize,
    pub zone_activity_rows: usize,
    pub night_demand_rows: usize,
    pub desert_rows: usize,
    pub vehicle_ids: VehicleIdDiagnostic,
    /// `None` when trip segmentation was skipped.
    pub trip_segments: Option<usize>,
    pub trip_comparison: Vec<TripComparison>,
}

/// Loads `input` and runs the whole analysis inside a fresh execution context.
pub fn run(
    input: &Path,
    config: PipelineConfig,
    options: AnalysisOptions,
) -> Result<(AnalysisReport, RunSummary)> {
    with_context(config, |ctx| {
        let pings = load_pings(input, ctx.config())?;
        analyze(ctx, pings, options)
    })
}

fn log_distribution(featured: &[FeaturedPing]) {
    let mut by_period: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_status: BTreeMap<u8, usize> = BTreeMap::new();
    for p in featured {
        *by_period.entry(p.time_period.as_str()).or_default() += 1;
        *by_status.entry(p.ping.status.code()).or_default() += 1;
    }
    info!(?by_period, ?by_status, "Ping distribution");
}

/// Runs every stage over already-loaded pings and writes the tables into the
/// context's output directory.
///
/// The vehicle-id check runs before anything is written. Suspect ids only drop
/// the trip stage unless `strict_ids` is set, in which case the run fails and
/// leaves no fresh outputs behind.
#[tracing::instrument(
    skip_all,
    fields(pings = pings.len(), skip_trips = options.skip_trips, strict_ids = options.strict_ids)
)]
pub fn analyze(
    ctx: &mut ExecutionContext,
    pings: Vec<Ping>,
    options: AnalysisOptions,
) -> Result<AnalysisReport> {
    let thresholds = ctx.config().thresholds.clone();
    let ping_count = pings.len();

    let featured = featurize_all(pings);
    log_distribution(&featured);

    let vehicle_ids = check_vehicle_ids(&featured, &thresholds);
    if !vehicle_ids.is_plausible() && options.strict_ids {
        return Err(PipelineError::SuspectVehicleIds(vehicle_ids));
    }

    // Day/night activity hotspots by status
    let activity = zone_activity(&featured);
    let path = ctx.output_path(ZONE_ACTIVITY_CSV);
    write_csv_table(&path, &activity)?;
    ctx.record_output(&path, activity.len());

    // Occupied vs available at night
    let demand = high_demand_zones(night_counts(&featured), thresholds.min_occupied_count);
    log_preview(NIGHT_DEMAND_CSV, &demand, 5);
    let path = ctx.output_path(NIGHT_DEMAND_CSV);
    write_csv_table(&path, &demand)?;
    ctx.record_output(&path, demand.len());

    // Late-night deserts
    let deserts = find_deserts(
        late_night_counts(&featured),
        thresholds.min_unhired_count,
        thresholds.min_desert_score,
    );
    log_preview(TAXI_DESERTS_CSV, &deserts, 5);
    let path = ctx.output_path(TAXI_DESERTS_CSV);
    write_csv_table(&path, &deserts)?;
    ctx.record_output(&path, deserts.len());

    let mut report = AnalysisReport {
        pings: ping_count,
        zone_activity_rows: activity.len(),
        night_demand_rows: demand.len(),
        desert_rows: deserts.len(),
        vehicle_ids,
        trip_segments: None,
        trip_comparison: Vec::new(),
    };

    if options.skip_trips || !report.vehicle_ids.is_plausible() {
        if options.skip_trips {
            info!("Trip segmentation disabled");
        } else {
            warn!(
                diagnostic = %report.vehicle_ids,
                "Skipping trip segmentation"
            );
        }
        remove_stale(&ctx.output_path(TRIP_COMPARISON_CSV))?;
        remove_stale(&ctx.output_path(TRIP_SEGMENTS_PARQUET))?;
        return Ok(report);
    }

    let segments = segment_trips(&featured, SegmentLimits::from(&thresholds));
    let comparison = compare_trips(&segments);
    for row in &comparison {
        info!(
            period = %row.time_period,
            trips = row.trip_count,
            avg_km = row.avg_distance_km,
            avg_sec = row.avg_duration_sec,
            "Trip comparison"
        );
    }

    let path = ctx.output_path(TRIP_COMPARISON_CSV);
    write_csv_table(&path, &comparison)?;
    ctx.record_output(&path, comparison.len());

    let path = ctx.output_path(TRIP_SEGMENTS_PARQUET);
    write_trip_segments_parquet(&path, &segments)?;
    ctx.record_output(&path, segments.len());

    report.trip_segments = Some(segments.len());
    report.trip_comparison = comparison;
    Ok(report)
}

/// Deletes a trip table left by an earlier run so it is not mistaken for
/// this run's result.
fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed stale output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Status;
    use chrono::{Duration, NaiveDate};

    fn fleet(ids: impl Fn(usize) -> String) -> Vec<Ping> {
        let base = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(21, 0, 0)
            .unwrap();
        (0..24)
            .map(|i| Ping {
                timestamp: base + Duration::seconds(30 * (i / 3) as i64),
                vehicle_id: ids(i),
                lat: 13.7 + (i % 3) as f64 * 0.05 + (i / 3) as f64 * 0.001,
                lon: 100.5,
                status: if i % 2 == 0 {
                    Status::Occupied
                } else {
                    Status::Available
                },
                speed: None,
                engine_acc: None,
                gps_valid: None,
            })
            .collect()
    }

    #[test]
    fn test_analyze_writes_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default().with_output_dir(dir.path());

        let (report, summary) = with_context(config, |ctx| {
            analyze(ctx, fleet(|i| format!("TX{}", i % 3)), AnalysisOptions::default())
        })
        .unwrap();

        assert_eq!(report.pings, 24);
        // 3 taxis x 7 consecutive pairs
        assert_eq!(report.trip_segments, Some(21));
        assert_eq!(report.trip_comparison.len(), 1);
        assert_eq!(summary.outputs.len(), 5);
        assert!(dir.path().join(TRIP_SEGMENTS_PARQUET).exists());
    }

    #[test]
    fn test_strict_mode_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default().with_output_dir(dir.path());

        let result = with_context(config, |ctx| {
            analyze(
                ctx,
                fleet(|i| i.to_string()),
                AnalysisOptions {
                    strict_ids: true,
                    ..Default::default()
                },
            )
        });

        assert!(matches!(result, Err(PipelineError::SuspectVehicleIds(_))));
        assert!(!dir.path().join(ZONE_ACTIVITY_CSV).exists());
    }

    #[test]
    fn test_suspect_ids_drop_only_the_trip_stage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TRIP_COMPARISON_CSV), "stale\n").unwrap();
        let config = PipelineConfig::default().with_output_dir(dir.path());

        let (report, summary) = with_context(config, |ctx| {
            analyze(ctx, fleet(|i| i.to_string()), AnalysisOptions::default())
        })
        .unwrap();

        assert!(!report.vehicle_ids.is_plausible());
        assert_eq!(report.trip_segments, None);
        assert_eq!(summary.outputs.len(), 3);
        assert!(dir.path().join(ZONE_ACTIVITY_CSV).exists());
        assert!(dir.path().join(NIGHT_DEMAND_CSV).exists());
        assert!(dir.path().join(TAXI_DESERTS_CSV).exists());
        assert!(!dir.path().join(TRIP_COMPARISON_CSV).exists());
    }

    #[test]
    fn test_two_taxis_with_consecutive_numbers_get_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default().with_output_dir(dir.path());
        let mut pings = fleet(|i| format!("{}", 1001 + i % 2));
        pings.truncate(2);

        let (report, _) = with_context(config, |ctx| {
            analyze(ctx, pings, AnalysisOptions::default())
        })
        .unwrap();

        assert!(report.vehicle_ids.is_plausible());
        assert_eq!(report.trip_segments, Some(0));
        assert!(dir.path().join(ZONE_ACTIVITY_CSV).exists());
    }

    #[test]
    fn test_skip_trips_with_good_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default().with_output_dir(dir.path());

        let (report, _) = with_context(config, |ctx| {
            analyze(
                ctx,
                fleet(|i| format!("TX{}", i % 3)),
                AnalysisOptions {
                    skip_trips: true,
                    ..Default::default()
                },
            )
        })
        .unwrap();

        assert!(report.vehicle_ids.is_plausible());
        assert_eq!(report.trip_segments, None);
        assert!(!dir.path().join(TRIP_SEGMENTS_PARQUET).exists());
    }
}
