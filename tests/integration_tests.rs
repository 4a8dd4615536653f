use std::io::Write;

use taxi_daynight::analyzers::analyzer::{AnalysisOptions, run};
use taxi_daynight::analyzers::types::{TripComparison, ZoneActivity};
use taxi_daynight::config::PipelineConfig;
use taxi_daynight::error::PipelineError;
use taxi_daynight::features::TimePeriod;
use taxi_daynight::output::{
    NIGHT_DEMAND_CSV, RUN_SUMMARY_JSON, TAXI_DESERTS_CSV, TRIP_COMPARISON_CSV,
    TRIP_SEGMENTS_PARQUET, ZONE_ACTIVITY_CSV, read_csv_table, read_trip_segments_parquet,
};
use taxi_daynight::report::CityPlannerReport;

#[test]
fn test_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pings.csv");
    let mut file = std::fs::File::create(&input).unwrap();
    writeln!(file, "timestamp,vehicle_id,lat,lon,for_hire_light,speed").unwrap();
    // ~0.5 km north in 60 s, during the day
    writeln!(file, "2024-03-01 11:00:00,V,13.75,100.5,0,30").unwrap();
    writeln!(file, "2024-03-01 11:01:00,V,13.754497,100.5,0,30").unwrap();
    drop(file);

    let out = dir.path().join("out");
    let config = PipelineConfig::default().with_output_dir(&out);
    let (report, summary) = run(&input, config, AnalysisOptions::default()).unwrap();

    assert_eq!(report.pings, 2);
    assert_eq!(report.trip_segments, Some(1));
    assert!(out.join(RUN_SUMMARY_JSON).exists());
    assert_eq!(summary.row_counts[TRIP_COMPARISON_CSV], 1);

    let comparison: Vec<TripComparison> = read_csv_table(&out.join(TRIP_COMPARISON_CSV)).unwrap();
    assert_eq!(comparison.len(), 1);
    let day = &comparison[0];
    assert_eq!(day.time_period, TimePeriod::Day);
    assert_eq!(day.trip_count, 1);
    assert!((day.avg_distance_km - 0.5).abs() < 0.01);
    assert_eq!(day.median_duration_sec, 60);

    let activity: Vec<ZoneActivity> = read_csv_table(&out.join(ZONE_ACTIVITY_CSV)).unwrap();
    assert_eq!(activity.iter().map(|r| r.record_count).sum::<u64>(), 2);

    let segments = read_trip_segments_parquet(&out.join(TRIP_SEGMENTS_PARQUET)).unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].time_diff_sec, 60);
    assert_eq!(segments[0].lat_bin, 13.754);

    // A daytime run has no night or late-night rows, but the tables keep
    // their columns.
    let demand = std::fs::read_to_string(out.join(NIGHT_DEMAND_CSV)).unwrap();
    assert!(demand.starts_with("lat_bin,lon_bin,occupied_count,available_count,demand_supply_ratio"));
    let deserts = std::fs::read_to_string(out.join(TAXI_DESERTS_CSV)).unwrap();
    assert!(deserts.starts_with("lat_bin,lon_bin,unhired_count,total_count,desert_score"));

    let text = CityPlannerReport::load(&out).unwrap().render(5);
    assert!(text.contains("DAY"));
}

#[test]
fn test_consecutive_fleet_numbers_keep_zone_tables() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pings.csv");
    std::fs::write(
        &input,
        "timestamp,vehicle_id,lat,lon,for_hire_light\n\
         2024-03-01 21:00:00,1001,13.75,100.5,0\n\
         2024-03-01 21:00:00,1002,13.80,100.5,1\n",
    )
    .unwrap();

    let out = dir.path().join("out");
    let (report, _) = run(
        &input,
        PipelineConfig::default().with_output_dir(&out),
        AnalysisOptions::default(),
    )
    .unwrap();

    assert!(report.vehicle_ids.is_plausible());
    assert_eq!(report.zone_activity_rows, 2);
    assert!(out.join(ZONE_ACTIVITY_CSV).exists());
}

#[test]
fn test_corrupted_coordinates_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pings.csv");
    std::fs::write(
        &input,
        "timestamp,vehicle_id,lat,lon,for_hire_light\n\
         2024-03-01 11:00:00,V,1709290800.0,100.5,0\n",
    )
    .unwrap();

    let out = dir.path().join("out");
    let result = run(
        &input,
        PipelineConfig::default().with_output_dir(&out),
        AnalysisOptions::default(),
    );

    assert!(matches!(result, Err(PipelineError::InvalidField { .. })));
    assert!(!out.join(RUN_SUMMARY_JSON).exists());
}
