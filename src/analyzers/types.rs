//! Row types of the tables produced by the pipeline.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::features::TimePeriod;
use crate::ingest::Status;
use crate::output::CsvRow;

/// Record count per (grid cell, time period, status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneActivity {
    pub lat_bin: f64,
    pub lon_bin: f64,
    pub time_period: TimePeriod,
    #[serde(rename = "for_hire_light")]
    pub status: Status,
    pub record_count: u64,
}

/// Night-time occupied vs available counts for one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightDemandZone {
    pub lat_bin: f64,
    pub lon_bin: f64,
    pub occupied_count: u64,
    pub available_count: u64,
    pub demand_supply_ratio: f64,
}

/// Late-night cell with many idle taxis relative to its total activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesertZone {
    pub lat_bin: f64,
    pub lon_bin: f64,
    pub unhired_count: u64,
    pub total_count: u64,
    pub desert_score: f64,
}

/// A consecutive same-vehicle ping pair that passed the outlier filters.
///
/// Location, period and status are those of the later ping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSegment {
    pub timestamp: NaiveDateTime,
    pub time_period: TimePeriod,
    pub lat_bin: f64,
    pub lon_bin: f64,
    pub distance_km: f64,
    pub time_diff_sec: i64,
    #[serde(rename = "for_hire_light")]
    pub status: Status,
}

/// Trip statistics for one time period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripComparison {
    pub time_period: TimePeriod,
    pub avg_distance_km: f64,
    pub avg_duration_sec: f64,
    pub trip_count: u64,
    pub median_distance_km: f64,
    pub median_duration_sec: i64,
}

impl CsvRow for ZoneActivity {
    const HEADER: &'static [&'static str] = &[
        "lat_bin",
        "lon_bin",
        "time_period",
        "for_hire_light",
        "record_count",
    ];
}

impl CsvRow for NightDemandZone {
    const HEADER: &'static [&'static str] = &[
        "lat_bin",
        "lon_bin",
        "occupied_count",
        "available_count",
        "demand_supply_ratio",
    ];
}

impl CsvRow for DesertZone {
    const HEADER: &'static [&'static str] = &[
        "lat_bin",
        "lon_bin",
        "unhired_count",
        "total_count",
        "desert_score",
    ];
}

impl CsvRow for TripComparison {
    const HEADER: &'static [&'static str] = &[
        "time_period",
        "avg_distance_km",
        "avg_duration_sec",
        "trip_count",
        "median_distance_km",
        "median_duration_sec",
    ];
}
