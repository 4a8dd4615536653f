//! Run configuration.
//!
//! Stored as a JSON object on disk; every field is optional and falls back to
//! the values the Bangkok analysis was tuned with:
//! ```json
//! {
//!   "output_dir": "output",
//!   "utc_offset_minutes": 420,
//!   "columns": { "status": "for_hire_light" },
//!   "thresholds": { "min_occupied_count": 20 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Names of the input columns the pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub timestamp: String,
    pub vehicle_id: String,
    pub lat: String,
    pub lon: String,
    pub status: String,
    pub speed: String,
    pub engine_acc: String,
    pub gps_valid: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            timestamp: "timestamp".into(),
            vehicle_id: "vehicle_id".into(),
            lat: "lat".into(),
            lon: "lon".into(),
            status: "for_hire_light".into(),
            speed: "speed".into(),
            engine_acc: "engine_acc".into(),
            gps_valid: "gpsvalid".into(),
        }
    }
}

/// Filter and ranking thresholds for the zone, desert and trip stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub min_occupied_count: u64,
    pub min_unhired_count: u64,
    /// Deserts must score strictly above this.
    pub min_desert_score: f64,
    pub max_elapsed_sec: i64,
    pub max_distance_km: f64,
    pub max_distinct_id_ratio: f64,
    pub max_teleport_share: f64,
    pub teleport_speed_kmh: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_occupied_count: 20,
            min_unhired_count: 10,
            min_desert_score: 0.5,
            max_elapsed_sec: 300,
            max_distance_km: 50.0,
            max_distinct_id_ratio: 0.95,
            max_teleport_share: 0.5,
            teleport_speed_kmh: 200.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    /// Shift applied to timestamps stored as instants (tz-aware Parquet columns).
    pub utc_offset_minutes: i32,
    pub columns: ColumnNames,
    pub thresholds: Thresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            utc_offset_minutes: 0,
            columns: ColumnNames::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path` and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let ratio_ok = |v: f64| v > 0.0 && v <= 1.0;

        if t.max_elapsed_sec <= 0 {
            return Err(PipelineError::InvalidConfig(
                "max_elapsed_sec must be positive".into(),
            ));
        }
        if !(t.max_distance_km > 0.0) || !(t.teleport_speed_kmh > 0.0) {
            return Err(PipelineError::InvalidConfig(
                "max_distance_km and teleport_speed_kmh must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&t.min_desert_score) {
            return Err(PipelineError::InvalidConfig(
                "min_desert_score must lie in [0, 1)".into(),
            ));
        }
        if !ratio_ok(t.max_distinct_id_ratio) || !ratio_ok(t.max_teleport_share) {
            return Err(PipelineError::InvalidConfig(
                "max_distinct_id_ratio and max_teleport_share must lie in (0, 1]".into(),
            ));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(PipelineError::InvalidConfig(format!(
                "utc_offset_minutes {} is outside +-14h",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }
}
