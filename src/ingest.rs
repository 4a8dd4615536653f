//! Loads vehicle pings from Parquet or CSV.
//!
//! Ingestion is all-or-nothing: the first missing column, malformed timestamp
//! or out-of-range field fails the whole load.

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow::temporal_conversions::{
    timestamp_ms_to_datetime, timestamp_ns_to_datetime, timestamp_s_to_datetime,
    timestamp_us_to_datetime,
};
use chrono::{DateTime, Duration, NaiveDateTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use crate::config::{ColumnNames, PipelineConfig};
use crate::error::{PipelineError, Result};

/// Taxi availability, as encoded by the `for_hire_light` flag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Status {
    /// Light off: carrying a passenger (0).
    Occupied,
    /// Light on: cruising for a fare (1).
    Available,
}

impl Status {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Status::Occupied),
            1 => Some(Status::Available),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Status::Occupied => 0,
            Status::Available => 1,
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        Status::from_code(code as i64).ok_or_else(|| format!("invalid status code {code}"))
    }
}

/// One GPS sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Ping {
    /// Local wall-clock time.
    pub timestamp: NaiveDateTime,
    pub vehicle_id: String,
    pub lat: f64,
    pub lon: f64,
    pub status: Status,
    pub speed: Option<f64>,
    pub engine_acc: Option<i64>,
    pub gps_valid: Option<i64>,
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Parses a textual timestamp. Offsets in RFC 3339 strings are kept as the
/// wall clock of that offset.
///
/// # Errors
///
/// Returns [`PipelineError::TimestampParse`] carrying `row` and the raw text.
pub fn parse_timestamp(row: usize, raw: &str) -> Result<NaiveDateTime> {
    let value = raw.trim();

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_local())
        })
        .ok_or_else(|| PipelineError::TimestampParse {
            row,
            value: raw.to_string(),
        })
}

/// Loads every ping from `path`, choosing the reader by file extension.
#[tracing::instrument(skip(config), fields(path = %path.display()))]
pub fn load_pings(path: &Path, config: &PipelineConfig) -> Result<Vec<Ping>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let pings = match extension.as_deref() {
        Some("parquet") => load_parquet(path, config)?,
        Some("csv") => load_csv(path, &config.columns)?,
        _ => return Err(PipelineError::UnsupportedFormat(path.to_path_buf())),
    };

    info!(rows = pings.len(), "Pings loaded");
    Ok(pings)
}

fn invalid(row: usize, column: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::InvalidField {
        row,
        column: column.to_string(),
        reason: reason.into(),
    }
}

fn check_coordinates(row: usize, columns: &ColumnNames, lat: f64, lon: f64) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(invalid(row, &columns.lat, format!("latitude {lat} out of range")));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(invalid(row, &columns.lon, format!("longitude {lon} out of range")));
    }
    Ok(())
}

fn status_from_code(row: usize, column: &str, code: i64) -> Result<Status> {
    Status::from_code(code)
        .ok_or_else(|| invalid(row, column, format!("status must be 0 or 1, got {code}")))
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn load_csv(path: &Path, columns: &ColumnNames) -> Result<Vec<Ping>> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let position = |name: &str| headers.iter().position(|h| h.trim() == name);
    let required = |name: &str| {
        position(name).ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
    };

    let ts_idx = required(&columns.timestamp)?;
    let vehicle_idx = required(&columns.vehicle_id)?;
    let lat_idx = required(&columns.lat)?;
    let lon_idx = required(&columns.lon)?;
    let status_idx = required(&columns.status)?;
    let speed_idx = position(&columns.speed);
    let engine_idx = position(&columns.engine_acc);
    let gps_idx = position(&columns.gps_valid);

    debug!(headers = ?headers, "CSV headers resolved");

    let mut pings = Vec::new();

    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let timestamp = parse_timestamp(row, field(ts_idx))?;
        let vehicle_id = field(vehicle_idx);
        if vehicle_id.is_empty() {
            return Err(invalid(row, &columns.vehicle_id, "empty vehicle id"));
        }
        let lat = parse_f64(row, &columns.lat, field(lat_idx))?;
        let lon = parse_f64(row, &columns.lon, field(lon_idx))?;
        check_coordinates(row, columns, lat, lon)?;

        let code = parse_i64(row, &columns.status, field(status_idx))?;
        let status = status_from_code(row, &columns.status, code)?;

        let speed = match speed_idx.map(field).filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_f64(row, &columns.speed, raw)?),
            None => None,
        };
        let engine_acc = match engine_idx.map(field).filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_i64(row, &columns.engine_acc, raw)?),
            None => None,
        };
        let gps_valid = match gps_idx.map(field).filter(|s| !s.is_empty()) {
            Some(raw) => Some(parse_i64(row, &columns.gps_valid, raw)?),
            None => None,
        };

        pings.push(Ping {
            timestamp,
            vehicle_id: vehicle_id.to_string(),
            lat,
            lon,
            status,
            speed,
            engine_acc,
            gps_valid,
        });
    }

    Ok(pings)
}

fn parse_f64(row: usize, column: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| invalid(row, column, format!("`{raw}` is not a number")))
}

/// Accepts integral floats such as `1.0`, which some exporters emit for flags.
fn parse_i64(row: usize, column: &str, raw: &str) -> Result<i64> {
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v.is_finite() => Ok(v as i64),
        _ => Err(invalid(row, column, format!("`{raw}` is not an integer"))),
    }
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn load_parquet(path: &Path, config: &PipelineConfig) -> Result<Vec<Ping>> {
    let columns = &config.columns;
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let schema = builder.schema().clone();
    for name in [
        &columns.timestamp,
        &columns.vehicle_id,
        &columns.lat,
        &columns.lon,
        &columns.status,
    ] {
        if schema.column_with_name(name).is_none() {
            return Err(PipelineError::MissingColumn {
                path: path.to_path_buf(),
                column: name.clone(),
            });
        }
    }
    debug!(schema = %schema, "Parquet schema resolved");

    let reader = builder.build()?;
    let mut pings = Vec::new();
    let mut row_offset = 0;

    for batch in reader {
        let batch = batch?;
        pings.extend(pings_from_batch(path, &batch, config, row_offset)?);
        row_offset += batch.num_rows();
    }

    Ok(pings)
}

fn pings_from_batch(
    path: &Path,
    batch: &RecordBatch,
    config: &PipelineConfig,
    row_offset: usize,
) -> Result<Vec<Ping>> {
    let columns = &config.columns;
    let column = |name: &str| required_column(path, batch, name);

    let timestamps = timestamp_values(
        column(&columns.timestamp)?,
        &columns.timestamp,
        row_offset,
        config.utc_offset_minutes,
    )?;
    let vehicle_ids = cast(column(&columns.vehicle_id)?, &DataType::Utf8)?;
    let vehicle_ids = vehicle_ids.as_string::<i32>();
    let lats = cast(column(&columns.lat)?, &DataType::Float64)?;
    let lats = lats.as_primitive::<Float64Type>();
    let lons = cast(column(&columns.lon)?, &DataType::Float64)?;
    let lons = lons.as_primitive::<Float64Type>();
    let statuses = cast(column(&columns.status)?, &DataType::Int64)?;
    let statuses = statuses.as_primitive::<Int64Type>();

    let optional = |name: &str, to: &DataType| -> Result<Option<ArrayRef>> {
        match batch.column_by_name(name) {
            Some(array) => Ok(Some(cast(array, to)?)),
            None => Ok(None),
        }
    };
    let speeds = optional(&columns.speed, &DataType::Float64)?;
    let engines = optional(&columns.engine_acc, &DataType::Int64)?;
    let gps = optional(&columns.gps_valid, &DataType::Int64)?;

    let mut pings = Vec::with_capacity(batch.num_rows());

    for (i, timestamp) in timestamps.into_iter().enumerate() {
        let row = row_offset + i;

        if vehicle_ids.is_null(i) || vehicle_ids.value(i).is_empty() {
            return Err(invalid(row, &columns.vehicle_id, "missing vehicle id"));
        }
        if lats.is_null(i) {
            return Err(invalid(row, &columns.lat, "missing or non-numeric latitude"));
        }
        if lons.is_null(i) {
            return Err(invalid(row, &columns.lon, "missing or non-numeric longitude"));
        }
        if statuses.is_null(i) {
            return Err(invalid(row, &columns.status, "missing status"));
        }

        let (lat, lon) = (lats.value(i), lons.value(i));
        check_coordinates(row, columns, lat, lon)?;
        let status = status_from_code(row, &columns.status, statuses.value(i))?;

        pings.push(Ping {
            timestamp,
            vehicle_id: vehicle_ids.value(i).to_string(),
            lat,
            lon,
            status,
            speed: speeds.as_ref().and_then(|a| {
                let a = a.as_primitive::<Float64Type>();
                (!a.is_null(i)).then(|| a.value(i))
            }),
            engine_acc: engines.as_ref().and_then(|a| {
                let a = a.as_primitive::<Int64Type>();
                (!a.is_null(i)).then(|| a.value(i))
            }),
            gps_valid: gps.as_ref().and_then(|a| {
                let a = a.as_primitive::<Int64Type>();
                (!a.is_null(i)).then(|| a.value(i))
            }),
        });
    }

    Ok(pings)
}

fn required_column<'a>(path: &Path, batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
}

/// Decodes a timestamp column into wall-clock times.
///
/// Timezone-aware Parquet timestamps are instants and get shifted by
/// `utc_offset_minutes`; naive ones and strings are used as-is.
fn timestamp_values(
    array: &ArrayRef,
    column: &str,
    row_offset: usize,
    utc_offset_minutes: i32,
) -> Result<Vec<NaiveDateTime>> {
    match array.data_type() {
        DataType::Timestamp(unit, tz) => {
            let unit = *unit;
            let shift = if tz.is_some() {
                Duration::minutes(utc_offset_minutes as i64)
            } else {
                Duration::zero()
            };
            let raw = cast(array, &DataType::Int64)?;
            let raw = raw.as_primitive::<Int64Type>();

            (0..raw.len())
                .map(|i| {
                    let row = row_offset + i;
                    if raw.is_null(i) {
                        return Err(PipelineError::TimestampParse {
                            row,
                            value: "null".into(),
                        });
                    }
                    let value = raw.value(i);
                    let decoded = match unit {
                        TimeUnit::Second => timestamp_s_to_datetime(value),
                        TimeUnit::Millisecond => timestamp_ms_to_datetime(value),
                        TimeUnit::Microsecond => timestamp_us_to_datetime(value),
                        TimeUnit::Nanosecond => timestamp_ns_to_datetime(value),
                    };
                    decoded
                        .map(|dt| dt + shift)
                        .ok_or_else(|| PipelineError::TimestampParse {
                            row,
                            value: value.to_string(),
                        })
                })
                .collect()
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let strings = cast(array, &DataType::Utf8)?;
            let strings = strings.as_string::<i32>();

            (0..strings.len())
                .map(|i| {
                    let row = row_offset + i;
                    if strings.is_null(i) {
                        return Err(PipelineError::TimestampParse {
                            row,
                            value: "null".into(),
                        });
                    }
                    parse_timestamp(row, strings.value(i))
                })
                .collect()
        }
        other => Err(PipelineError::UnsupportedColumnType {
            column: column.to_string(),
            data_type: other.to_string(),
        }),
    }
}
