//! Persistence for the pipeline's tables.
//!
//! Every writer truncates its target, so rerunning the pipeline overwrites the
//! previous results. Writers never create directories.

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, Int64Array, StringArray, TimestampMillisecondArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow::temporal_conversions::timestamp_ms_to_datetime;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::analyzers::types::TripSegment;
use crate::error::{PipelineError, Result};
use crate::features::TimePeriod;
use crate::ingest::Status;

pub const ZONE_ACTIVITY_CSV: &str = "zone_activity.csv";
pub const NIGHT_DEMAND_CSV: &str = "night_demand_zones.csv";
pub const TAXI_DESERTS_CSV: &str = "taxi_deserts.csv";
pub const TRIP_COMPARISON_CSV: &str = "trip_comparison.csv";
pub const TRIP_SEGMENTS_PARQUET: &str = "trip_segments.parquet";
pub const RUN_SUMMARY_JSON: &str = "run_summary.json";

/// Logs the first `limit` rows of a table at debug level.
pub fn log_preview<T: std::fmt::Debug>(name: &str, rows: &[T], limit: usize) {
    for row in rows.iter().take(limit) {
        debug!(table = name, "{:?}", row);
    }
}

/// A row type stored as a CSV table.
///
/// `HEADER` lists the serialized field names in declaration order, so an
/// empty table still carries its columns.
pub trait CsvRow: Serialize {
    const HEADER: &'static [&'static str];
}

/// Writes `rows` as a CSV file with a header row, replacing any existing file.
pub fn write_csv_table<T: CsvRow>(path: &Path, rows: &[T]) -> Result<()> {
    debug!(path = %path.display(), rows = rows.len(), "Writing CSV table");

    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.write_record(T::HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        rows.push(record);
    }
    Ok(rows)
}

/// Serializes a value as pretty JSON, replacing any existing file.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, body)?;
    Ok(())
}

fn trip_segment_schema() -> Schema {
    Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("time_period", DataType::Utf8, false),
        Field::new("lat_bin", DataType::Float64, false),
        Field::new("lon_bin", DataType::Float64, false),
        Field::new("distance_km", DataType::Float64, false),
        Field::new("time_diff_sec", DataType::Int64, false),
        Field::new("for_hire_light", DataType::Int64, false),
    ])
}

pub fn write_trip_segments_parquet(path: &Path, segments: &[TripSegment]) -> Result<()> {
    debug!(path = %path.display(), rows = segments.len(), "Writing trip segments");

    let mut timestamps = Vec::with_capacity(segments.len());
    let mut periods = Vec::with_capacity(segments.len());
    let mut lat_bins = Vec::with_capacity(segments.len());
    let mut lon_bins = Vec::with_capacity(segments.len());
    let mut distances = Vec::with_capacity(segments.len());
    let mut durations = Vec::with_capacity(segments.len());
    let mut statuses = Vec::with_capacity(segments.len());

    for s in segments {
        timestamps.push(s.timestamp.and_utc().timestamp_millis());
        periods.push(s.time_period.as_str());
        lat_bins.push(s.lat_bin);
        lon_bins.push(s.lon_bin);
        distances.push(s.distance_km);
        durations.push(s.time_diff_sec);
        statuses.push(s.status.code() as i64);
    }

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(TimestampMillisecondArray::from(timestamps)),
        Arc::new(StringArray::from(periods)),
        Arc::new(Float64Array::from(lat_bins)),
        Arc::new(Float64Array::from(lon_bins)),
        Arc::new(Float64Array::from(distances)),
        Arc::new(Int64Array::from(durations)),
        Arc::new(Int64Array::from(statuses)),
    ];

    write_record_batch(path, trip_segment_schema(), arrays)
}

fn write_record_batch(path: &Path, schema: Schema, arrays: Vec<ArrayRef>) -> Result<()> {
    let schema = Arc::new(schema);
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

pub fn read_trip_segments_parquet(path: &Path) -> Result<Vec<TripSegment>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut segments = Vec::new();
    let mut row_offset = 0;

    for batch in reader {
        let batch = batch?;
        let column = |name: &str| {
            batch
                .column_by_name(name)
                .cloned()
                .ok_or_else(|| PipelineError::MissingColumn {
                    path: path.to_path_buf(),
                    column: name.to_string(),
                })
        };

        let timestamps = column("timestamp")?;
        if !matches!(
            timestamps.data_type(),
            DataType::Timestamp(TimeUnit::Millisecond, _)
        ) {
            return Err(PipelineError::UnsupportedColumnType {
                column: "timestamp".into(),
                data_type: timestamps.data_type().to_string(),
            });
        }
        let timestamps = cast(&timestamps, &DataType::Int64)?;
        let timestamps = timestamps.as_primitive::<Int64Type>();
        let periods = cast(&column("time_period")?, &DataType::Utf8)?;
        let periods = periods.as_string::<i32>();
        let lat_bins = cast(&column("lat_bin")?, &DataType::Float64)?;
        let lat_bins = lat_bins.as_primitive::<Float64Type>();
        let lon_bins = cast(&column("lon_bin")?, &DataType::Float64)?;
        let lon_bins = lon_bins.as_primitive::<Float64Type>();
        let distances = cast(&column("distance_km")?, &DataType::Float64)?;
        let distances = distances.as_primitive::<Float64Type>();
        let durations = cast(&column("time_diff_sec")?, &DataType::Int64)?;
        let durations = durations.as_primitive::<Int64Type>();
        let statuses = cast(&column("for_hire_light")?, &DataType::Int64)?;
        let statuses = statuses.as_primitive::<Int64Type>();

        for i in 0..batch.num_rows() {
            let row = row_offset + i;
            let invalid = |column: &str, reason: String| PipelineError::InvalidField {
                row,
                column: column.to_string(),
                reason,
            };

            let columns: [(&str, &dyn Array); 7] = [
                ("timestamp", timestamps as &dyn Array),
                ("time_period", periods as &dyn Array),
                ("lat_bin", lat_bins as &dyn Array),
                ("lon_bin", lon_bins as &dyn Array),
                ("distance_km", distances as &dyn Array),
                ("time_diff_sec", durations as &dyn Array),
                ("for_hire_light", statuses as &dyn Array),
            ];
            if let Some((name, _)) = columns.iter().find(|(_, array)| array.is_null(i)) {
                return Err(invalid(name, "null value".into()));
            }

            let timestamp = timestamp_ms_to_datetime(timestamps.value(i)).ok_or_else(|| {
                PipelineError::TimestampParse {
                    row,
                    value: timestamps.value(i).to_string(),
                }
            })?;
            let time_period = periods
                .value(i)
                .parse::<TimePeriod>()
                .map_err(|e| invalid("time_period", e))?;
            let status = Status::from_code(statuses.value(i))
                .ok_or_else(|| invalid("for_hire_light", statuses.value(i).to_string()))?;

            segments.push(TripSegment {
                timestamp,
                time_period,
                lat_bin: lat_bins.value(i),
                lon_bin: lon_bins.value(i),
                distance_km: distances.value(i),
                time_diff_sec: durations.value(i),
                status,
            });
        }
        row_offset += batch.num_rows();
    }

    Ok(segments)
}
