//! One-off repair of the raw extract whose columns were shifted by an earlier
//! export.
//!
//! In the damaged file `lat` holds the timestamp text, `vehicle_id` holds the
//! latitude and `timestamp` holds junk. `lon` and the covariates are intact.
//! The real vehicle ids are lost, so the repaired file carries a row counter
//! in `vehicle_id`; the analysis refuses to build trips from those.
//!
//! This is a migration step, run once with its own validation, and is never
//! called by the analysis pipeline.

use arrow::array::{Array, ArrayRef, AsArray, Int64Array, TimestampMillisecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use chrono::NaiveDateTime;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

const TIMESTAMP: &str = "timestamp";
const VEHICLE_ID: &str = "vehicle_id";
const LAT: &str = "lat";
const LON: &str = "lon";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SAMPLE_ROWS: usize = 3;

/// Type and first few values of one column.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDiagnostic {
    pub name: String,
    pub data_type: String,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub rows: usize,
    pub columns: Vec<String>,
    pub output: PathBuf,
}

/// Lists every column of a Parquet file with its type and first values.
pub fn diagnose(path: &Path) -> Result<Vec<ColumnDiagnostic>> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let mut reader = builder.with_batch_size(SAMPLE_ROWS).build()?;
    let first = reader.next().transpose()?;

    let options = FormatOptions::default().with_null("null");
    schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let samples = match &first {
                Some(batch) => {
                    let array = batch.column(idx);
                    let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
                    (0..array.len().min(SAMPLE_ROWS))
                        .map(|i| formatter.value(i).to_string())
                        .collect()
                }
                None => Vec::new(),
            };
            Ok(ColumnDiagnostic {
                name: field.name().clone(),
                data_type: field.data_type().to_string(),
                samples,
            })
        })
        .collect()
}

/// True when the schema matches the known shift: timestamp text in `lat`
/// and float latitudes in `vehicle_id`.
pub fn has_shifted_columns(schema: &Schema) -> bool {
    let type_of = |name: &str| schema.field_with_name(name).ok().map(|f| f.data_type().clone());
    let lat_is_text = matches!(
        type_of(LAT),
        Some(DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View)
    );
    let id_is_float = matches!(
        type_of(VEHICLE_ID),
        Some(DataType::Float32 | DataType::Float64)
    );
    lat_is_text && id_is_float && type_of(LON).is_some() && type_of(TIMESTAMP).is_some()
}

/// Reads only the footer of `path` and checks it for the known shift.
pub fn needs_repair(path: &Path) -> Result<bool> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    Ok(has_shifted_columns(builder.schema()))
}

fn repaired_schema(source: &Schema) -> Result<Schema> {
    let lon = source.field_with_name(LON)?.clone();
    let mut fields = vec![
        Field::new(
            TIMESTAMP,
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new(VEHICLE_ID, DataType::Int64, false),
        lon,
        Field::new(LAT, DataType::Float64, false),
    ];
    fields.extend(
        source
            .fields()
            .iter()
            .filter(|f| ![TIMESTAMP, VEHICLE_ID, LAT, LON].contains(&f.name().as_str()))
            .map(|f| f.as_ref().clone()),
    );
    Ok(Schema::new(fields))
}

fn repair_batch(batch: &RecordBatch, schema: &Arc<Schema>, row_offset: usize) -> Result<RecordBatch> {
    let rows = batch.num_rows();
    let column = |name: &str| -> Result<ArrayRef> {
        batch
            .column_by_name(name)
            .cloned()
            .ok_or_else(|| PipelineError::RepairLayout(format!("column `{name}` disappeared")))
    };

    let text = cast(&column(LAT)?, &DataType::Utf8)?;
    let text = text.as_string::<i32>();
    let mut millis = Vec::with_capacity(rows);
    for i in 0..rows {
        let row = row_offset + i;
        let raw = if text.is_null(i) { "" } else { text.value(i) };
        let ts = NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).map_err(|_| {
            PipelineError::TimestampParse {
                row,
                value: raw.to_string(),
            }
        })?;
        millis.push(ts.and_utc().timestamp_millis());
    }

    let lat = cast(&column(VEHICLE_ID)?, &DataType::Float64)?;
    {
        let values = lat.as_primitive::<Float64Type>();
        for i in 0..rows {
            if values.is_null(i) || !(-90.0..=90.0).contains(&values.value(i)) {
                return Err(PipelineError::InvalidField {
                    row: row_offset + i,
                    column: VEHICLE_ID.into(),
                    reason: "expected a latitude in the shifted column".into(),
                });
            }
        }
    }

    let ids: Vec<i64> = (row_offset..row_offset + rows).map(|r| r as i64).collect();

    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(TimestampMillisecondArray::from(millis)),
        Arc::new(Int64Array::from(ids)),
        column(LON)?,
        lat,
    ];
    for field in schema.fields().iter().skip(4) {
        arrays.push(column(field.name())?);
    }

    Ok(RecordBatch::try_new(schema.clone(), arrays)?)
}

/// Writes a repaired copy of `input` to `output`.
///
/// The output is first written next to its destination and renamed into place
/// only when every row converted, so a failed repair leaves nothing behind.
#[tracing::instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub fn repair(input: &Path, output: &Path) -> Result<RepairReport> {
    if input == output {
        return Err(PipelineError::RepairLayout(
            "refusing to repair a file in place".into(),
        ));
    }

    let file = File::open(input)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let source = builder.schema().clone();
    if !has_shifted_columns(&source) {
        return Err(PipelineError::RepairLayout(format!(
            "expected `{LAT}` to hold timestamp text and `{VEHICLE_ID}` to hold float latitudes; \
             found {LAT}: {}, {VEHICLE_ID}: {}",
            source
                .field_with_name(LAT)
                .map(|f| f.data_type().to_string())
                .unwrap_or_else(|_| "missing".into()),
            source
                .field_with_name(VEHICLE_ID)
                .map(|f| f.data_type().to_string())
                .unwrap_or_else(|_| "missing".into()),
        )));
    }

    let schema = Arc::new(repaired_schema(&source)?);
    let staging = output.with_extension("parquet.partial");

    let result = (|| -> Result<usize> {
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(File::create(&staging)?, schema.clone(), Some(props))?;
        let mut rows = 0;
        for batch in builder.build()? {
            let repaired = repair_batch(&batch?, &schema, rows)?;
            rows += repaired.num_rows();
            writer.write(&repaired)?;
        }
        writer.close()?;
        Ok(rows)
    })();

    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_file(&staging) {
                warn!(error = %cleanup, "Could not remove partial repair output");
            }
            return Err(e);
        }
    };
    std::fs::rename(&staging, output)?;

    info!(rows, "Repaired file written; vehicle_id now holds placeholder row numbers");
    Ok(RepairReport {
        rows,
        columns: schema.fields().iter().map(|f| f.name().clone()).collect(),
        output: output.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::ingest::{Status, load_pings};
    use arrow::array::{Float64Array, StringArray};

    fn write_shifted(path: &Path, lat_text: Vec<&str>) {
        let rows = lat_text.len();
        let schema = Arc::new(Schema::new(vec![
            Field::new(TIMESTAMP, DataType::Int64, true),
            Field::new(VEHICLE_ID, DataType::Float64, false),
            Field::new(LON, DataType::Float64, false),
            Field::new(LAT, DataType::Utf8, false),
            Field::new("speed", DataType::Float64, true),
            Field::new("for_hire_light", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1; rows])),
                Arc::new(Float64Array::from(
                    (0..rows).map(|i| 13.75 + i as f64 * 0.001).collect::<Vec<_>>(),
                )),
                Arc::new(Float64Array::from(vec![100.5; rows])),
                Arc::new(StringArray::from(lat_text)),
                Arc::new(Float64Array::from(vec![Some(20.0); rows])),
                Arc::new(Int64Array::from(vec![1; rows])),
            ],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_diagnose_shows_types_and_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.parquet");
        write_shifted(
            &path,
            vec![
                "2024-03-01 10:00:00",
                "2024-03-01 10:00:30",
                "2024-03-01 10:01:00",
                "2024-03-01 10:01:30",
            ],
        );

        let columns = diagnose(&path).unwrap();
        assert_eq!(columns.len(), 6);
        let lat = columns.iter().find(|c| c.name == LAT).unwrap();
        assert_eq!(lat.data_type, "Utf8");
        assert_eq!(lat.samples.len(), 3);
        assert_eq!(lat.samples[0], "2024-03-01 10:00:00");
        let ts = columns.iter().find(|c| c.name == TIMESTAMP).unwrap();
        assert_eq!(ts.samples[0], "1");
        assert!(needs_repair(&path).unwrap());
    }

    #[test]
    fn test_repair_remaps_columns() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.parquet");
        let output = dir.path().join("fixed.parquet");
        write_shifted(&input, vec!["2024-03-01 10:00:00", "2024-03-01 10:00:30"]);

        let report = repair(&input, &output).unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(
            report.columns,
            vec![TIMESTAMP, VEHICLE_ID, LON, LAT, "speed", "for_hire_light"]
        );

        let pings = load_pings(&output, &PipelineConfig::default()).unwrap();
        assert_eq!(pings.len(), 2);
        assert_eq!(pings[0].vehicle_id, "0");
        assert_eq!(pings[1].vehicle_id, "1");
        assert!((pings[1].lat - 13.751).abs() < 1e-9);
        assert_eq!(pings[0].lon, 100.5);
        assert_eq!(pings[0].speed, Some(20.0));
        assert_eq!(pings[0].status, Status::Available);
        assert_eq!(
            pings[1].timestamp.format("%H:%M:%S").to_string(),
            "10:00:30"
        );
    }

    #[test]
    fn test_repair_refuses_healthy_layout() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("fixed.parquet");
        write_shifted(&input, vec!["2024-03-01 10:00:00"]);
        let once = dir.path().join("once.parquet");
        repair(&input, &once).unwrap();

        let err = repair(&once, &dir.path().join("twice.parquet")).unwrap_err();
        assert!(matches!(err, PipelineError::RepairLayout(_)));
    }

    #[test]
    fn test_failed_repair_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.parquet");
        let output = dir.path().join("fixed.parquet");
        write_shifted(&input, vec!["2024-03-01 10:00:00", "not a time"]);

        let err = repair(&input, &output).unwrap_err();
        assert!(matches!(err, PipelineError::TimestampParse { row: 1, .. }));
        assert!(!output.exists());
        assert!(!output.with_extension("parquet.partial").exists());
    }
}
