//! Error type shared by every pipeline stage.

use std::path::PathBuf;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

use crate::analyzers::integrity::VehicleIdDiagnostic;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input `{path}` has no required column `{column}`")]
    MissingColumn { path: PathBuf, column: String },
    #[error("column `{column}` has unsupported type {data_type}")]
    UnsupportedColumnType { column: String, data_type: String },
    #[error("unsupported input format for `{0}` (expected .parquet or .csv)")]
    UnsupportedFormat(PathBuf),
    #[error("row {row}: cannot parse timestamp `{value}`")]
    TimestampParse { row: usize, value: String },
    #[error("row {row}: invalid value in column `{column}`: {reason}")]
    InvalidField {
        row: usize,
        column: String,
        reason: String,
    },
    #[error("refusing to segment trips: {0}")]
    SuspectVehicleIds(VehicleIdDiagnostic),
    #[error("unexpected column layout: {0}")]
    RepairLayout(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Parquet(#[from] ParquetError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
