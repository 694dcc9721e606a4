//! Data capture module
//!
//! Append-only request and discrepancy logs stored as Parquet

mod parquet;
mod recorder;

pub use self::parquet::{
    discrepancy_schema, request_log_schema, DiscrepancyRecord, LogRecord, ParquetReader,
    ParquetWriter, RecordKind, RequestLogRecord,
};
pub use recorder::{LogRecorder, RecorderConfig, RecorderStats};

use thiserror::Error;

/// Log recording errors
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ::parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Missing or mistyped column '{0}'")]
    InvalidColumn(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Writer is closed")]
    Closed,
}
