//! Parquet log files with time-based rotation

use super::RecorderError;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Duration, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::{self, File};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Which log a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Request,
    Discrepancy,
}

/// A row type that can be written to and read back from a Parquet log
pub trait LogRecord: Sized + Send + 'static {
    /// File name prefix
    const PREFIX: &'static str;
    const KIND: RecordKind;

    fn schema() -> Schema;

    fn to_batch(records: &[Self]) -> Result<RecordBatch, ArrowError>;

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, RecorderError>;
}

fn timestamp_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    )
}

fn timestamps(values: impl Iterator<Item = DateTime<Utc>>) -> ArrayRef {
    let micros: Vec<i64> = values.map(|t| t.timestamp_micros()).collect();
    Arc::new(TimestampMicrosecondArray::from(micros).with_timezone("UTC"))
}

/// Decimals are stored as strings to keep full precision
fn decimals(values: impl Iterator<Item = Option<Decimal>>) -> ArrayRef {
    let strings: Vec<Option<String>> = values.map(|v| v.map(|d| d.to_string())).collect();
    Arc::new(StringArray::from(strings))
}

fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A, RecorderError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<A>())
        .ok_or_else(|| RecorderError::InvalidColumn(name.to_string()))
}

fn read_timestamp(array: &TimestampMicrosecondArray, i: usize) -> Result<DateTime<Utc>, RecorderError> {
    DateTime::from_timestamp_micros(array.value(i))
        .ok_or_else(|| RecorderError::InvalidValue(format!("timestamp {}", array.value(i))))
}

fn read_decimal(array: &StringArray, i: usize) -> Result<Option<Decimal>, RecorderError> {
    if array.is_null(i) {
        return Ok(None);
    }
    Decimal::from_str(array.value(i))
        .map(Some)
        .map_err(|e| RecorderError::InvalidValue(format!("decimal '{}': {}", array.value(i), e)))
}

fn read_string(array: &StringArray, i: usize) -> Option<String> {
    (!array.is_null(i)).then(|| array.value(i).to_string())
}

/// One attempt against a price source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestLogRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub market_id: Option<String>,
    pub latency_ms: f64,
    pub success: bool,
    pub error: Option<String>,
}

/// Request log schema
pub fn request_log_schema() -> Schema {
    Schema::new(vec![
        timestamp_field("timestamp"),
        Field::new("source", DataType::Utf8, false),
        Field::new("market_id", DataType::Utf8, true),
        Field::new("latency_ms", DataType::Float64, false),
        Field::new("success", DataType::Boolean, false),
        Field::new("error", DataType::Utf8, true),
    ])
}

impl LogRecord for RequestLogRecord {
    const PREFIX: &'static str = "request_log";
    const KIND: RecordKind = RecordKind::Request;

    fn schema() -> Schema {
        request_log_schema()
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch, ArrowError> {
        let sources: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
        let market_ids: Vec<Option<&str>> = records.iter().map(|r| r.market_id.as_deref()).collect();
        let latencies: Vec<f64> = records.iter().map(|r| r.latency_ms).collect();
        let successes: Vec<bool> = records.iter().map(|r| r.success).collect();
        let errors: Vec<Option<&str>> = records.iter().map(|r| r.error.as_deref()).collect();

        RecordBatch::try_new(
            Arc::new(Self::schema()),
            vec![
                timestamps(records.iter().map(|r| r.timestamp)),
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(market_ids)),
                Arc::new(Float64Array::from(latencies)),
                Arc::new(BooleanArray::from(successes)),
                Arc::new(StringArray::from(errors)),
            ],
        )
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, RecorderError> {
        let timestamp = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
        let source = column::<StringArray>(batch, "source")?;
        let market_id = column::<StringArray>(batch, "market_id")?;
        let latency = column::<Float64Array>(batch, "latency_ms")?;
        let success = column::<BooleanArray>(batch, "success")?;
        let error = column::<StringArray>(batch, "error")?;

        (0..batch.num_rows())
            .map(|i| -> Result<Self, RecorderError> {
                Ok(RequestLogRecord {
                    timestamp: read_timestamp(timestamp, i)?,
                    source: source.value(i).to_string(),
                    market_id: read_string(market_id, i),
                    latency_ms: latency.value(i),
                    success: success.value(i),
                    error: read_string(error, i),
                })
            })
            .collect()
    }
}

/// One stream-vs-REST comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscrepancyRecord {
    pub market_id: String,
    pub timestamp: DateTime<Utc>,
    pub stream_yes: Decimal,
    pub stream_no: Option<Decimal>,
    pub rest_yes: Decimal,
    pub rest_no: Option<Decimal>,
    pub yes_diff_pct: Decimal,
    pub no_diff_pct: Option<Decimal>,
    pub max_diff_pct: Decimal,
    pub is_significant: bool,
    pub potential_arbitrage: bool,
}

/// Discrepancy log schema
pub fn discrepancy_schema() -> Schema {
    Schema::new(vec![
        timestamp_field("timestamp"),
        Field::new("market_id", DataType::Utf8, false),
        Field::new("stream_yes", DataType::Utf8, false),
        Field::new("stream_no", DataType::Utf8, true),
        Field::new("rest_yes", DataType::Utf8, false),
        Field::new("rest_no", DataType::Utf8, true),
        Field::new("yes_diff_pct", DataType::Utf8, false),
        Field::new("no_diff_pct", DataType::Utf8, true),
        Field::new("max_diff_pct", DataType::Utf8, false),
        Field::new("is_significant", DataType::Boolean, false),
        Field::new("potential_arbitrage", DataType::Boolean, false),
    ])
}

impl LogRecord for DiscrepancyRecord {
    const PREFIX: &'static str = "discrepancies";
    const KIND: RecordKind = RecordKind::Discrepancy;

    fn schema() -> Schema {
        discrepancy_schema()
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch, ArrowError> {
        let market_ids: Vec<&str> = records.iter().map(|r| r.market_id.as_str()).collect();
        let significant: Vec<bool> = records.iter().map(|r| r.is_significant).collect();
        let arbitrage: Vec<bool> = records.iter().map(|r| r.potential_arbitrage).collect();

        RecordBatch::try_new(
            Arc::new(Self::schema()),
            vec![
                timestamps(records.iter().map(|r| r.timestamp)),
                Arc::new(StringArray::from(market_ids)),
                decimals(records.iter().map(|r| Some(r.stream_yes))),
                decimals(records.iter().map(|r| r.stream_no)),
                decimals(records.iter().map(|r| Some(r.rest_yes))),
                decimals(records.iter().map(|r| r.rest_no)),
                decimals(records.iter().map(|r| Some(r.yes_diff_pct))),
                decimals(records.iter().map(|r| r.no_diff_pct)),
                decimals(records.iter().map(|r| Some(r.max_diff_pct))),
                Arc::new(BooleanArray::from(significant)),
                Arc::new(BooleanArray::from(arbitrage)),
            ],
        )
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>, RecorderError> {
        let timestamp = column::<TimestampMicrosecondArray>(batch, "timestamp")?;
        let market_id = column::<StringArray>(batch, "market_id")?;
        let stream_yes = column::<StringArray>(batch, "stream_yes")?;
        let stream_no = column::<StringArray>(batch, "stream_no")?;
        let rest_yes = column::<StringArray>(batch, "rest_yes")?;
        let rest_no = column::<StringArray>(batch, "rest_no")?;
        let yes_diff = column::<StringArray>(batch, "yes_diff_pct")?;
        let no_diff = column::<StringArray>(batch, "no_diff_pct")?;
        let max_diff = column::<StringArray>(batch, "max_diff_pct")?;
        let significant = column::<BooleanArray>(batch, "is_significant")?;
        let arbitrage = column::<BooleanArray>(batch, "potential_arbitrage")?;

        let required = |array: &StringArray, i: usize, name: &str| -> Result<Decimal, RecorderError> {
            read_decimal(array, i)?.ok_or_else(|| RecorderError::InvalidValue(format!("null {name}")))
        };

        (0..batch.num_rows())
            .map(|i| -> Result<Self, RecorderError> {
                Ok(DiscrepancyRecord {
                    market_id: market_id.value(i).to_string(),
                    timestamp: read_timestamp(timestamp, i)?,
                    stream_yes: required(stream_yes, i, "stream_yes")?,
                    stream_no: read_decimal(stream_no, i)?,
                    rest_yes: required(rest_yes, i, "rest_yes")?,
                    rest_no: read_decimal(rest_no, i)?,
                    yes_diff_pct: required(yes_diff, i, "yes_diff_pct")?,
                    no_diff_pct: read_decimal(no_diff, i)?,
                    max_diff_pct: required(max_diff, i, "max_diff_pct")?,
                    is_significant: significant.value(i),
                    potential_arbitrage: arbitrage.value(i),
                })
            })
            .collect()
    }
}

struct OpenFile {
    path: PathBuf,
    writer: ArrowWriter<File>,
}

/// Append-only Parquet writer with time-based rotation
///
/// Each write lands as a row group in the file for the current rotation window.
/// A file is only readable once it has been closed by rotation or [`close`].
///
/// [`close`]: ParquetWriter::close
pub struct ParquetWriter<R: LogRecord> {
    output_dir: PathBuf,
    rotation_interval: Duration,
    current_file_start: Option<DateTime<Utc>>,
    current: Option<OpenFile>,
    _record: PhantomData<fn(R)>,
}

impl<R: LogRecord> ParquetWriter<R> {
    /// Create a new Parquet writer
    pub fn new(output_dir: PathBuf, rotation_interval: std::time::Duration) -> Self {
        Self {
            output_dir,
            rotation_interval: Duration::from_std(rotation_interval).unwrap_or(Duration::hours(1)),
            current_file_start: None,
            current: None,
            _record: PhantomData,
        }
    }

    /// Ensure output directory exists
    pub fn ensure_dir(&self) -> Result<(), RecorderError> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Check if rotation is needed based on current time
    pub fn needs_rotation(&self, now: DateTime<Utc>) -> bool {
        match self.current_file_start {
            None => true,
            Some(start) => now - start >= self.rotation_interval,
        }
    }

    /// File path for a rotation window starting at `timestamp`
    pub fn file_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        let filename = format!("{}_{}.parquet", R::PREFIX, timestamp.format("%Y%m%d_%H%M%S"));
        self.output_dir.join(filename)
    }

    /// Path of the file currently being written, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|f| f.path.as_path())
    }

    /// Append records, rotating first if the window has elapsed
    pub fn write(&mut self, records: &[R], now: DateTime<Utc>) -> Result<(), RecorderError> {
        if records.is_empty() {
            return Ok(());
        }

        if self.current.is_none() || self.needs_rotation(now) {
            self.rotate(now)?;
        }

        let batch = R::to_batch(records)?;
        let open = self.current.as_mut().ok_or(RecorderError::Closed)?;
        open.writer.write(&batch)?;
        open.writer.flush()?;

        tracing::debug!(path = ?open.path, count = records.len(), "Wrote {} rows", R::PREFIX);

        Ok(())
    }

    /// Finish the current file; returns its path if one was open
    pub fn close(&mut self) -> Result<Option<PathBuf>, RecorderError> {
        let Some(open) = self.current.take() else {
            return Ok(None);
        };
        open.writer.close()?;
        tracing::debug!(path = ?open.path, "Closed Parquet file");
        Ok(Some(open.path))
    }

    fn rotate(&mut self, now: DateTime<Utc>) -> Result<(), RecorderError> {
        self.close()?;
        self.ensure_dir()?;

        let path = self.unused_path(now);
        let file = File::create(&path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, Arc::new(R::schema()), Some(props))?;

        tracing::info!(path = ?path, "Opened Parquet file");

        self.current = Some(OpenFile { path, writer });
        self.current_file_start = Some(now);
        Ok(())
    }

    /// Never reopen an existing file, e.g. after a restart within the same second
    fn unused_path(&self, now: DateTime<Utc>) -> PathBuf {
        let path = self.file_path(now);
        if !path.exists() {
            return path;
        }
        let stem = format!("{}_{}", R::PREFIX, now.format("%Y%m%d_%H%M%S"));
        (1..)
            .map(|n| self.output_dir.join(format!("{stem}_{n}.parquet")))
            .find(|p| !p.exists())
            .unwrap_or(path)
    }
}

impl<R: LogRecord> Drop for ParquetWriter<R> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "Failed to close Parquet file");
        }
    }
}

/// Reader for Parquet log files
pub struct ParquetReader {
    path: PathBuf,
}

impl ParquetReader {
    /// Create a new reader for a Parquet file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every row of the file
    pub fn read<R: LogRecord>(&self) -> Result<Vec<R>, RecorderError> {
        let file = File::open(&self.path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut records = Vec::new();
        for batch in reader {
            records.extend(R::from_batch(&batch?)?);
        }
        Ok(records)
    }

    pub fn read_request_log(&self) -> Result<Vec<RequestLogRecord>, RecorderError> {
        self.read()
    }

    pub fn read_discrepancies(&self) -> Result<Vec<DiscrepancyRecord>, RecorderError> {
        self.read()
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn request(source: &str, success: bool) -> RequestLogRecord {
        RequestLogRecord {
            timestamp: Utc::now(),
            source: source.to_string(),
            market_id: Some("m1".to_string()),
            latency_ms: 12.5,
            success,
            error: (!success).then(|| "timeout".to_string()),
        }
    }

    fn discrepancy() -> DiscrepancyRecord {
        DiscrepancyRecord {
            market_id: "m1".to_string(),
            timestamp: Utc::now(),
            stream_yes: dec!(0.70),
            stream_no: None,
            rest_yes: dec!(0.60),
            rest_no: Some(dec!(0.39)),
            yes_diff_pct: dec!(15.3846),
            no_diff_pct: None,
            max_diff_pct: dec!(15.3846),
            is_significant: true,
            potential_arbitrage: true,
        }
    }

    #[test]
    fn test_schemas() {
        let schema = request_log_schema();
        assert_eq!(schema.fields().len(), 6);
        assert_eq!(schema.field(0).name(), "timestamp");
        assert!(schema.field_with_name("error").unwrap().is_nullable());

        let schema = discrepancy_schema();
        assert_eq!(schema.fields().len(), 11);
        assert!(!schema.field_with_name("max_diff_pct").unwrap().is_nullable());
    }

    #[test]
    fn test_parquet_writer_file_path() {
        let writer = ParquetWriter::<RequestLogRecord>::new(
            PathBuf::from("/data"),
            std::time::Duration::from_secs(3600),
        );
        let timestamp = DateTime::parse_from_rfc3339("2025-01-04T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(
            writer.file_path(timestamp),
            PathBuf::from("/data/request_log_20250104_123000.parquet")
        );
    }

    #[test]
    fn test_parquet_writer_needs_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = ParquetWriter::<RequestLogRecord>::new(
            temp_dir.path().to_path_buf(),
            std::time::Duration::from_secs(3600),
        );
        let now = Utc::now();

        assert!(writer.needs_rotation(now));

        writer.write(&[request("rest", true)], now).unwrap();
        assert!(!writer.needs_rotation(now));
        assert!(writer.needs_rotation(now + Duration::hours(2)));
    }

    #[test]
    fn test_appends_then_rotates() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = ParquetWriter::<RequestLogRecord>::new(
            temp_dir.path().to_path_buf(),
            std::time::Duration::from_secs(60),
        );
        let start = Utc::now();

        writer.write(&[request("stream", true)], start).unwrap();
        writer
            .write(&[request("rest", false), request("cache", true)], start + Duration::seconds(1))
            .unwrap();
        let first = writer.current_path().unwrap().to_path_buf();

        writer.write(&[request("rest", true)], start + Duration::seconds(61)).unwrap();
        let second = writer.close().unwrap().unwrap();
        assert_ne!(first, second);

        let rows = ParquetReader::new(&first).read_request_log().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].source, "rest");
        assert!(!rows[1].success);
        assert_eq!(rows[1].error.as_deref(), Some("timeout"));
        assert_eq!(rows[2].error, None);

        let rows = ParquetReader::new(&second).read_request_log().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_same_second_rotation_does_not_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc::now();

        let mut first = ParquetWriter::<RequestLogRecord>::new(
            temp_dir.path().to_path_buf(),
            std::time::Duration::from_secs(60),
        );
        first.write(&[request("rest", true)], now).unwrap();
        let first_path = first.close().unwrap().unwrap();

        let mut second = ParquetWriter::<RequestLogRecord>::new(
            temp_dir.path().to_path_buf(),
            std::time::Duration::from_secs(60),
        );
        second.write(&[request("rest", true)], now).unwrap();
        let second_path = second.close().unwrap().unwrap();

        assert_ne!(first_path, second_path);
        assert_eq!(ParquetReader::new(first_path).read_request_log().unwrap().len(), 1);
    }

    #[test]
    fn test_write_and_read_discrepancies() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = ParquetWriter::<DiscrepancyRecord>::new(
            temp_dir.path().to_path_buf(),
            std::time::Duration::from_secs(3600),
        );

        let record = discrepancy();
        writer.write(std::slice::from_ref(&record), Utc::now()).unwrap();
        let path = writer.close().unwrap().unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("discrepancies_"));

        let rows = ParquetReader::new(path).read_discrepancies().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stream_yes, dec!(0.70));
        assert_eq!(rows[0].stream_no, None);
        assert_eq!(rows[0].rest_no, Some(dec!(0.39)));
        assert_eq!(rows[0].max_diff_pct, dec!(15.3846));
        assert!(rows[0].potential_arbitrage);
        assert_eq!(
            rows[0].timestamp.timestamp_micros(),
            record.timestamp.timestamp_micros()
        );
    }

    #[test]
    fn test_write_empty_records() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = ParquetWriter::<RequestLogRecord>::new(
            temp_dir.path().to_path_buf(),
            std::time::Duration::from_secs(3600),
        );

        writer.write(&[], Utc::now()).unwrap();
        assert!(writer.current_path().is_none());
        assert!(writer.close().unwrap().is_none());
    }

    #[test]
    fn test_read_wrong_schema_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = ParquetWriter::<RequestLogRecord>::new(
            temp_dir.path().to_path_buf(),
            std::time::Duration::from_secs(3600),
        );
        writer.write(&[request("rest", true)], Utc::now()).unwrap();
        let path = writer.close().unwrap().unwrap();

        let err = ParquetReader::new(path).read_discrepancies().unwrap_err();
        assert!(matches!(err, RecorderError::InvalidColumn(_)));
    }
}
