//! Background recorder for the request and discrepancy logs

use super::parquet::{DiscrepancyRecord, LogRecord, ParquetWriter, RecordKind, RequestLogRecord};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Queue depth per log before records are dropped
const CHANNEL_CAPACITY: usize = 10_000;

/// Configuration for log recording
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Output directory for Parquet files
    pub output_dir: PathBuf,
    /// Time covered by one file
    pub rotation_interval: Duration,
    /// Buffered rows before a forced flush
    pub buffer_size: usize,
    /// Maximum time between flushes
    pub flush_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./data"),
            rotation_interval: Duration::from_secs(3600),
            buffer_size: 1000,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Recording statistics
#[derive(Debug, Default, Clone)]
pub struct RecorderStats {
    pub requests_received: u64,
    pub requests_written: u64,
    pub discrepancies_received: u64,
    pub discrepancies_written: u64,
    /// Records lost to a full queue or a stopped writer
    pub dropped: u64,
    pub write_errors: u64,
    pub last_flush: Option<DateTime<Utc>>,
}

impl RecorderStats {
    fn received(&mut self, kind: RecordKind) {
        match kind {
            RecordKind::Request => self.requests_received += 1,
            RecordKind::Discrepancy => self.discrepancies_received += 1,
        }
    }

    fn written(&mut self, kind: RecordKind, count: u64, at: DateTime<Utc>) {
        match kind {
            RecordKind::Request => self.requests_written += count,
            RecordKind::Discrepancy => self.discrepancies_written += count,
        }
        self.last_flush = Some(at);
    }
}

/// Append-only Parquet logs written off the caller's task
///
/// Recording never blocks: records are queued and a writer task per log buffers
/// and flushes them.
pub struct LogRecorder {
    config: RecorderConfig,
    request_tx: mpsc::Sender<RequestLogRecord>,
    discrepancy_tx: mpsc::Sender<DiscrepancyRecord>,
    stats: Arc<RwLock<RecorderStats>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LogRecorder {
    /// Create a recorder and spawn its writer tasks
    pub fn new(config: RecorderConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (discrepancy_tx, discrepancy_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(RwLock::new(RecorderStats::default()));

        let tasks = vec![
            tokio::spawn(run_writer(
                request_rx,
                ParquetWriter::new(config.output_dir.clone(), config.rotation_interval),
                config.clone(),
                stats.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_writer(
                discrepancy_rx,
                ParquetWriter::new(config.output_dir.clone(), config.rotation_interval),
                config.clone(),
                stats.clone(),
                shutdown_rx,
            )),
        ];

        Self {
            config,
            request_tx,
            discrepancy_tx,
            stats,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    /// Create a new recorder with default config
    pub fn with_output_dir(output_dir: PathBuf) -> Self {
        Self::new(RecorderConfig {
            output_dir,
            ..Default::default()
        })
    }

    pub fn record_request(&self, record: RequestLogRecord) {
        self.enqueue(&self.request_tx, record);
    }

    pub fn record_discrepancy(&self, record: DiscrepancyRecord) {
        self.enqueue(&self.discrepancy_tx, record);
    }

    fn enqueue<R: LogRecord>(&self, tx: &mpsc::Sender<R>, record: R) {
        match tx.try_send(record) {
            Ok(()) => self.stats.write().received(R::KIND),
            Err(TrySendError::Full(_)) => {
                self.stats.write().dropped += 1;
                tracing::warn!(log = R::PREFIX, "Recorder queue full, dropping record");
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.write().dropped += 1;
                tracing::debug!(log = R::PREFIX, "Recorder closed, dropping record");
            }
        }
    }

    /// Flush everything queued, close the open files and stop the writers
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Recorder writer task failed");
            }
        }
    }

    /// Get output directory
    pub fn output_dir(&self) -> &PathBuf {
        &self.config.output_dir
    }

    /// Get current statistics
    pub fn stats(&self) -> RecorderStats {
        self.stats.read().clone()
    }
}

/// Writer task for one log
async fn run_writer<R: LogRecord>(
    mut rx: mpsc::Receiver<R>,
    mut writer: ParquetWriter<R>,
    config: RecorderConfig,
    stats: Arc<RwLock<RecorderStats>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer: Vec<R> = Vec::with_capacity(config.buffer_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Some(record) => {
                    buffer.push(record);
                    if buffer.len() >= config.buffer_size {
                        flush(&mut buffer, &mut writer, &stats);
                    }
                }
                None => break,
            },

            _ = ticker.tick() => flush(&mut buffer, &mut writer, &stats),

            _ = shutdown.changed() => {
                rx.close();
                while let Some(record) = rx.recv().await {
                    buffer.push(record);
                }
                break;
            }
        }
    }

    flush(&mut buffer, &mut writer, &stats);
    if let Err(e) = writer.close() {
        tracing::error!(log = R::PREFIX, error = %e, "Failed to close log file");
    }
    tracing::info!(log = R::PREFIX, "Log writer shutting down");
}

fn flush<R: LogRecord>(
    buffer: &mut Vec<R>,
    writer: &mut ParquetWriter<R>,
    stats: &RwLock<RecorderStats>,
) {
    if buffer.is_empty() {
        return;
    }

    let now = Utc::now();
    let count = buffer.len() as u64;

    match writer.write(buffer, now) {
        Ok(()) => {
            stats.write().written(R::KIND, count, now);
            tracing::debug!(log = R::PREFIX, count, "Flushed log buffer");
        }
        Err(e) => {
            stats.write().write_errors += 1;
            tracing::error!(log = R::PREFIX, error = %e, count, "Failed to write log buffer");
        }
    }

    buffer.clear();
}
