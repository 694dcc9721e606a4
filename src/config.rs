//! Configuration types for poly-feed

use crate::data::RecorderConfig;
use crate::failover::FailoverConfig;
use crate::rest::ClobConfig;
use crate::stream::{StreamConfig, MAX_SUBSCRIBE_BATCH, POLYMARKET_WS_URL};
use crate::telemetry::LogFormat;
use crate::validation::ValidatorConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub failover: FailoverSettings,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Push-feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Connect the push feed at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Base delay for exponential backoff
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_secs: u64,

    /// Reconnects allowed after a failure before the feed is marked failed
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Token ids per subscribe message (venue cap is 500)
    #[serde(default = "default_batch_size")]
    pub subscribe_batch_size: usize,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_true() -> bool {
    true
}
fn default_ws_url() -> String {
    POLYMARKET_WS_URL.to_string()
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_max_reconnect_delay() -> u64 {
    160
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_ping_interval() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_batch_size() -> usize {
    MAX_SUBSCRIBE_BATCH
}
fn default_event_buffer() -> usize {
    1024
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_url: default_ws_url(),
            reconnect_delay_secs: 5,
            max_reconnect_delay_secs: 160,
            max_reconnect_attempts: 10,
            ping_interval_secs: 10,
            connect_timeout_secs: 10,
            subscribe_batch_size: MAX_SUBSCRIBE_BATCH,
            event_buffer: 1024,
        }
    }
}

impl FeedConfig {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::new(&self.ws_url)
            .enabled(self.enabled)
            .max_reconnects(self.max_reconnect_attempts)
            .initial_delay(Duration::from_secs(self.reconnect_delay_secs))
            .max_delay(Duration::from_secs(self.max_reconnect_delay_secs))
            .ping_interval(Duration::from_secs(self.ping_interval_secs.max(1)))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs.max(1)))
            .batch_size(self.subscribe_batch_size)
            .event_buffer_size(self.event_buffer)
    }
}

/// REST (pull) API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_rest_timeout")]
    pub timeout_secs: u64,
}

fn default_rest_url() -> String {
    crate::rest::CLOB_API_URL.to_string()
}
fn default_rest_timeout() -> u64 {
    10
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_url(),
            timeout_secs: 10,
        }
    }
}

impl RestConfig {
    pub fn clob_config(&self) -> ClobConfig {
        ClobConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

/// Failover chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverSettings {
    /// Max age for stream prices and the coordinator cache
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age_secs: u64,
}

fn default_cache_max_age() -> u64 {
    60
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            cache_max_age_secs: 60,
        }
    }
}

impl FailoverSettings {
    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            cache_max_age: Duration::from_secs(self.cache_max_age_secs),
        }
    }
}

/// Cross-source validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Percent difference that marks a discrepancy as significant
    #[serde(default = "default_significant_pct")]
    pub significant_threshold_pct: Decimal,

    /// Percent difference that flags potential arbitrage
    #[serde(default = "default_arbitrage_pct")]
    pub arbitrage_threshold_pct: Decimal,

    /// Seconds between validation passes in `run`
    #[serde(default = "default_validation_interval")]
    pub interval_secs: u64,
}

fn default_significant_pct() -> Decimal {
    Decimal::new(2, 0) // 2%
}
fn default_arbitrage_pct() -> Decimal {
    Decimal::new(3, 0) // 3%
}
fn default_validation_interval() -> u64 {
    60
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            significant_threshold_pct: default_significant_pct(),
            arbitrage_threshold_pct: default_arbitrage_pct(),
            interval_secs: 60,
        }
    }
}

impl ValidationConfig {
    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            significant_threshold_pct: self.significant_threshold_pct,
            arbitrage_threshold_pct: self.arbitrage_threshold_pct,
        }
    }
}

/// Request and discrepancy log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Write Parquet logs at all
    #[serde(default)]
    pub capture_enabled: bool,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Seconds per Parquet file before rotating
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,

    /// Rows buffered before a forced flush
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_rotation_interval() -> u64 {
    3600
}
fn default_buffer_size() -> usize {
    1000
}
fn default_flush_interval() -> u64 {
    5
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            capture_enabled: false,
            output_dir: default_output_dir(),
            rotation_interval_secs: 3600,
            buffer_size: 1000,
            flush_interval_secs: 5,
        }
    }
}

impl DataConfig {
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            output_dir: self.output_dir.clone(),
            rotation_interval: Duration::from_secs(self.rotation_interval_secs.max(1)),
            buffer_size: self.buffer_size.max(1),
            flush_interval: Duration::from_secs(self.flush_interval_secs.max(1)),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: None,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
