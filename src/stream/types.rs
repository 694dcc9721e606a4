//! Stream connection types and configuration

use crate::market::Outcome;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Polymarket CLOB WebSocket URL for market data
pub const POLYMARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Maximum token ids the venue accepts in one subscribe message
pub const MAX_SUBSCRIBE_BATCH: usize = 500;

/// Stream connection configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// When false, `connect()` is a no-op
    pub enabled: bool,
    /// Reconnects allowed after the first failure before the connection is marked failed
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt
    pub initial_reconnect_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,
    /// Interval between `PING` keepalives
    pub ping_interval: Duration,
    /// Upper bound on a single connect handshake
    pub connect_timeout: Duration,
    /// Token ids per outbound subscribe message
    pub subscribe_batch_size: usize,
    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: POLYMARKET_WS_URL.to_string(),
            enabled: true,
            max_reconnect_attempts: 10,
            initial_reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(160),
            ping_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            subscribe_batch_size: MAX_SUBSCRIBE_BATCH,
            event_buffer: 1024,
        }
    }
}

impl StreamConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set maximum reconnection attempts
    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// Set initial reconnection delay
    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_reconnect_delay = d;
        self
    }

    /// Set maximum reconnection delay
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_reconnect_delay = d;
        self
    }

    /// Set ping interval
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    /// Set subscribe batch size, capped at the venue limit
    pub fn batch_size(mut self, n: usize) -> Self {
        self.subscribe_batch_size = n.clamp(1, MAX_SUBSCRIBE_BATCH);
        self
    }

    /// Set event channel capacity
    pub fn event_buffer_size(mut self, n: usize) -> Self {
        self.event_buffer = n.max(1);
        self
    }

    /// Enable or disable the feed
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Lifecycle state of the stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Which frame kind produced a price update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    PriceChange,
    Book,
    LastTrade,
}

/// Latest price seen on the stream for one outcome of a market
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceUpdate {
    pub token_id: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub price: Decimal,
    /// Local receipt time
    pub timestamp: DateTime<Utc>,
    pub kind: UpdateKind,
}

/// Events published by the connection to its observer channel
#[derive(Debug, Clone)]
pub enum StreamEvent {
    PriceUpdated(PriceUpdate),
    StateChanged {
        state: ConnectionState,
        reason: Option<String>,
    },
}

/// Counters for the connection, monotonic for the life of the process
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub messages_received: u64,
    pub protocol_errors: u64,
    pub subscription_rejections: u64,
    pub transport_errors: u64,
    pub reconnect_attempts: u32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub dropped_events: u64,
}

impl StreamStats {
    /// Seconds connected in the current (or last) session
    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> f64 {
        let Some(connected_at) = self.connected_at else {
            return 0.0;
        };
        let end = self.disconnected_at.unwrap_or(now);
        (end - connected_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn is_connected(&self) -> bool {
        self.connected_at.is_some() && self.disconnected_at.is_none()
    }
}

/// Diagnostic snapshot of the connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    pub connected: bool,
    pub uptime_seconds: f64,
    pub messages_received: u64,
    pub errors: u64,
    pub subscription_rejections: u64,
    pub reconnect_attempts: u32,
    pub subscribed_markets: usize,
    pub subscribed_tokens: usize,
    pub cached_prices: usize,
    pub dropped_events: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Stream connection errors
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Connection dropped or could not be established
    #[error("Transport error: {0}")]
    Transport(String),
    /// Reconnect attempts exhausted; only an explicit restart recovers
    #[error("Connection failed permanently, restart required")]
    Terminated,
}
