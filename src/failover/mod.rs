//! Failover chain
//!
//! Stream cache, then a REST pull, then the coordinator's own short-TTL cache.

mod coordinator;

pub use coordinator::FailoverCoordinator;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Which tier produced a price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Stream,
    Rest,
    Cache,
    /// Every tier missed
    None,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Stream => "stream",
            PriceSource::Rest => "rest",
            PriceSource::Cache => "cache",
            PriceSource::None => "none",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price for both outcomes of a market, tagged with where it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceResult {
    pub market_id: String,
    pub yes_price: Option<Decimal>,
    pub no_price: Option<Decimal>,
    pub yes_bid: Option<Decimal>,
    pub yes_ask: Option<Decimal>,
    pub no_bid: Option<Decimal>,
    pub no_ask: Option<Decimal>,
    pub source: PriceSource,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceResult {
    /// A valid result carrying no prices
    pub fn empty(market_id: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            yes_price: None,
            no_price: None,
            yes_bid: None,
            yes_ask: None,
            no_bid: None,
            no_ask: None,
            source: PriceSource::None,
            latency_ms: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn has_price(&self) -> bool {
        self.yes_price.is_some() || self.no_price.is_some()
    }

    /// `|1 - (yes + no)|`, when both sides are known
    pub fn spread(&self) -> Option<Decimal> {
        match (self.yes_price, self.no_price) {
            (Some(yes), Some(no)) => Some((Decimal::ONE - (yes + no)).abs()),
            _ => None,
        }
    }
}

/// Age of `then` at `now`; timestamps in the future count as zero
pub(crate) fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// A result held by the coordinator's cache
#[derive(Debug, Clone)]
pub struct CachedPrice {
    pub result: PriceResult,
    pub cached_at: DateTime<Utc>,
}

impl CachedPrice {
    pub fn new(result: PriceResult, cached_at: DateTime<Utc>) -> Self {
        Self { result, cached_at }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        age(now, self.cached_at)
    }

    /// Strictly older than `max_age`
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > max_age
    }
}

/// Failover chain configuration
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Max age for stream prices and coordinator cache entries
    pub cache_max_age: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            cache_max_age: Duration::from_secs(60),
        }
    }
}
