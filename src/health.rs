//! Per-source health tracking
//!
//! Success/failure/latency counters for each tier of the failover chain. Scores are
//! diagnostic only; they never reorder the chain.

use crate::telemetry::record_source_request;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;

/// A tier of the failover chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Stream,
    Rest,
    Cache,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Stream, Tier::Rest, Tier::Cache];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Stream => "stream",
            Tier::Rest => "rest",
            Tier::Cache => "cache",
        }
    }

    fn index(self) -> usize {
        match self {
            Tier::Stream => 0,
            Tier::Rest => 1,
            Tier::Cache => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one source; monotonic for the life of the process
#[derive(Debug, Clone, Default)]
pub struct SourceHealth {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_latency_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SourceHealth {
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Success rate in percent; 100 with no data
    pub fn reliability_score(&self) -> f64 {
        match self.total() {
            0 => 100.0,
            total => self.success_count as f64 / total as f64 * 100.0,
        }
    }

    /// Mean latency over successes; 0 with none
    pub fn average_latency_ms(&self) -> f64 {
        match self.success_count {
            0 => 0.0,
            n => self.total_latency_ms / n as f64,
        }
    }
}

/// Reporting view of [`SourceHealth`], rounded to two places
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: Tier,
    pub success_count: u64,
    pub failure_count: u64,
    pub reliability: f64,
    pub avg_latency_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl SourceReport {
    fn new(source: Tier, health: &SourceHealth) -> Self {
        Self {
            source,
            success_count: health.success_count,
            failure_count: health.failure_count,
            reliability: round2(health.reliability_score()),
            avg_latency_ms: round2(health.average_latency_ms()),
            last_success: health.last_success,
            last_failure: health.last_failure,
            last_error: health.last_error.clone(),
        }
    }
}

/// Health counters for the stream, REST and cache tiers
#[derive(Debug, Default)]
pub struct SourceHealthTracker {
    sources: RwLock<[SourceHealth; 3]>,
}

impl SourceHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, tier: Tier, latency_ms: f64) {
        {
            let mut sources = self.sources.write();
            let health = &mut sources[tier.index()];
            health.success_count += 1;
            health.total_latency_ms += latency_ms.max(0.0);
            health.last_success = Some(Utc::now());
        }
        record_source_request(tier.as_str(), true, latency_ms);
    }

    pub fn record_failure(&self, tier: Tier, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(source = %tier, reason = %reason, "Source miss");
        {
            let mut sources = self.sources.write();
            let health = &mut sources[tier.index()];
            health.failure_count += 1;
            health.last_failure = Some(Utc::now());
            health.last_error = Some(reason);
        }
        record_source_request(tier.as_str(), false, 0.0);
    }

    pub fn get(&self, tier: Tier) -> SourceHealth {
        self.sources.read()[tier.index()].clone()
    }

    pub fn snapshot(&self) -> Vec<SourceReport> {
        let sources = self.sources.read();
        Tier::ALL
            .iter()
            .map(|tier| SourceReport::new(*tier, &sources[tier.index()]))
            .collect()
    }

    pub fn total_requests(&self) -> u64 {
        self.sources.read().iter().map(SourceHealth::total).sum()
    }

    /// Success rate across every tier; 100 with no data
    pub fn overall_reliability(&self) -> f64 {
        let sources = self.sources.read();
        let total: u64 = sources.iter().map(SourceHealth::total).sum();
        let successes: u64 = sources.iter().map(|s| s.success_count).sum();
        match total {
            0 => 100.0,
            total => round2(successes as f64 / total as f64 * 100.0),
        }
    }

    /// The tier currently expected to serve most reads
    pub fn primary_source(&self, stream_connected: bool) -> Tier {
        if stream_connected {
            Tier::Stream
        } else if self.get(Tier::Rest).reliability_score() > 50.0 {
            Tier::Rest
        } else {
            Tier::Cache
        }
    }
}
