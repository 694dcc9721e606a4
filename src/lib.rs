//! poly-feed: multi-source real-time price feed for Polymarket binary markets
//!
//! This library provides the core components for:
//! - A persistent WebSocket market feed with reconnect and subscription replay
//! - On-demand orderbook and midpoint lookups over the CLOB REST API
//! - Per-source health tracking
//! - A stream, REST, cache failover chain
//! - Cross-source price validation
//! - Request and discrepancy logs in Parquet
//! - Logging and Prometheus metrics

pub mod cli;
pub mod config;
pub mod data;
pub mod failover;
pub mod health;
pub mod market;
pub mod orderbook;
pub mod pipeline;
pub mod rest;
pub mod stream;
pub mod telemetry;
pub mod validation;

pub use pipeline::{FeedPipeline, HealthReport};
