//! Feed pipeline
//!
//! Owns the stream connection, the REST client, the failover chain, the validator
//! and the optional Parquet recorder, and exposes them as one facade.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::data::LogRecorder;
use crate::failover::{FailoverCoordinator, PriceResult};
use crate::health::{SourceHealthTracker, SourceReport, Tier};
use crate::market::MarketTokens;
use crate::rest::{ClobClient, QuoteSource};
use crate::stream::{
    spawn_dispatcher, ConnectionHealth, ConnectionState, StreamConnection, StreamObserver,
};
use crate::validation::{DiscrepancyStats, PriceValidator, ValidationResult};

/// Counts stream outages against the stream tier
struct StreamHealthObserver {
    health: Arc<SourceHealthTracker>,
}

impl StreamObserver for StreamHealthObserver {
    fn on_state_change(&self, state: ConnectionState, reason: Option<&str>) -> anyhow::Result<()> {
        if matches!(state, ConnectionState::Reconnecting | ConnectionState::Failed) {
            self.health
                .record_failure(Tier::Stream, reason.unwrap_or("disconnected"));
        }
        Ok(())
    }
}

/// Point-in-time view of every source
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub connection: ConnectionHealth,
    pub cache_entries: usize,
    pub primary_source: Tier,
    pub overall_reliability: f64,
    pub total_requests: u64,
}

pub struct FeedPipeline {
    config: Config,
    stream: Arc<StreamConnection>,
    health: Arc<SourceHealthTracker>,
    coordinator: FailoverCoordinator,
    validator: PriceValidator,
    recorder: Option<Arc<LogRecorder>>,
    observers: Mutex<Vec<Arc<dyn StreamObserver>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl FeedPipeline {
    /// Build the pipeline against the venue's CLOB API
    ///
    /// Must run inside a tokio runtime when capture is enabled.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let rest = ClobClient::with_config(config.rest.clob_config())?;
        Ok(Self::with_quote_source(config, Arc::new(rest)))
    }

    /// Build the pipeline against any REST quote source
    pub fn with_quote_source(config: Config, rest: Arc<dyn QuoteSource>) -> Self {
        let stream = Arc::new(StreamConnection::new(config.feed.stream_config()));
        let health = Arc::new(SourceHealthTracker::new());

        let recorder = config
            .data
            .capture_enabled
            .then(|| Arc::new(LogRecorder::new(config.data.recorder_config())));

        let mut coordinator = FailoverCoordinator::new(
            config.failover.failover_config(),
            stream.clone(),
            rest,
            health.clone(),
        );
        let mut validator = PriceValidator::new(config.validation.validator_config());

        if let Some(recorder) = &recorder {
            tracing::info!(output_dir = ?recorder.output_dir(), "Recording request and discrepancy logs");
            coordinator = coordinator.with_recorder(recorder.clone());
            validator = validator.with_recorder(recorder.clone());
        }

        let observers: Vec<Arc<dyn StreamObserver>> = vec![Arc::new(StreamHealthObserver {
            health: health.clone(),
        })];

        Self {
            config,
            stream,
            health,
            coordinator,
            validator,
            recorder,
            observers: Mutex::new(observers),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stream(&self) -> &Arc<StreamConnection> {
        &self.stream
    }

    pub fn health(&self) -> &Arc<SourceHealthTracker> {
        &self.health
    }

    /// Register an observer; only observers added before `initialize` see events
    pub fn add_observer(&self, observer: Arc<dyn StreamObserver>) {
        if self.dispatcher.lock().is_some() {
            tracing::warn!("Observer added after initialize, it will not receive events");
        }
        self.observers.lock().push(observer);
    }

    /// Start event dispatch and connect the stream
    ///
    /// Safe to call again; an already running stream is left alone.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        {
            let mut dispatcher = self.dispatcher.lock();
            if dispatcher.is_none() {
                if let Some(events) = self.stream.take_events() {
                    let observers = self.observers.lock().clone();
                    *dispatcher = Some(spawn_dispatcher(events, observers));
                }
            }
        }

        self.stream.connect().await?;

        tracing::info!(
            state = %self.stream.state(),
            capture = self.recorder.is_some(),
            "Feed pipeline initialized"
        );
        Ok(())
    }

    /// Returns how many tokens were newly registered
    pub fn subscribe_market(&self, market_id: &str, yes_token: Option<&str>, no_token: Option<&str>) -> usize {
        self.stream.subscribe(market_id, yes_token, no_token)
    }

    pub fn subscribe_markets(&self, markets: &[MarketTokens]) -> usize {
        self.stream.subscribe_batch(markets)
    }

    pub async fn get_price(
        &self,
        market_id: &str,
        yes_token: Option<&str>,
        no_token: Option<&str>,
    ) -> PriceResult {
        self.coordinator.get_price(market_id, yes_token, no_token).await
    }

    pub async fn get_prices_batch(&self, markets: &[MarketTokens]) -> HashMap<String, PriceResult> {
        self.coordinator.get_prices_batch(markets).await
    }

    /// Compare stream and REST quotes for each market, returning significant divergences
    ///
    /// REST quotes are fetched concurrently. Markets missing from either source are
    /// skipped.
    pub async fn validate_markets(&self, markets: &[MarketTokens]) -> Vec<ValidationResult> {
        let markets: Vec<&MarketTokens> = markets.iter().filter(|m| !m.market_id.is_empty()).collect();

        let stream_quotes: HashMap<String, PriceResult> = markets
            .iter()
            .filter_map(|m| self.coordinator.stream_quote(&m.market_id))
            .map(|result| (result.market_id.clone(), result))
            .collect();

        let rest_quotes: HashMap<String, PriceResult> = join_all(
            markets
                .iter()
                .filter(|m| stream_quotes.contains_key(&m.market_id))
                .map(|m| self.coordinator.rest_quote(&m.market_id, m.yes(), m.no())),
        )
        .await
        .into_iter()
        .flatten()
        .map(|result| (result.market_id.clone(), result))
        .collect();

        let results = self.validator.validate_batch(&stream_quotes, &rest_quotes);
        tracing::debug!(
            markets = markets.len(),
            compared = rest_quotes.len(),
            significant = results.len(),
            "Validation pass complete"
        );
        results
    }

    pub fn discrepancy_stats(&self) -> DiscrepancyStats {
        self.validator.stats()
    }

    pub fn recent_discrepancies(&self, limit: usize, significant_only: bool) -> Vec<ValidationResult> {
        self.validator.recent_discrepancies(limit, significant_only)
    }

    pub fn get_health_report(&self) -> HealthReport {
        let connection = self.stream.health();
        HealthReport {
            timestamp: Utc::now(),
            sources: self.health.snapshot(),
            cache_entries: self.coordinator.cache_len(),
            primary_source: self.health.primary_source(connection.connected),
            overall_reliability: self.health.overall_reliability(),
            total_requests: self.health.total_requests(),
            connection,
        }
    }

    /// Disconnect the stream, stop event dispatch and flush the logs
    pub async fn close(&self) {
        self.stream.disconnect().await;

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            // Sender lives inside the connection, so the channel never closes on its own
            handle.abort();
            let _ = handle.await;
        }

        if let Some(recorder) = &self.recorder {
            recorder.close().await;
        }

        tracing::info!("Feed pipeline closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::PriceSource;
    use crate::rest::{MarketQuote, RestError};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct FixedQuotes(Option<MarketQuote>);

    #[async_trait]
    impl QuoteSource for FixedQuotes {
        async fn fetch_quote(
            &self,
            _yes_token: Option<&str>,
            _no_token: Option<&str>,
        ) -> Result<MarketQuote, RestError> {
            self.0
                .clone()
                .ok_or_else(|| RestError::Unavailable("down".to_string()))
        }
    }

    fn offline_config() -> Config {
        let mut config = Config::default();
        config.feed.enabled = false;
        config
    }

    fn quote(yes: rust_decimal::Decimal, no: rust_decimal::Decimal) -> MarketQuote {
        MarketQuote {
            yes_price: Some(yes),
            no_price: Some(no),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_offline_stream_falls_back_to_rest() {
        let pipeline =
            FeedPipeline::with_quote_source(offline_config(), Arc::new(FixedQuotes(Some(quote(dec!(0.58), dec!(0.41))))));
        pipeline.initialize().await.unwrap();

        assert_eq!(pipeline.subscribe_market("M", Some("y"), Some("n")), 2);

        let result = pipeline.get_price("M", Some("y"), Some("n")).await;
        assert_eq!(result.source, PriceSource::Rest);
        assert_eq!(result.spread(), Some(dec!(0.01)));

        let report = pipeline.get_health_report();
        assert_eq!(report.cache_entries, 1);
        assert_eq!(report.primary_source, Tier::Rest);
        assert_eq!(report.total_requests, 1);
        assert_eq!(report.overall_reliability, 100.0);
        assert_eq!(report.connection.subscribed_tokens, 2);
        assert!(!report.connection.connected);

        pipeline.close().await;
    }

    #[tokio::test]
    async fn test_validation_needs_stream_quotes() {
        let pipeline =
            FeedPipeline::with_quote_source(offline_config(), Arc::new(FixedQuotes(Some(quote(dec!(0.58), dec!(0.41))))));

        let markets = vec![MarketTokens::new("M", Some("y"), Some("n"))];
        assert!(pipeline.validate_markets(&markets).await.is_empty());
        assert_eq!(pipeline.discrepancy_stats().total, 0);
        assert_eq!(pipeline.health().get(Tier::Rest).total(), 0);
    }

    #[tokio::test]
    async fn test_health_observer_counts_outages() {
        let health = Arc::new(SourceHealthTracker::new());
        let observer = StreamHealthObserver { health: health.clone() };

        observer.on_state_change(ConnectionState::Connected, None).unwrap();
        observer
            .on_state_change(ConnectionState::Reconnecting, Some("connection reset"))
            .unwrap();
        observer
            .on_state_change(ConnectionState::Failed, Some("max_reconnect_attempts"))
            .unwrap();

        let stream = health.get(Tier::Stream);
        assert_eq!(stream.failure_count, 2);
        assert_eq!(stream.last_error.as_deref(), Some("max_reconnect_attempts"));
    }

    #[tokio::test]
    async fn test_all_sources_down_returns_empty_result() {
        let pipeline = FeedPipeline::with_quote_source(offline_config(), Arc::new(FixedQuotes(None)));

        let results = pipeline
            .get_prices_batch(&[MarketTokens::new("M", Some("y"), None::<String>)])
            .await;

        assert_eq!(results["M"].source, PriceSource::None);
        assert_eq!(pipeline.get_health_report().primary_source, Tier::Cache);
        pipeline.close().await;
    }
}
