//! Failover coordinator

use super::{age, CachedPrice, FailoverConfig, PriceResult, PriceSource};
use crate::data::{LogRecorder, RequestLogRecord};
use crate::health::{SourceHealthTracker, Tier};
use crate::market::{MarketTokens, Outcome};
use crate::rest::QuoteSource;
use crate::stream::StreamQuotes;
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Resolves a market price through stream, REST and cache tiers
///
/// Never fails: when every tier misses the result is [`PriceSource::None`].
pub struct FailoverCoordinator {
    config: FailoverConfig,
    stream: Arc<dyn StreamQuotes>,
    rest: Arc<dyn QuoteSource>,
    health: Arc<SourceHealthTracker>,
    recorder: Option<Arc<LogRecorder>>,
    cache: RwLock<HashMap<String, CachedPrice>>,
}

impl FailoverCoordinator {
    pub fn new(
        config: FailoverConfig,
        stream: Arc<dyn StreamQuotes>,
        rest: Arc<dyn QuoteSource>,
        health: Arc<SourceHealthTracker>,
    ) -> Self {
        Self {
            config,
            stream,
            rest,
            health,
            recorder: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Also append every attempt to the request log
    pub fn with_recorder(mut self, recorder: Arc<LogRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn health(&self) -> &Arc<SourceHealthTracker> {
        &self.health
    }

    /// First usable result from stream, REST, then cache
    pub async fn get_price(
        &self,
        market_id: &str,
        yes_token: Option<&str>,
        no_token: Option<&str>,
    ) -> PriceResult {
        if let Some(result) = self.stream_quote(market_id) {
            return result;
        }

        if let Some(result) = self.rest_quote(market_id, yes_token, no_token).await {
            return result;
        }

        if let Some(result) = self.cached_quote(market_id) {
            return result;
        }

        tracing::debug!(market_id = %market_id, "No price available from any source");
        PriceResult::empty(market_id)
    }

    /// Resolve many markets concurrently; entries without an id are skipped
    pub async fn get_prices_batch(&self, markets: &[MarketTokens]) -> HashMap<String, PriceResult> {
        let lookups = markets
            .iter()
            .filter(|m| !m.market_id.is_empty())
            .map(|m| async move {
                let result = self.get_price(&m.market_id, m.yes(), m.no()).await;
                (m.market_id.clone(), result)
            });

        join_all(lookups).await.into_iter().collect()
    }

    /// Stream tier: fresh cached updates for at least one side
    ///
    /// Skipped without recording anything while the stream is down.
    pub fn stream_quote(&self, market_id: &str) -> Option<PriceResult> {
        if !self.stream.is_connected() {
            return None;
        }

        let start = Instant::now();
        let now = Utc::now();
        let max_age = self.config.cache_max_age;
        let fresh = |outcome| {
            self.stream
                .cached_price(market_id, outcome)
                .filter(|update| age(now, update.timestamp) <= max_age)
        };

        let yes = fresh(Outcome::Yes);
        let no = fresh(Outcome::No);

        let timestamp = match (&yes, &no) {
            (None, None) => {
                self.record_failure(Tier::Stream, market_id, elapsed_ms(start), "no fresh stream price");
                return None;
            }
            (Some(y), Some(n)) => y.timestamp.max(n.timestamp),
            (Some(u), None) | (None, Some(u)) => u.timestamp,
        };

        let latency_ms = elapsed_ms(start);
        self.record_success(Tier::Stream, market_id, latency_ms);

        Some(PriceResult {
            yes_price: yes.map(|u| u.price),
            no_price: no.map(|u| u.price),
            source: PriceSource::Stream,
            latency_ms,
            timestamp,
            ..PriceResult::empty(market_id)
        })
    }

    /// REST tier: one on-demand round trip; successes refresh the cache
    ///
    /// Skipped without recording anything when no tokens are known.
    pub async fn rest_quote(
        &self,
        market_id: &str,
        yes_token: Option<&str>,
        no_token: Option<&str>,
    ) -> Option<PriceResult> {
        let yes_token = yes_token.filter(|t| !t.is_empty());
        let no_token = no_token.filter(|t| !t.is_empty());
        if yes_token.is_none() && no_token.is_none() {
            return None;
        }

        let start = Instant::now();
        let quote = match self.rest.fetch_quote(yes_token, no_token).await {
            Ok(quote) if quote.has_price() => quote,
            Ok(_) => {
                self.record_failure(Tier::Rest, market_id, elapsed_ms(start), "no price in response");
                return None;
            }
            Err(e) => {
                tracing::debug!(market_id = %market_id, error = %e, "REST quote failed");
                self.record_failure(Tier::Rest, market_id, elapsed_ms(start), e.to_string());
                return None;
            }
        };

        let latency_ms = elapsed_ms(start);
        self.record_success(Tier::Rest, market_id, latency_ms);

        let result = PriceResult {
            market_id: market_id.to_string(),
            yes_price: quote.yes_price,
            no_price: quote.no_price,
            yes_bid: quote.yes_bid,
            yes_ask: quote.yes_ask,
            no_bid: quote.no_bid,
            no_ask: quote.no_ask,
            source: PriceSource::Rest,
            latency_ms,
            timestamp: Utc::now(),
        };

        {
            let max_age = self.config.cache_max_age;
            let mut cache = self.cache.write();
            cache.retain(|_, entry| !entry.is_stale(max_age, result.timestamp));
            cache.insert(
                market_id.to_string(),
                CachedPrice::new(result.clone(), result.timestamp),
            );
        }

        Some(result)
    }

    /// Cache tier: last REST result if within max age; stale entries are evicted
    pub fn cached_quote(&self, market_id: &str) -> Option<PriceResult> {
        let now = Utc::now();

        let lookup = {
            let mut cache = self.cache.write();
            match cache.get(market_id).cloned() {
                None => Err("no cached price"),
                Some(entry) if entry.is_stale(self.config.cache_max_age, now) => {
                    cache.remove(market_id);
                    Err("cached price stale")
                }
                Some(entry) => Ok(PriceResult {
                    source: PriceSource::Cache,
                    latency_ms: 0.0,
                    timestamp: entry.cached_at,
                    ..entry.result
                }),
            }
        };

        match lookup {
            Ok(result) => {
                self.record_success(Tier::Cache, market_id, 0.0);
                Some(result)
            }
            Err(reason) => {
                self.record_failure(Tier::Cache, market_id, 0.0, reason);
                None
            }
        }
    }

    /// Fresh entries in the coordinator cache
    pub fn cache_len(&self) -> usize {
        let now = Utc::now();
        self.cache
            .read()
            .values()
            .filter(|entry| !entry.is_stale(self.config.cache_max_age, now))
            .count()
    }

    fn record_success(&self, tier: Tier, market_id: &str, latency_ms: f64) {
        self.health.record_success(tier, latency_ms);
        self.log(tier, market_id, latency_ms, None);
    }

    fn record_failure(&self, tier: Tier, market_id: &str, latency_ms: f64, reason: impl Into<String>) {
        let reason = reason.into();
        self.health.record_failure(tier, reason.clone());
        self.log(tier, market_id, latency_ms, Some(reason));
    }

    fn log(&self, tier: Tier, market_id: &str, latency_ms: f64, error: Option<String>) {
        if let Some(recorder) = &self.recorder {
            recorder.record_request(RequestLogRecord {
                timestamp: Utc::now(),
                source: tier.as_str().to_string(),
                market_id: Some(market_id.to_string()),
                latency_ms,
                success: error.is_none(),
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::{MarketQuote, RestError};
    use crate::stream::{PriceUpdate, UpdateKind};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock stream cache for testing
    #[derive(Default)]
    struct MockStream {
        connected: Mutex<bool>,
        prices: Mutex<HashMap<(String, Outcome), PriceUpdate>>,
    }

    impl MockStream {
        fn connected() -> Self {
            let stream = Self::default();
            *stream.connected.lock() = true;
            stream
        }

        fn set(&self, market: &str, outcome: Outcome, price: Decimal, at: DateTime<Utc>) {
            self.prices.lock().insert(
                (market.to_string(), outcome),
                PriceUpdate {
                    token_id: format!("{market}-{outcome}"),
                    market_id: market.to_string(),
                    outcome,
                    price,
                    timestamp: at,
                    kind: UpdateKind::PriceChange,
                },
            );
        }
    }

    impl StreamQuotes for MockStream {
        fn is_connected(&self) -> bool {
            *self.connected.lock()
        }

        fn cached_price(&self, market_id: &str, outcome: Outcome) -> Option<PriceUpdate> {
            self.prices.lock().get(&(market_id.to_string(), outcome)).cloned()
        }
    }

    /// Mock REST source returning a fixed quote or failing
    struct MockRest {
        quote: Mutex<Option<MarketQuote>>,
        calls: AtomicUsize,
    }

    impl MockRest {
        fn returning(quote: Option<MarketQuote>) -> Self {
            Self {
                quote: Mutex::new(quote),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteSource for MockRest {
        async fn fetch_quote(
            &self,
            _yes_token: Option<&str>,
            _no_token: Option<&str>,
        ) -> Result<MarketQuote, RestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.quote
                .lock()
                .clone()
                .ok_or_else(|| RestError::Unavailable("mock outage".to_string()))
        }
    }

    fn rest_quote(yes: Decimal, no: Decimal) -> MarketQuote {
        MarketQuote {
            yes_price: Some(yes),
            no_price: Some(no),
            ..Default::default()
        }
    }

    fn coordinator(
        stream: Arc<MockStream>,
        rest: Arc<MockRest>,
        max_age_secs: u64,
    ) -> FailoverCoordinator {
        FailoverCoordinator::new(
            FailoverConfig {
                cache_max_age: Duration::from_secs(max_age_secs),
            },
            stream,
            rest,
            Arc::new(SourceHealthTracker::new()),
        )
    }

    #[tokio::test]
    async fn test_fresh_stream_price_wins() {
        let stream = Arc::new(MockStream::connected());
        stream.set("M", Outcome::Yes, dec!(0.61), Utc::now());
        let rest = Arc::new(MockRest::returning(Some(rest_quote(dec!(0.5), dec!(0.5)))));
        let coordinator = coordinator(stream, rest.clone(), 60);

        let result = coordinator.get_price("M", Some("y"), Some("n")).await;

        assert_eq!(result.source, PriceSource::Stream);
        assert_eq!(result.yes_price, Some(dec!(0.61)));
        assert_eq!(result.no_price, None);
        assert_eq!(rest.calls(), 0);
        assert_eq!(coordinator.health().get(Tier::Stream).success_count, 1);
    }

    #[tokio::test]
    async fn test_rest_fallback_populates_cache() {
        let stream = Arc::new(MockStream::connected());
        let rest = Arc::new(MockRest::returning(Some(rest_quote(dec!(0.58), dec!(0.41)))));
        let coordinator = coordinator(stream, rest, 60);

        let result = coordinator.get_price("M", Some("y"), Some("n")).await;

        assert_eq!(result.source, PriceSource::Rest);
        assert_eq!(result.yes_price, Some(dec!(0.58)));
        assert_eq!(result.no_price, Some(dec!(0.41)));
        assert_eq!(coordinator.cache_len(), 1);

        let health = coordinator.health();
        assert_eq!(health.get(Tier::Stream).failure_count, 1);
        assert_eq!(health.get(Tier::Rest).success_count, 1);
    }

    #[tokio::test]
    async fn test_cache_fallback_when_stream_and_rest_fail() {
        let stream = Arc::new(MockStream::connected());
        let rest = Arc::new(MockRest::returning(None));
        let coordinator = coordinator(stream, rest, 30);

        let cached_at = Utc::now() - ChronoDuration::seconds(10);
        let mut previous = PriceResult::empty("M");
        previous.yes_price = Some(dec!(0.55));
        previous.source = PriceSource::Rest;
        coordinator
            .cache
            .write()
            .insert("M".to_string(), CachedPrice::new(previous, cached_at));

        let result = coordinator.get_price("M", Some("y"), None).await;

        assert_eq!(result.source, PriceSource::Cache);
        assert_eq!(result.yes_price, Some(dec!(0.55)));
        assert_eq!(result.timestamp, cached_at);
        assert_eq!(coordinator.health().get(Tier::Rest).failure_count, 1);
        assert_eq!(coordinator.health().get(Tier::Cache).success_count, 1);
    }

    #[tokio::test]
    async fn test_stale_cache_is_evicted_and_none_returned() {
        let stream = Arc::new(MockStream::connected());
        let rest = Arc::new(MockRest::returning(None));
        let coordinator = coordinator(stream, rest, 30);

        let mut previous = PriceResult::empty("M");
        previous.yes_price = Some(dec!(0.55));
        coordinator.cache.write().insert(
            "M".to_string(),
            CachedPrice::new(previous, Utc::now() - ChronoDuration::seconds(31)),
        );

        let result = coordinator.get_price("M", Some("y"), None).await;

        assert_eq!(result.source, PriceSource::None);
        assert!(!result.has_price());
        assert_eq!(result.market_id, "M");
        assert_eq!(coordinator.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_rest_insert_sweeps_abandoned_markets() {
        let stream = Arc::new(MockStream::connected());
        let rest = Arc::new(MockRest::returning(Some(rest_quote(dec!(0.58), dec!(0.41)))));
        let coordinator = coordinator(stream, rest, 30);

        {
            let mut cache = coordinator.cache.write();
            cache.insert(
                "OLD".to_string(),
                CachedPrice::new(PriceResult::empty("OLD"), Utc::now() - ChronoDuration::seconds(31)),
            );
            cache.insert(
                "RECENT".to_string(),
                CachedPrice::new(PriceResult::empty("RECENT"), Utc::now() - ChronoDuration::seconds(5)),
            );
        }
        assert_eq!(coordinator.cache_len(), 1);

        let result = coordinator.get_price("M", Some("y"), Some("n")).await;
        assert_eq!(result.source, PriceSource::Rest);

        let cache = coordinator.cache.read();
        assert!(!cache.contains_key("OLD"));
        assert!(cache.contains_key("RECENT"));
        assert!(cache.contains_key("M"));
        drop(cache);
        assert_eq!(coordinator.cache_len(), 2);
    }

    #[tokio::test]
    async fn test_stale_stream_price_is_not_surfaced() {
        let stream = Arc::new(MockStream::connected());
        stream.set("M", Outcome::Yes, dec!(0.61), Utc::now() - ChronoDuration::seconds(120));
        let rest = Arc::new(MockRest::returning(Some(rest_quote(dec!(0.58), dec!(0.41)))));
        let coordinator = coordinator(stream, rest, 60);

        let result = coordinator.get_price("M", Some("y"), Some("n")).await;
        assert_eq!(result.source, PriceSource::Rest);
    }

    #[tokio::test]
    async fn test_disconnected_stream_is_skipped() {
        let stream = Arc::new(MockStream::default());
        stream.set("M", Outcome::Yes, dec!(0.61), Utc::now());
        let rest = Arc::new(MockRest::returning(Some(rest_quote(dec!(0.58), dec!(0.41)))));
        let coordinator = coordinator(stream, rest, 60);

        let result = coordinator.get_price("M", Some("y"), Some("n")).await;
        assert_eq!(result.source, PriceSource::Rest);
        assert_eq!(coordinator.health().get(Tier::Stream).total(), 0);
    }

    #[tokio::test]
    async fn test_no_tokens_skips_rest() {
        let stream = Arc::new(MockStream::connected());
        let rest = Arc::new(MockRest::returning(Some(rest_quote(dec!(0.58), dec!(0.41)))));
        let coordinator = coordinator(stream, rest.clone(), 60);

        let result = coordinator.get_price("M", None, Some("")).await;
        assert_eq!(result.source, PriceSource::None);
        assert_eq!(rest.calls(), 0);
        assert_eq!(coordinator.health().get(Tier::Rest).total(), 0);
    }

    #[tokio::test]
    async fn test_empty_rest_quote_is_a_miss() {
        let stream = Arc::new(MockStream::connected());
        let rest = Arc::new(MockRest::returning(Some(MarketQuote::default())));
        let coordinator = coordinator(stream, rest, 60);

        let result = coordinator.get_price("M", Some("y"), None).await;
        assert_eq!(result.source, PriceSource::None);
        assert_eq!(coordinator.cache_len(), 0);
        assert_eq!(
            coordinator.health().get(Tier::Rest).last_error.as_deref(),
            Some("no price in response")
        );
    }

    #[tokio::test]
    async fn test_batch_skips_empty_ids_and_isolates_failures() {
        let stream = Arc::new(MockStream::connected());
        stream.set("A", Outcome::No, dec!(0.30), Utc::now());
        let rest = Arc::new(MockRest::returning(None));
        let coordinator = coordinator(stream, rest, 60);

        let markets = vec![
            MarketTokens::new("A", None::<String>, Some("a-no")),
            MarketTokens::new("", Some("x"), None::<String>),
            MarketTokens::new("B", Some("b-yes"), Some("b-no")),
        ];

        let results = coordinator.get_prices_batch(&markets).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results["A"].source, PriceSource::Stream);
        assert_eq!(results["A"].no_price, Some(dec!(0.30)));
        assert_eq!(results["B"].source, PriceSource::None);
    }
}
