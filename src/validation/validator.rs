//! Price validator
//!
//! Compares stream and REST quotes for the same market and flags divergence.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::data::{DiscrepancyRecord, LogRecorder};
use crate::failover::PriceResult;
use crate::telemetry::{increment_counter, CounterMetric};

use super::types::{diff_pct, DiscrepancyStats, ValidationResult, ValidatorConfig};

/// Results kept in memory for stats and recent queries
const HISTORY_CAPACITY: usize = 10_000;

pub struct PriceValidator {
    config: ValidatorConfig,
    recorder: Option<Arc<LogRecorder>>,
    history: RwLock<VecDeque<ValidationResult>>,
}

impl PriceValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            recorder: None,
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Persist significant results to the discrepancy log
    pub fn with_recorder(mut self, recorder: Arc<LogRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Compare two quotes for one market
    ///
    /// Returns `None` unless both carry a YES price. The NO side only counts when
    /// both carry one.
    pub fn validate(&self, stream: &PriceResult, rest: &PriceResult) -> Option<ValidationResult> {
        let stream_yes = stream.yes_price?;
        let rest_yes = rest.yes_price?;

        let yes_diff_pct = diff_pct(stream_yes, rest_yes);
        let no_diff_pct = match (stream.no_price, rest.no_price) {
            (Some(s), Some(r)) => Some(diff_pct(s, r)),
            _ => None,
        };
        let max_diff_pct = no_diff_pct.map_or(yes_diff_pct, |no| no.max(yes_diff_pct));

        let result = ValidationResult {
            market_id: stream.market_id.clone(),
            timestamp: Utc::now(),
            stream_yes,
            stream_no: stream.no_price,
            rest_yes,
            rest_no: rest.no_price,
            yes_diff_pct,
            no_diff_pct,
            max_diff_pct,
            is_significant: max_diff_pct >= self.config.significant_threshold_pct,
            potential_arbitrage: max_diff_pct >= self.config.arbitrage_threshold_pct,
        };

        if result.is_significant {
            tracing::info!(
                market_id = %result.market_id,
                stream_yes = %result.stream_yes,
                rest_yes = %result.rest_yes,
                max_diff_pct = %result.max_diff_pct,
                potential_arbitrage = result.potential_arbitrage,
                "Price discrepancy detected"
            );
            increment_counter(CounterMetric::PriceDiscrepancies);

            if let Some(recorder) = &self.recorder {
                recorder.record_discrepancy(DiscrepancyRecord::from(&result));
            }
        }

        let mut history = self.history.write();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(result.clone());

        Some(result)
    }

    /// Validate every market present in both maps, returning the significant results
    ///
    /// Results are ordered by market id.
    pub fn validate_batch(
        &self,
        stream: &HashMap<String, PriceResult>,
        rest: &HashMap<String, PriceResult>,
    ) -> Vec<ValidationResult> {
        let mut common: Vec<&String> = stream.keys().filter(|id| rest.contains_key(*id)).collect();
        common.sort();

        common
            .into_iter()
            .filter_map(|id| self.validate(&stream[id], &rest[id]))
            .filter(|result| result.is_significant)
            .collect()
    }

    /// Aggregate figures over the in-memory history
    pub fn stats(&self) -> DiscrepancyStats {
        DiscrepancyStats::from_results(self.history.read().iter(), Utc::now())
    }

    /// Newest first
    pub fn recent_discrepancies(&self, limit: usize, significant_only: bool) -> Vec<ValidationResult> {
        self.history
            .read()
            .iter()
            .rev()
            .filter(|r| !significant_only || r.is_significant)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for PriceValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ParquetReader, RecorderConfig};
    use crate::failover::PriceSource;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tempfile::TempDir;

    fn quote(market: &str, source: PriceSource, yes: Option<Decimal>, no: Option<Decimal>) -> PriceResult {
        PriceResult {
            yes_price: yes,
            no_price: no,
            source,
            ..PriceResult::empty(market)
        }
    }

    #[test]
    fn test_significant_discrepancy_flags_arbitrage() {
        let validator = PriceValidator::default();
        let result = validator
            .validate(
                &quote("M", PriceSource::Stream, Some(dec!(0.70)), None),
                &quote("M", PriceSource::Rest, Some(dec!(0.60)), None),
            )
            .unwrap();

        assert!((result.max_diff_pct - dec!(15.38)).abs() < dec!(0.01));
        assert!(result.is_significant);
        assert!(result.potential_arbitrage);
        assert!(result.no_diff_pct.is_none());
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let validator = PriceValidator::new(ValidatorConfig {
            significant_threshold_pct: dec!(2),
            arbitrage_threshold_pct: dec!(3),
        });

        // 0.505 vs 0.495 is exactly 2%
        let result = validator
            .validate(
                &quote("M", PriceSource::Stream, Some(dec!(0.505)), None),
                &quote("M", PriceSource::Rest, Some(dec!(0.495)), None),
            )
            .unwrap();
        assert_eq!(result.max_diff_pct, dec!(2));
        assert!(result.is_significant);
        assert!(!result.potential_arbitrage);
    }

    #[test]
    fn test_no_side_drives_max_diff() {
        let validator = PriceValidator::default();
        let result = validator
            .validate(
                &quote("M", PriceSource::Stream, Some(dec!(0.50)), Some(dec!(0.40))),
                &quote("M", PriceSource::Rest, Some(dec!(0.50)), Some(dec!(0.50))),
            )
            .unwrap();

        assert_eq!(result.yes_diff_pct, Decimal::ZERO);
        assert_eq!(result.no_diff_pct, Some(result.max_diff_pct));
        assert!(result.is_significant);
    }

    #[test]
    fn test_missing_yes_price_is_not_comparable() {
        let validator = PriceValidator::default();
        let stream = quote("M", PriceSource::Stream, None, Some(dec!(0.4)));
        let rest = quote("M", PriceSource::Rest, Some(dec!(0.6)), Some(dec!(0.4)));

        assert!(validator.validate(&stream, &rest).is_none());
        assert_eq!(validator.stats().total, 0);
    }

    #[test]
    fn test_batch_uses_intersection_and_returns_significant() {
        let validator = PriceValidator::default();

        let stream: HashMap<String, PriceResult> = [
            ("A", dec!(0.70)),
            ("B", dec!(0.50)),
            ("C", dec!(0.40)),
        ]
        .into_iter()
        .map(|(id, yes)| (id.to_string(), quote(id, PriceSource::Stream, Some(yes), None)))
        .collect();

        let rest: HashMap<String, PriceResult> = [("A", dec!(0.60)), ("B", dec!(0.50)), ("D", dec!(0.10))]
            .into_iter()
            .map(|(id, yes)| (id.to_string(), quote(id, PriceSource::Rest, Some(yes), None)))
            .collect();

        let results = validator.validate_batch(&stream, &rest);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].market_id, "A");

        let stats = validator.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.significant, 1);
        assert_eq!(stats.potential_arbitrage, 1);
        assert_eq!(stats.last_24h_significant, 1);
    }

    #[test]
    fn test_recent_discrepancies_newest_first() {
        let validator = PriceValidator::default();
        for (market, rest_yes) in [("A", dec!(0.60)), ("B", dec!(0.70)), ("C", dec!(0.50))] {
            validator.validate(
                &quote(market, PriceSource::Stream, Some(dec!(0.70)), None),
                &quote(market, PriceSource::Rest, Some(rest_yes), None),
            );
        }

        let recent = validator.recent_discrepancies(10, true);
        let ids: Vec<&str> = recent.iter().map(|r| r.market_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A"]);

        assert_eq!(validator.recent_discrepancies(10, false).len(), 3);
        assert_eq!(validator.recent_discrepancies(1, false)[0].market_id, "C");
    }

    #[tokio::test]
    async fn test_significant_results_are_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = Arc::new(LogRecorder::new(RecorderConfig {
            output_dir: temp_dir.path().to_path_buf(),
            rotation_interval: Duration::from_secs(3600),
            buffer_size: 100,
            flush_interval: Duration::from_secs(60),
        }));
        let validator = PriceValidator::default().with_recorder(recorder.clone());

        validator.validate(
            &quote("A", PriceSource::Stream, Some(dec!(0.70)), None),
            &quote("A", PriceSource::Rest, Some(dec!(0.60)), None),
        );
        validator.validate(
            &quote("B", PriceSource::Stream, Some(dec!(0.50)), None),
            &quote("B", PriceSource::Rest, Some(dec!(0.50)), None),
        );
        recorder.close().await;

        let path = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| p.to_string_lossy().contains("discrepancies_"))
            .unwrap();
        let records = ParquetReader::new(path).read_discrepancies().unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].market_id, "A");
        assert!(records[0].potential_arbitrage);

        // Live stats count both comparisons; the log only the discrepancy
        let live = validator.stats();
        let logged = DiscrepancyStats::from_records(&records, Utc::now());
        assert_eq!((live.total, live.significant), (2, 1));
        assert_eq!((logged.total, logged.significant), (1, 1));
        assert_eq!(logged.average_discrepancy_pct, live.average_discrepancy_pct);
        assert_eq!(logged.potential_arbitrage, live.potential_arbitrage);
    }
}
