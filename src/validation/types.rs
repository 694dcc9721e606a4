//! Cross-source validation types

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::data::DiscrepancyRecord;

/// Thresholds for flagging discrepancies, in percent
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Max diff at or above which a result is significant
    pub significant_threshold_pct: Decimal,
    /// Max diff at or above which a result flags potential arbitrage
    pub arbitrage_threshold_pct: Decimal,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            significant_threshold_pct: dec!(2),
            arbitrage_threshold_pct: dec!(3),
        }
    }
}

/// Symmetric percent difference against the midpoint of `a` and `b`
///
/// Zero when both are zero or their average is zero.
pub fn diff_pct(a: Decimal, b: Decimal) -> Decimal {
    if a.is_zero() && b.is_zero() {
        return Decimal::ZERO;
    }

    let avg = (a + b) / dec!(2);
    if avg.is_zero() {
        return Decimal::ZERO;
    }

    ((a - b).abs() / avg * dec!(100)).round_dp(4)
}

/// Comparison of a stream quote against a REST quote for one market
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub market_id: String,
    pub timestamp: DateTime<Utc>,
    pub stream_yes: Decimal,
    pub stream_no: Option<Decimal>,
    pub rest_yes: Decimal,
    pub rest_no: Option<Decimal>,
    pub yes_diff_pct: Decimal,
    /// Only when both sources carry a NO price
    pub no_diff_pct: Option<Decimal>,
    pub max_diff_pct: Decimal,
    pub is_significant: bool,
    pub potential_arbitrage: bool,
}

impl From<&ValidationResult> for DiscrepancyRecord {
    fn from(result: &ValidationResult) -> Self {
        Self {
            market_id: result.market_id.clone(),
            timestamp: result.timestamp,
            stream_yes: result.stream_yes,
            stream_no: result.stream_no,
            rest_yes: result.rest_yes,
            rest_no: result.rest_no,
            yes_diff_pct: result.yes_diff_pct,
            no_diff_pct: result.no_diff_pct,
            max_diff_pct: result.max_diff_pct,
            is_significant: result.is_significant,
            potential_arbitrage: result.potential_arbitrage,
        }
    }
}

/// Aggregate discrepancy figures
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscrepancyStats {
    /// Comparisons counted. Live stats see every comparison; the discrepancy
    /// log holds significant rows only, so stats over it have `total == significant`.
    pub total: u64,
    pub significant: u64,
    pub potential_arbitrage: u64,
    /// Mean max diff over significant results, 2 dp
    pub average_discrepancy_pct: Decimal,
    pub last_24h_significant: u64,
}

impl DiscrepancyStats {
    /// Aggregate over records read back from a discrepancy log
    ///
    /// Non-significant comparisons never reach the log, so `total` here is the
    /// number of logged discrepancies, not the number of comparisons made.
    pub fn from_records(records: &[DiscrepancyRecord], now: DateTime<Utc>) -> Self {
        Self::aggregate(
            records
                .iter()
                .map(|r| (r.timestamp, r.max_diff_pct, r.is_significant, r.potential_arbitrage)),
            now,
        )
    }

    pub(crate) fn from_results<'a>(
        results: impl IntoIterator<Item = &'a ValidationResult>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::aggregate(
            results
                .into_iter()
                .map(|r| (r.timestamp, r.max_diff_pct, r.is_significant, r.potential_arbitrage)),
            now,
        )
    }

    fn aggregate(
        rows: impl Iterator<Item = (DateTime<Utc>, Decimal, bool, bool)>,
        now: DateTime<Utc>,
    ) -> Self {
        let cutoff = now - Duration::hours(24);
        let mut stats = Self::default();
        let mut significant_sum = Decimal::ZERO;

        for (timestamp, max_diff_pct, is_significant, potential_arbitrage) in rows {
            stats.total += 1;
            if potential_arbitrage {
                stats.potential_arbitrage += 1;
            }
            if is_significant {
                stats.significant += 1;
                significant_sum += max_diff_pct;
                if timestamp >= cutoff {
                    stats.last_24h_significant += 1;
                }
            }
        }

        if stats.significant > 0 {
            stats.average_discrepancy_pct =
                (significant_sum / Decimal::from(stats.significant)).round_dp(2);
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_pct() {
        let diff = diff_pct(dec!(0.70), dec!(0.60));
        assert!((diff - dec!(15.38)).abs() < dec!(0.01));
        assert_eq!(diff, diff_pct(dec!(0.60), dec!(0.70)));

        assert_eq!(diff_pct(dec!(0.5), dec!(0.5)), Decimal::ZERO);
        assert_eq!(diff_pct(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
        assert_eq!(diff_pct(dec!(1), dec!(-1)), Decimal::ZERO);
        assert_eq!(diff_pct(dec!(0.02), Decimal::ZERO), dec!(200));
    }

    fn record(age_hours: i64, max_diff: Decimal, significant: bool, arbitrage: bool) -> DiscrepancyRecord {
        DiscrepancyRecord {
            market_id: "m".to_string(),
            timestamp: Utc::now() - Duration::hours(age_hours),
            stream_yes: dec!(0.5),
            stream_no: None,
            rest_yes: dec!(0.5),
            rest_no: None,
            yes_diff_pct: max_diff,
            no_diff_pct: None,
            max_diff_pct: max_diff,
            is_significant: significant,
            potential_arbitrage: arbitrage,
        }
    }

    #[test]
    fn test_stats_from_records() {
        let records = vec![
            record(1, dec!(2.5), true, false),
            record(2, dec!(4.0), true, true),
            record(30, dec!(6.0), true, true),
            record(1, dec!(0.5), false, false),
        ];

        let stats = DiscrepancyStats::from_records(&records, Utc::now());
        assert_eq!(stats.total, 4);
        assert_eq!(stats.significant, 3);
        assert_eq!(stats.potential_arbitrage, 2);
        assert_eq!(stats.average_discrepancy_pct, dec!(4.17));
        assert_eq!(stats.last_24h_significant, 2);
    }

    #[test]
    fn test_empty_stats() {
        let stats = DiscrepancyStats::from_records(&[], Utc::now());
        assert_eq!(stats, DiscrepancyStats::default());
    }
}
