//! Order book module
//!
//! L2 book snapshots from the venue, shared by the REST tier and the push feed

mod book;

pub use book::OrderBook;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// A price level in the order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price at this level
    pub price: Decimal,
    /// Total size available
    pub size: Decimal,
}

/// Parse a venue numeric field, which may arrive as a JSON string or number
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

/// Parse `[{"price": .., "size": ..}, ..]`, skipping levels with an unreadable price
pub fn parse_levels(levels: &[Value]) -> Vec<PriceLevel> {
    levels
        .iter()
        .filter_map(|level| {
            let price = level.get("price").and_then(decimal_from_value)?;
            let size = level
                .get("size")
                .and_then(decimal_from_value)
                .unwrap_or(Decimal::ZERO);
            Some(PriceLevel { price, size })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_from_string_and_number() {
        assert_eq!(decimal_from_value(&json!("0.55")), Some(dec!(0.55)));
        assert_eq!(decimal_from_value(&json!(0.41)), Some(dec!(0.41)));
        assert_eq!(decimal_from_value(&json!(1)), Some(dec!(1)));
        assert_eq!(decimal_from_value(&json!("abc")), None);
        assert_eq!(decimal_from_value(&json!(null)), None);
    }

    #[test]
    fn test_parse_levels_skips_invalid_price() {
        let levels = vec![
            json!({"price": "0.50", "size": "100.5"}),
            json!({"price": "invalid", "size": "50"}),
            json!({"size": "10"}),
        ];
        let parsed = parse_levels(&levels);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].price, dec!(0.50));
        assert_eq!(parsed[0].size, dec!(100.5));
    }
}
