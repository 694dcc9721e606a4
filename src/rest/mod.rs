//! Pull (REST) price source
//!
//! On-demand orderbook and midpoint lookups against the venue's CLOB API

mod client;

pub use client::{ClobClient, ClobConfig, CLOB_API_URL};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// One-shot quote for both outcomes of a market
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketQuote {
    pub yes_price: Option<Decimal>,
    pub no_price: Option<Decimal>,
    pub yes_bid: Option<Decimal>,
    pub yes_ask: Option<Decimal>,
    pub no_bid: Option<Decimal>,
    pub no_ask: Option<Decimal>,
}

impl MarketQuote {
    /// At least one side carries a price
    pub fn has_price(&self) -> bool {
        self.yes_price.is_some() || self.no_price.is_some()
    }
}

/// REST source errors
#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
}

/// Source of on-demand market quotes
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch a quote for the given outcome tokens
    ///
    /// Fails only when no requested side could be fetched.
    async fn fetch_quote(
        &self,
        yes_token: Option<&str>,
        no_token: Option<&str>,
    ) -> Result<MarketQuote, RestError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_quote_has_price() {
        assert!(!MarketQuote::default().has_price());

        let quote = MarketQuote {
            no_price: Some(dec!(0.41)),
            ..Default::default()
        };
        assert!(quote.has_price());
    }

    #[test]
    fn test_rest_error_display() {
        let err = RestError::Status {
            status: 404,
            body: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "API returned 404: not found");
    }
}
