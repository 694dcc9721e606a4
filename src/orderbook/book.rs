//! Order book snapshots

use super::PriceLevel;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// L2 snapshot for one outcome token, levels held best-first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub token_id: String,
    /// Highest price first
    pub bids: Vec<PriceLevel>,
    /// Lowest price first
    pub asks: Vec<PriceLevel>,
    pub updated_at: DateTime<Utc>,
}

impl OrderBook {
    /// Build a snapshot from levels in venue order
    ///
    /// The venue does not promise best-first ordering on either side.
    pub fn from_levels(
        token_id: impl Into<String>,
        mut bids: Vec<PriceLevel>,
        mut asks: Vec<PriceLevel>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            token_id: token_id.into(),
            bids,
            asks,
            updated_at,
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Best bid and ask, only when both sides are quoted
    fn touch(&self) -> Option<(Decimal, Decimal)> {
        Some((self.best_bid()?, self.best_ask()?))
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        self.touch().map(|(bid, ask)| (bid + ask) / Decimal::TWO)
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.touch().map(|(bid, ask)| ask - bid)
    }
}
