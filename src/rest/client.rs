//! CLOB REST client
//!
//! Reads `/book` and `/midpoint` for individual outcome tokens.

use super::{MarketQuote, QuoteSource, RestError};
use crate::orderbook::{decimal_from_value, parse_levels, OrderBook};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;

/// CLOB API base URL
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Configuration for the CLOB client
#[derive(Debug, Clone)]
pub struct ClobConfig {
    /// Base URL for the CLOB API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            base_url: CLOB_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Price data for one outcome token
#[derive(Debug, Clone, Default)]
struct SideQuote {
    price: Option<Decimal>,
    bid: Option<Decimal>,
    ask: Option<Decimal>,
}

/// Client for Polymarket's CLOB REST API
pub struct ClobClient {
    config: ClobConfig,
    client: Client,
}

impl ClobClient {
    /// Create a new CLOB client with default configuration
    pub fn new() -> Result<Self, RestError> {
        Self::with_config(ClobConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClobConfig) -> Result<Self, RestError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn get_json(&self, path: &str, token_id: &str) -> Result<Value, RestError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);

        tracing::trace!(url = %url, token_id = %token_id, "CLOB request");

        let response = self
            .client
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RestError::Status { status, body });
        }

        Ok(response.json().await?)
    }

    /// Fetch the L2 book for a token
    pub async fn get_orderbook(&self, token_id: &str) -> Result<OrderBook, RestError> {
        let value = self.get_json("book", token_id).await?;
        let levels = |side: &str| {
            value
                .get(side)
                .and_then(Value::as_array)
                .map(|l| parse_levels(l))
                .unwrap_or_default()
        };

        Ok(OrderBook::from_levels(
            token_id,
            levels("bids"),
            levels("asks"),
            Utc::now(),
        ))
    }

    /// Fetch the venue midpoint for a token
    pub async fn get_midpoint(&self, token_id: &str) -> Result<Option<Decimal>, RestError> {
        let value = self.get_json("midpoint", token_id).await?;
        Ok(value.get("mid").and_then(decimal_from_value))
    }

    /// Book and midpoint for one token; the book's midpoint fills in a missing `mid`
    async fn side_quote(&self, token_id: &str) -> Result<SideQuote, RestError> {
        let (book, mid) = tokio::join!(self.get_orderbook(token_id), self.get_midpoint(token_id));
        let book = book?;
        let mid = mid.unwrap_or_else(|e| {
            tracing::debug!(token_id = %token_id, error = %e, "Midpoint unavailable");
            None
        });

        Ok(SideQuote {
            price: mid.or_else(|| book.mid_price()),
            bid: book.best_bid(),
            ask: book.best_ask(),
        })
    }

    async fn optional_side(&self, token_id: Option<&str>) -> Option<Result<SideQuote, RestError>> {
        match token_id {
            Some(token_id) => Some(self.side_quote(token_id).await),
            None => None,
        }
    }
}

#[async_trait]
impl QuoteSource for ClobClient {
    async fn fetch_quote(
        &self,
        yes_token: Option<&str>,
        no_token: Option<&str>,
    ) -> Result<MarketQuote, RestError> {
        let yes_token = yes_token.filter(|t| !t.is_empty());
        let no_token = no_token.filter(|t| !t.is_empty());

        if yes_token.is_none() && no_token.is_none() {
            return Err(RestError::Unavailable("no tokens to query".to_string()));
        }

        let (yes, no) = tokio::join!(self.optional_side(yes_token), self.optional_side(no_token));

        let mut quote = MarketQuote::default();
        let mut errors = Vec::new();

        match yes {
            Some(Ok(side)) => {
                quote.yes_price = side.price;
                quote.yes_bid = side.bid;
                quote.yes_ask = side.ask;
            }
            Some(Err(e)) => errors.push(format!("yes: {e}")),
            None => {}
        }

        match no {
            Some(Ok(side)) => {
                quote.no_price = side.price;
                quote.no_bid = side.bid;
                quote.no_ask = side.ask;
            }
            Some(Err(e)) => errors.push(format!("no: {e}")),
            None => {}
        }

        let requested = usize::from(yes_token.is_some()) + usize::from(no_token.is_some());
        if errors.len() == requested {
            return Err(RestError::Unavailable(errors.join("; ")));
        }

        for error in &errors {
            tracing::debug!(error = %error, "Partial CLOB quote");
        }

        Ok(quote)
    }
}
