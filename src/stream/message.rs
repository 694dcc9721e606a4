//! Push-feed frame decoding
//!
//! Every inbound text frame is classified once into a [`FeedFrame`]; JSON payloads
//! become typed [`FeedMessage`] variants so the receive loop never branches on raw
//! strings.

use crate::orderbook::{decimal_from_value, parse_levels, OrderBook};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

/// Plain-text keepalive request
pub const PING: &str = "PING";
/// Plain-text keepalive acknowledgement
pub const PONG: &str = "PONG";

/// A decoded inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    /// Keepalive acknowledgement
    Pong,
    /// Peer rejected a subscription
    InvalidOperation,
    /// Any other non-JSON text
    Text(String),
    /// One or more JSON messages
    Messages(Vec<FeedMessage>),
    /// Unparseable JSON
    Malformed(String),
}

/// A single typed feed message
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    PriceChange(TokenPrice),
    Book(OrderBook),
    LastTrade(TokenPrice),
    Subscribed,
    Unsubscribed,
    Error(String),
    Unknown(String),
}

/// A price for one token
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPrice {
    pub asset_id: String,
    pub price: Decimal,
}

/// Outbound subscription request for the market channel
#[derive(Debug, Serialize)]
pub struct SubscriptionMessage<'a> {
    pub assets_ids: &'a [String],
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

impl<'a> SubscriptionMessage<'a> {
    pub fn market(assets_ids: &'a [String]) -> Self {
        Self {
            assets_ids,
            msg_type: "market",
        }
    }
}

/// Classify an inbound text frame
pub fn decode_frame(text: &str) -> FeedFrame {
    let trimmed = text.trim();

    match trimmed {
        PONG => return FeedFrame::Pong,
        "INVALID OPERATION" | "INVALID_OPERATION" => return FeedFrame::InvalidOperation,
        _ => {}
    }

    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return FeedFrame::Text(trimmed.to_string());
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => return FeedFrame::Malformed(e.to_string()),
    };

    match value {
        Value::Array(events) => {
            tracing::trace!(event_count = events.len(), "Parsed as array");
            let messages = events
                .iter()
                .filter(|event| event.is_object())
                .flat_map(decode_event)
                .collect();
            FeedFrame::Messages(messages)
        }
        Value::Object(_) => FeedFrame::Messages(decode_event(&value)),
        other => FeedFrame::Malformed(format!("unexpected JSON value: {other}")),
    }
}

/// Decode one event object; a `price_changes` batch expands into several messages
fn decode_event(event: &Value) -> Vec<FeedMessage> {
    let event_type = event
        .get("type")
        .or_else(|| event.get("event_type"))
        .and_then(Value::as_str)
        .unwrap_or("");

    match event_type {
        "price_change" => price_changes(event),
        "book" => book(event).into_iter().collect(),
        "last_trade_price" => token_price(event, &["price"])
            .map(FeedMessage::LastTrade)
            .into_iter()
            .collect(),
        "subscribed" => vec![FeedMessage::Subscribed],
        "unsubscribed" => vec![FeedMessage::Unsubscribed],
        "error" => {
            let detail = event
                .get("message")
                .or_else(|| event.get("error"))
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_else(|| event.to_string());
            vec![FeedMessage::Error(detail)]
        }
        "" if event.get("price").is_some() || event.get("price_changes").is_some() => {
            price_changes(event)
        }
        "" if event.get("asset_id").is_some()
            && (event.get("bids").is_some() || event.get("asks").is_some()) =>
        {
            book(event).into_iter().collect()
        }
        other => vec![FeedMessage::Unknown(other.to_string())],
    }
}

fn price_changes(event: &Value) -> Vec<FeedMessage> {
    if let Some(changes) = event.get("price_changes").and_then(Value::as_array) {
        return changes
            .iter()
            .filter_map(change_price)
            .map(FeedMessage::PriceChange)
            .collect();
    }

    token_price(event, &["price", "mid", "last_price"])
        .map(FeedMessage::PriceChange)
        .into_iter()
        .collect()
}

/// One entry of a `price_changes` batch; prefers the quoted midpoint when present
fn change_price(change: &Value) -> Option<TokenPrice> {
    let bid = change.get("best_bid").and_then(decimal_from_value);
    let ask = change.get("best_ask").and_then(decimal_from_value);
    if let (Some(bid), Some(ask), Some(asset_id)) = (bid, ask, asset_id(change)) {
        return Some(TokenPrice {
            asset_id,
            price: (bid + ask) / Decimal::TWO,
        });
    }
    token_price(change, &["price"])
}

fn asset_id(event: &Value) -> Option<String> {
    event
        .get("asset_id")
        .or_else(|| event.get("token_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn token_price(event: &Value, price_fields: &[&str]) -> Option<TokenPrice> {
    let asset_id = asset_id(event)?;
    let price = price_fields
        .iter()
        .find_map(|field| event.get(*field).and_then(decimal_from_value))?;
    Some(TokenPrice { asset_id, price })
}

fn book(event: &Value) -> Option<FeedMessage> {
    let asset_id = asset_id(event)?;
    let levels = |side: &str| {
        event
            .get(side)
            .and_then(Value::as_array)
            .map(|l| parse_levels(l))
            .unwrap_or_default()
    };

    // Venue timestamps are milliseconds since epoch, sent as strings
    let updated_at = event
        .get("timestamp")
        .and_then(|v| match v {
            Value::String(s) => s.parse::<i64>().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        })
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(Utc::now);

    Some(FeedMessage::Book(OrderBook::from_levels(
        asset_id,
        levels("bids"),
        levels("asks"),
        updated_at,
    )))
}
