//! Subscription registry
//!
//! Maps venue token ids back to (market, outcome). The registry is append-only for
//! the life of the connection and is replayed in full on every reconnect.

use super::message::SubscriptionMessage;
use crate::market::Outcome;
use std::collections::{HashMap, HashSet};

/// Where a subscribed token belongs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub market_id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    tokens: HashMap<String, Subscription>,
    /// Insertion order, so replays are deterministic
    order: Vec<String>,
    markets: HashSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a market's tokens and return the ones not previously subscribed
    pub fn register(
        &mut self,
        market_id: &str,
        yes_token: Option<&str>,
        no_token: Option<&str>,
    ) -> Vec<String> {
        let mut added = Vec::new();

        for (token, outcome) in [(yes_token, Outcome::Yes), (no_token, Outcome::No)] {
            let Some(token) = token.filter(|t| !t.is_empty()) else {
                continue;
            };

            let subscription = Subscription {
                market_id: market_id.to_string(),
                outcome,
            };

            match self.tokens.insert(token.to_string(), subscription) {
                None => {
                    self.order.push(token.to_string());
                    added.push(token.to_string());
                }
                Some(previous) if previous.market_id != market_id || previous.outcome != outcome => {
                    tracing::warn!(
                        token_id = %token,
                        old_market = %previous.market_id,
                        new_market = %market_id,
                        "Token remapped to a different market"
                    );
                }
                Some(_) => {}
            }

            self.markets.insert(market_id.to_string());
        }

        added
    }

    pub fn lookup(&self, token_id: &str) -> Option<&Subscription> {
        self.tokens.get(token_id)
    }

    /// All subscribed tokens in insertion order
    pub fn token_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }
}

/// Serialize subscribe requests, at most `batch_size` tokens each
pub fn subscribe_messages(tokens: &[String], batch_size: usize) -> Vec<String> {
    tokens
        .chunks(batch_size.max(1))
        .filter_map(|chunk| {
            serde_json::to_string(&SubscriptionMessage::market(chunk))
                .map_err(|e| tracing::error!(error = %e, "Failed to serialize subscription"))
                .ok()
        })
        .collect()
}
