//! Push-feed stream module
//!
//! A single persistent WebSocket connection to the venue's market channel, with a
//! subscription registry that survives reconnects and a latest-price cache.

mod connection;
mod message;
mod observer;
mod registry;
mod types;

pub use connection::{reconnect_delay, reconnects_exhausted, StreamConnection};
pub use message::{decode_frame, FeedFrame, FeedMessage, SubscriptionMessage, TokenPrice};
pub use observer::{spawn_dispatcher, StreamObserver};
pub use registry::{subscribe_messages, Subscription, SubscriptionRegistry};
pub use types::*;

use crate::market::Outcome;

/// Read side of the stream cache, as seen by the failover chain
pub trait StreamQuotes: Send + Sync {
    fn is_connected(&self) -> bool;

    fn cached_price(&self, market_id: &str, outcome: Outcome) -> Option<PriceUpdate>;
}

impl StreamQuotes for StreamConnection {
    fn is_connected(&self) -> bool {
        StreamConnection::is_connected(self)
    }

    fn cached_price(&self, market_id: &str, outcome: Outcome) -> Option<PriceUpdate> {
        StreamConnection::cached_price(self, market_id, outcome)
    }
}
