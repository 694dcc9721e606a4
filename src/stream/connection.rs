//! Persistent market-feed connection with bounded reconnection

use super::message::{decode_frame, FeedFrame, FeedMessage, PING};
use super::registry::{subscribe_messages, SubscriptionRegistry};
use super::types::{
    ConnectionHealth, ConnectionState, PriceUpdate, StreamConfig, StreamError, StreamEvent,
    StreamStats, UpdateKind,
};
use crate::market::{MarketTokens, Outcome};
use crate::telemetry::{increment_counter, set_gauge, CounterMetric, GaugeMetric};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Backoff before reconnect attempt `attempt` (1-based): `min(base * 2^(attempt-1), max)`
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

/// Whether `failures` consecutive failed attempts use up a budget of `max_reconnects`
///
/// The first failure is not a reconnect, so a budget of N allows N + 1 attempts.
pub fn reconnects_exhausted(failures: u32, max_reconnects: u32) -> bool {
    failures > max_reconnects
}

/// Latest stream price for both outcomes of a market
#[derive(Debug, Clone, Default)]
struct MarketPrices {
    yes: Option<PriceUpdate>,
    no: Option<PriceUpdate>,
}

struct Subscriptions {
    registry: SubscriptionRegistry,
    /// Writer queue of the live session, if any
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

/// State shared between the public handle and the connection tasks
struct Shared {
    config: StreamConfig,
    state: RwLock<ConnectionState>,
    subs: Mutex<Subscriptions>,
    prices: RwLock<HashMap<String, MarketPrices>>,
    stats: RwLock<StreamStats>,
    events: mpsc::Sender<StreamEvent>,
}

struct Session {
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// One persistent push-feed connection
///
/// Owns the subscription registry, the per-(market, outcome) price cache and up to
/// three tasks: the reconnect supervisor (which also owns the write half), the
/// receive loop and the keepalive loop.
pub struct StreamConnection {
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
    events_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
}

impl StreamConnection {
    pub fn new(config: StreamConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));

        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                subs: Mutex::new(Subscriptions {
                    registry: SubscriptionRegistry::new(),
                    outbound: None,
                }),
                prices: RwLock::new(HashMap::new()),
                stats: RwLock::new(StreamStats::default()),
                events: events_tx,
            }),
            session: tokio::sync::Mutex::new(None),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// Take the event receiver; only the first caller gets it
    ///
    /// Events are dropped (and counted) when the receiver is not drained.
    pub fn take_events(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.events_rx.lock().take()
    }

    /// Start the connection
    ///
    /// Returns once the first attempt has either connected or failed. A running
    /// connection is left alone. Transport failures are retried in the background
    /// and never surface here; only a connection that already exhausted its retries
    /// returns [`StreamError::Terminated`].
    pub async fn connect(&self) -> Result<(), StreamError> {
        if !self.shared.config.enabled {
            tracing::warn!("Market feed disabled, not connecting");
            return Ok(());
        }

        let mut session = self.session.lock().await;

        if let Some(running) = session.as_ref() {
            if !running.supervisor.is_finished() {
                tracing::debug!("Market feed already running");
                return Ok(());
            }
        }

        if self.state() == ConnectionState::Failed {
            return Err(StreamError::Terminated);
        }

        if let Some(finished) = session.take() {
            let _ = finished.supervisor.await;
        }

        self.shared.stats.write().reconnect_attempts = 0;
        self.shared.set_state(ConnectionState::Connecting, None);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(self.shared.clone(), shutdown_rx, ready_tx));

        *session = Some(Session {
            shutdown: shutdown_tx,
            supervisor,
        });
        drop(session);

        // Sender is dropped without firing if the supervisor is torn down first
        let _ = ready_rx.await;

        match self.state() {
            ConnectionState::Failed => Err(StreamError::Terminated),
            _ => Ok(()),
        }
    }

    /// Stop all connection tasks and wait for them to finish
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();

        if let Some(session) = session {
            let _ = session.shutdown.send(true);
            if let Err(e) = session.supervisor.await {
                tracing::error!(error = %e, "Stream supervisor task failed");
            }
        }

        if self.state() != ConnectionState::Disconnected {
            self.shared.set_state(ConnectionState::Disconnected, None);
            tracing::info!("Market feed disconnected");
        }
    }

    /// Operator restart: tear down and connect again with a fresh reconnect budget
    ///
    /// The registry and cache are kept.
    pub async fn restart(&self) -> Result<(), StreamError> {
        tracing::info!("Restarting market feed");
        self.disconnect().await;
        self.connect().await
    }

    /// Register a market's tokens; returns how many were new
    ///
    /// New tokens are sent straight away on a live connection and replayed on every
    /// future connect either way.
    pub fn subscribe(&self, market_id: &str, yes_token: Option<&str>, no_token: Option<&str>) -> usize {
        let mut subs = self.shared.subs.lock();
        let added = subs.registry.register(market_id, yes_token, no_token);
        self.shared.send_subscriptions(&subs, &added);
        added.len()
    }

    /// Register many markets; new tokens go out in venue-sized batches
    pub fn subscribe_batch(&self, markets: &[MarketTokens]) -> usize {
        let mut subs = self.shared.subs.lock();
        let added: Vec<String> = markets
            .iter()
            .flat_map(|m| subs.registry.register(&m.market_id, m.yes(), m.no()))
            .collect();
        self.shared.send_subscriptions(&subs, &added);

        tracing::info!(
            markets = markets.len(),
            new_tokens = added.len(),
            total_tokens = subs.registry.len(),
            "Subscribed markets"
        );
        added.len()
    }

    /// Latest stream price for one outcome of a market
    pub fn cached_price(&self, market_id: &str, outcome: Outcome) -> Option<PriceUpdate> {
        let prices = self.shared.prices.read();
        let entry = prices.get(market_id)?;
        match outcome {
            Outcome::Yes => entry.yes.clone(),
            Outcome::No => entry.no.clone(),
        }
    }

    /// Latest (yes, no) stream prices for a market
    pub fn cached_prices(&self, market_id: &str) -> (Option<PriceUpdate>, Option<PriceUpdate>) {
        let prices = self.shared.prices.read();
        prices
            .get(market_id)
            .map(|entry| (entry.yes.clone(), entry.no.clone()))
            .unwrap_or_default()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.stats.read().clone()
    }

    /// Token ids in registration order
    pub fn subscribed_tokens(&self) -> Vec<String> {
        self.shared.subs.lock().registry.token_ids().to_vec()
    }

    pub fn health(&self) -> ConnectionHealth {
        let stats = self.stats();
        let (subscribed_markets, subscribed_tokens) = {
            let subs = self.shared.subs.lock();
            (subs.registry.market_count(), subs.registry.len())
        };
        let cached_prices = self
            .shared
            .prices
            .read()
            .values()
            .map(|p| usize::from(p.yes.is_some()) + usize::from(p.no.is_some()))
            .sum();
        let state = self.state();

        ConnectionHealth {
            state,
            connected: state == ConnectionState::Connected,
            uptime_seconds: if state == ConnectionState::Connected {
                stats.uptime_seconds(Utc::now())
            } else {
                0.0
            },
            messages_received: stats.messages_received,
            errors: stats.protocol_errors + stats.subscription_rejections + stats.transport_errors,
            subscription_rejections: stats.subscription_rejections,
            reconnect_attempts: stats.reconnect_attempts,
            subscribed_markets,
            subscribed_tokens,
            cached_prices,
            dropped_events: stats.dropped_events,
            last_message_at: stats.last_message_at,
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown.send(true);
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState, reason: Option<String>) {
        {
            let mut current = self.state.write();
            if *current == state && reason.is_none() {
                return;
            }
            *current = state;
        }

        set_gauge(
            GaugeMetric::StreamConnected,
            if state == ConnectionState::Connected { 1.0 } else { 0.0 },
        );
        self.emit(StreamEvent::StateChanged { state, reason });
    }

    fn emit(&self, event: StreamEvent) {
        if let Err(TrySendError::Full(_)) = self.events.try_send(event) {
            self.stats.write().dropped_events += 1;
            tracing::debug!("Event channel full, dropping event");
        }
    }

    /// Queue subscribe messages on the live session; a no-op while disconnected
    fn send_subscriptions(&self, subs: &Subscriptions, tokens: &[String]) {
        let Some(outbound) = subs.outbound.as_ref() else {
            return;
        };
        for payload in subscribe_messages(tokens, self.config.subscribe_batch_size) {
            if outbound.send(Message::Text(payload)).is_err() {
                tracing::debug!("Writer gone, subscription will be replayed on reconnect");
                break;
            }
        }
    }

    fn protocol_error(&self, detail: &str) {
        self.stats.write().protocol_errors += 1;
        increment_counter(CounterMetric::StreamProtocolErrors);
        tracing::debug!(detail = %detail, "Dropped feed message");
    }

    fn handle_text(&self, text: &str) {
        match decode_frame(text) {
            FeedFrame::Pong => tracing::trace!("Keepalive acknowledged"),
            FeedFrame::InvalidOperation => {
                self.stats.write().subscription_rejections += 1;
                tracing::warn!("Feed rejected a subscription");
            }
            FeedFrame::Text(other) => tracing::debug!(text = %other, "Ignoring text frame"),
            FeedFrame::Malformed(err) => self.protocol_error(&err),
            FeedFrame::Messages(messages) => {
                {
                    let mut stats = self.stats.write();
                    stats.messages_received += 1;
                    stats.last_message_at = Some(Utc::now());
                }
                increment_counter(CounterMetric::StreamMessages);

                for message in messages {
                    self.apply(message);
                }
            }
        }
    }

    fn apply(&self, message: FeedMessage) {
        let (token_id, price, kind) = match message {
            FeedMessage::PriceChange(tp) => (tp.asset_id, tp.price, UpdateKind::PriceChange),
            FeedMessage::LastTrade(tp) => (tp.asset_id, tp.price, UpdateKind::LastTrade),
            FeedMessage::Book(book) => match book.mid_price() {
                Some(mid) => (book.token_id, mid, UpdateKind::Book),
                None => return,
            },
            FeedMessage::Subscribed | FeedMessage::Unsubscribed => return,
            FeedMessage::Error(detail) => return self.protocol_error(&detail),
            FeedMessage::Unknown(kind) => {
                return self.protocol_error(&format!("unknown message type '{kind}'"))
            }
        };

        let Some(subscription) = self.subs.lock().registry.lookup(&token_id).cloned() else {
            tracing::trace!(token_id = %token_id, "Update for unsubscribed token");
            return;
        };

        let update = PriceUpdate {
            token_id,
            market_id: subscription.market_id,
            outcome: subscription.outcome,
            price,
            timestamp: Utc::now(),
            kind,
        };

        tracing::trace!(
            market_id = %update.market_id,
            outcome = %update.outcome,
            price = %update.price,
            "Price update"
        );

        {
            let mut prices = self.prices.write();
            let entry = prices.entry(update.market_id.clone()).or_default();
            match update.outcome {
                Outcome::Yes => entry.yes = Some(update.clone()),
                Outcome::No => entry.no = Some(update.clone()),
            }
        }

        self.emit(StreamEvent::PriceUpdated(update));
    }
}

/// Reconnect supervisor: connect, run a session, back off, repeat
async fn supervise(
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    let config = shared.config.clone();

    loop {
        if *shutdown.borrow() {
            break;
        }

        tracing::info!(url = %config.url, "Connecting to market feed");

        let attempt = tokio::select! {
            res = timeout(config.connect_timeout, connect_async(config.url.as_str())) => res,
            _ = shutdown.changed() => break,
        };

        let failure = match attempt {
            Ok(Ok((socket, _response))) => {
                shared.stats.write().reconnect_attempts = 0;
                match run_session(&shared, socket, &mut shutdown, &mut ready).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) => reason,
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {:?}", config.connect_timeout),
        };

        let attempt = {
            let mut stats = shared.stats.write();
            stats.transport_errors += 1;
            stats.reconnect_attempts += 1;
            stats.reconnect_attempts
        };

        if reconnects_exhausted(attempt, config.max_reconnect_attempts) {
            tracing::error!(
                attempts = attempt,
                error = %failure,
                "Max reconnection attempts reached, market feed failed"
            );
            shared.set_state(
                ConnectionState::Failed,
                Some("max_reconnect_attempts".to_string()),
            );
            fire(&mut ready);
            break;
        }

        let delay = reconnect_delay(
            attempt,
            config.initial_reconnect_delay,
            config.max_reconnect_delay,
        );
        tracing::warn!(
            error = %failure,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Market feed connection lost, reconnecting"
        );
        shared.set_state(ConnectionState::Reconnecting, Some(failure));
        fire(&mut ready);

        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
}

fn fire(ready: &mut Option<oneshot::Sender<()>>) {
    if let Some(tx) = ready.take() {
        let _ = tx.send(());
    }
}

/// Drive one connected socket until it drops or shutdown is signalled
async fn run_session(
    shared: &Arc<Shared>,
    socket: Socket,
    shutdown: &mut watch::Receiver<bool>,
    ready: &mut Option<oneshot::Sender<()>>,
) -> SessionEnd {
    let (mut write, read) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    // Replay under the lock so concurrent subscribes queue behind it
    {
        let mut subs = shared.subs.lock();
        let batches = subscribe_messages(
            subs.registry.token_ids(),
            shared.config.subscribe_batch_size,
        );
        tracing::info!(
            tokens = subs.registry.len(),
            messages = batches.len(),
            "Replaying subscriptions"
        );
        for payload in batches {
            let _ = out_tx.send(Message::Text(payload));
        }
        subs.outbound = Some(out_tx.clone());
    }

    {
        let mut stats = shared.stats.write();
        stats.connected_at = Some(Utc::now());
        stats.disconnected_at = None;
    }
    shared.set_state(ConnectionState::Connected, None);
    tracing::info!("Market feed connected");
    fire(ready);

    let mut receiver = tokio::spawn(receive_loop(shared.clone(), read, out_tx.clone()));
    let keepalive = tokio::spawn(keepalive_loop(out_tx, shared.config.ping_interval));
    let mut receiver_done = false;

    let end = loop {
        tokio::select! {
            Some(message) = out_rx.recv() => {
                if let Err(e) = write.send(message).await {
                    break SessionEnd::Lost(format!("send failed: {e}"));
                }
            }
            res = &mut receiver => {
                receiver_done = true;
                break SessionEnd::Lost(match res {
                    Ok(reason) => reason,
                    Err(e) => format!("receive task ended: {e}"),
                });
            }
            _ = shutdown.changed() => break SessionEnd::Shutdown,
        }
    };

    shared.subs.lock().outbound = None;

    keepalive.abort();
    let _ = keepalive.await;
    if !receiver_done {
        receiver.abort();
        let _ = receiver.await;
    }

    if matches!(end, SessionEnd::Shutdown) {
        close_socket(&mut write).await;
    }

    shared.stats.write().disconnected_at = Some(Utc::now());
    set_gauge(GaugeMetric::StreamConnected, 0.0);

    end
}

async fn close_socket(write: &mut SplitSink<Socket, Message>) {
    if let Err(e) = write.send(Message::Close(None)).await {
        tracing::debug!(error = %e, "Close frame not sent");
    }
    let _ = write.close().await;
}

/// Read frames until the transport closes; returns why it ended
async fn receive_loop(
    shared: Arc<Shared>,
    mut read: SplitStream<Socket>,
    out: mpsc::UnboundedSender<Message>,
) -> String {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.handle_text(&text),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => shared.handle_text(text),
                Err(e) => shared.protocol_error(&format!("non-utf8 binary frame: {e}")),
            },
            Ok(Message::Ping(data)) => {
                let _ = out.send(Message::Pong(data));
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(frame = ?frame, "Received close frame");
                return "closed by peer".to_string();
            }
            Ok(_) => {}
            Err(e) => return e.to_string(),
        }
    }

    "stream ended".to_string()
}

/// Send a plain-text `PING` every interval; the first one goes out after one period
async fn keepalive_loop(out: mpsc::UnboundedSender<Message>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if out.send(Message::Text(PING.to_string())).is_err() {
            break;
        }
        tracing::trace!("Sent keepalive");
    }
}
