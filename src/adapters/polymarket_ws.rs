//! Maker-venue WebSocket adapter: order-book deltas per market id, plus a
//! user-events stream per wallet that wakes the order-status poll early.
//!
//! Two logical subscriptions share one connection:
//! - `"market"` channel: book snapshots/deltas for the registered token ids,
//!   turned into [`crate::domain::Book`] and broadcast as [`BookUpdate`].
//! - `"user"` channel (requires API credentials): order/trade events for our
//!   own wallet, broadcast as [`UserEvent`] to prod the Order-Status Cache's
//!   REST poll rather than being trusted as a fill source directly. The
//!   authoritative merge in the executor only ever combines the chain watcher
//!   and REST polling; maker-venue WS push is a timing hint, not a source.

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::coordination::ShutdownToken;
use crate::domain::{Book, BookSource, Level};
use crate::error::{EngineError, Result};

/// Circuit breaker state for WebSocket connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 60,
            success_threshold: 2,
        }
    }
}

pub struct CircuitBreaker {
    state: RwLock<CircuitBreakerState>,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    last_failure_time: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
    open_count: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(CircuitBreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            last_failure_time: RwLock::new(None),
            config,
            open_count: AtomicU64::new(0),
        }
    }

    pub async fn should_allow(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                if let Some(last_failure) = *self.last_failure_time.read().await {
                    if last_failure.elapsed() >= Duration::from_secs(self.config.open_timeout_secs) {
                        *self.state.write().await = CircuitBreakerState::HalfOpen;
                        self.consecutive_successes.store(0, Ordering::SeqCst);
                        info!("circuit breaker transitioning to half-open");
                        return true;
                    }
                }
                false
            }
            CircuitBreakerState::HalfOpen => true,
        }
    }

    pub async fn get_state(&self) -> CircuitBreakerState {
        *self.state.read().await
    }

    pub async fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
        let current_state = *self.state.read().await;
        if current_state == CircuitBreakerState::HalfOpen && successes >= self.config.success_threshold {
            *self.state.write().await = CircuitBreakerState::Closed;
            info!(successes, "circuit breaker closed");
        }
    }

    pub async fn record_failure(&self) {
        self.consecutive_successes.store(0, Ordering::SeqCst);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_failure_time.write().await = Some(Instant::now());
        let current_state = *self.state.read().await;

        if current_state == CircuitBreakerState::HalfOpen {
            *self.state.write().await = CircuitBreakerState::Open;
            self.open_count.fetch_add(1, Ordering::SeqCst);
            warn!("circuit breaker re-opened from half-open");
            return;
        }
        if current_state == CircuitBreakerState::Closed && failures >= self.config.failure_threshold {
            *self.state.write().await = CircuitBreakerState::Open;
            self.open_count.fetch_add(1, Ordering::SeqCst);
            warn!(failures, "circuit breaker opened");
        }
    }

    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub async fn reset(&self) {
        *self.state.write().await = CircuitBreakerState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        *self.last_failure_time.write().await = None;
        info!("circuit breaker manually reset");
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BookMessage {
    asset_id: String,
    #[serde(default)]
    bids: Vec<PriceLevel>,
    #[serde(default)]
    asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, Deserialize)]
struct PriceLevel {
    price: String,
    size: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UserEventMessage {
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default, rename = "type")]
    event_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct MarketSubscribeRequest {
    #[serde(rename = "type")]
    msg_type: String,
    assets_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct UserSubscribeRequest {
    #[serde(rename = "type")]
    msg_type: String,
    auth: UserSubscribeAuth,
    markets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct UserSubscribeAuth {
    #[serde(rename = "apiKey")]
    api_key: String,
    secret: String,
    passphrase: String,
}

/// A fresh book snapshot for one token, ready to replace the cache entry.
#[derive(Debug, Clone)]
pub struct BookUpdate {
    pub token_id: String,
    pub book: Book,
}

/// Maker venue user-channel event; a hint to re-poll, not a fill source.
#[derive(Debug, Clone)]
pub struct UserEvent {
    pub token_id: Option<String>,
    pub order_id: Option<String>,
    pub event_type: Option<String>,
}

pub struct PolymarketWebSocket {
    ws_url: String,
    token_ids: Arc<RwLock<Vec<String>>>,
    user_auth: Option<UserSubscribeAuth>,
    book_tx: broadcast::Sender<BookUpdate>,
    user_tx: broadcast::Sender<UserEvent>,
    reconnect_delay: Duration,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl PolymarketWebSocket {
    pub fn new(ws_url: &str) -> Self {
        Self::with_circuit_breaker(ws_url, CircuitBreakerConfig::default())
    }

    pub fn with_circuit_breaker(ws_url: &str, cb_config: CircuitBreakerConfig) -> Self {
        let (book_tx, _) = broadcast::channel(1024);
        let (user_tx, _) = broadcast::channel(256);
        Self {
            ws_url: ws_url.to_string(),
            token_ids: Arc::new(RwLock::new(Vec::new())),
            user_auth: None,
            book_tx,
            user_tx,
            reconnect_delay: Duration::from_secs(1),
            circuit_breaker: Arc::new(CircuitBreaker::new(cb_config)),
        }
    }

    /// Enable the `"user"` channel subscription alongside book deltas.
    pub fn with_user_auth(mut self, api_key: String, secret: String, passphrase: String) -> Self {
        self.user_auth = Some(UserSubscribeAuth { api_key, secret, passphrase });
        self
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.circuit_breaker)
    }

    pub fn subscribe_books(&self) -> broadcast::Receiver<BookUpdate> {
        self.book_tx.subscribe()
    }

    pub fn subscribe_user_events(&self) -> broadcast::Receiver<UserEvent> {
        self.user_tx.subscribe()
    }

    pub async fn add_token(&self, token_id: &str) {
        let mut ids = self.token_ids.write().await;
        if !ids.iter().any(|t| t == token_id) {
            ids.push(token_id.to_string());
        }
    }

    /// Reconnect loop with exponential backoff and circuit breaking, run as a
    /// long-lived background task until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        let max_delay = Duration::from_secs(60);
        let circuit_open_delay = Duration::from_secs(5);
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_shutdown_requested() {
                return;
            }

            if !self.circuit_breaker.should_allow().await {
                tokio::select! {
                    _ = tokio::time::sleep(circuit_open_delay) => {}
                    _ = shutdown.wait_for_shutdown() => return,
                }
                continue;
            }

            let result = tokio::select! {
                r = self.connect_and_subscribe() => r,
                _ = shutdown.wait_for_shutdown() => {
                    info!("maker websocket stopping on shutdown");
                    return;
                }
            };

            match result {
                Ok(()) => {
                    self.circuit_breaker.record_success().await;
                    info!("maker websocket closed, reconnecting");
                    attempt = 0;
                }
                Err(e) => {
                    self.circuit_breaker.record_failure().await;
                    attempt = attempt.saturating_add(1);
                    error!(attempt, error = %e, "maker websocket error");

                    let delay = (self.reconnect_delay * attempt.min(10)).min(max_delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait_for_shutdown() => return,
                    }
                }
            }
        }
    }

    async fn connect_and_subscribe(&self) -> Result<()> {
        let url = Url::parse(&self.ws_url)
            .map_err(|e| EngineError::Config(format!("invalid maker WS URL: {}", e)))?;

        let (ws_stream, _) = timeout(Duration::from_secs(10), connect_async(url.as_str()))
            .await
            .map_err(|_| EngineError::Timeout(Duration::from_secs(10)))??;

        info!("maker websocket connected");
        let (mut write, mut read) = ws_stream.split();

        let token_ids = self.token_ids.read().await.clone();
        if !token_ids.is_empty() {
            let subscribe = MarketSubscribeRequest {
                msg_type: "MARKET".to_string(),
                assets_ids: token_ids.clone(),
            };
            write.send(Message::Text(serde_json::to_string(&subscribe)?)).await?;
            info!(count = token_ids.len(), "subscribed to maker book channel");
        }

        if let Some(auth) = &self.user_auth {
            let subscribe = UserSubscribeRequest {
                msg_type: "USER".to_string(),
                auth: auth.clone(),
                markets: token_ids.clone(),
            };
            write.send(Message::Text(serde_json::to_string(&subscribe)?)).await?;
            info!("subscribed to maker user channel");
        }

        let mut ping_interval = interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text).await,
                        Some(Ok(Message::Ping(data))) => { write.send(Message::Pong(data)).await?; }
                        Some(Ok(Message::Close(_))) => {
                            info!("maker websocket received close frame");
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                        _ => {}
                    }
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(vec![])).await?;
                }
            }
        }
    }

    async fn handle_message(&self, text: &str) {
        if let Ok(books) = serde_json::from_str::<Vec<BookMessage>>(text) {
            for book in books {
                self.process_book_message(book);
            }
            return;
        }
        if let Ok(book) = serde_json::from_str::<BookMessage>(text) {
            self.process_book_message(book);
            return;
        }
        if let Ok(event) = serde_json::from_str::<UserEventMessage>(text) {
            if event.order_id.is_some() || event.event_type.is_some() {
                let _ = self.user_tx.send(UserEvent {
                    token_id: event.asset_id,
                    order_id: event.order_id,
                    event_type: event.event_type,
                });
                return;
            }
        }
        debug!(preview = &text[..text.len().min(200)], "unrecognized maker ws message");
    }

    fn process_book_message(&self, msg: BookMessage) {
        let bids = parse_levels(&msg.bids);
        let asks = parse_levels(&msg.asks);

        let mut book = Book::new(msg.asset_id.clone(), BookSource::Ws);
        book.set_levels(bids, asks, BookSource::Ws);

        let _ = self.book_tx.send(BookUpdate { token_id: msg.asset_id, book });
    }
}

fn parse_levels(levels: &[PriceLevel]) -> Vec<Level> {
    levels
        .iter()
        .filter_map(|l| {
            let price: Decimal = l.price.parse().ok()?;
            let size: Decimal = l.size.parse().ok()?;
            Some(Level { price, size })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn circuit_breaker_initial_state() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.get_state().await, CircuitBreakerState::Closed);
        assert!(cb.should_allow().await);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout_secs: 60,
            success_threshold: 2,
        });
        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.get_state().await, CircuitBreakerState::Open);
        assert!(!cb.should_allow().await);
        assert_eq!(cb.open_count(), 1);
    }

    #[test]
    fn book_message_parses_into_domain_book() {
        let msg = BookMessage {
            asset_id: "tok".to_string(),
            bids: vec![PriceLevel { price: "0.40".into(), size: "10".into() }],
            asks: vec![PriceLevel { price: "0.45".into(), size: "5".into() }],
        };
        let bids = parse_levels(&msg.bids);
        let asks = parse_levels(&msg.asks);
        assert_eq!(bids.len(), 1);
        assert_eq!(asks.len(), 1);
    }
}
