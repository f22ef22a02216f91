//! Dashboard wire channel (§5, §6, §9): an opaque JSON event stream for the
//! out-of-scope frontend. This module owns only the publish/subscribe
//! primitive and the WebSocket transport — payload shapes for `opportunity`,
//! `stats`, `markets`, `tasks`, `sports`, `closeOpportunities`, and
//! `accounts` are handed in as-built `serde_json::Value`s by the runtime;
//! this module never interprets them.
//!
//! Two delivery modes, matching §5's backpressure contract:
//! - **Coalesced channels** (`publish`) keep only the latest payload per
//!   channel between flushes and are drained on a fixed 200ms tick — a
//!   snapshot-style channel never needs to deliver every intermediate state.
//! - **Lifecycle events** (`emit_event`) are delivered as they happen:
//!   `taskEvent`, `bscOrderFilled`, `exposureAlert`.
//!
//! A consumer that falls behind a lagging broadcast receiver beyond
//! `DRAIN_TIMEOUT * MAX_TIMEOUT_COUNT` is disconnected rather than left to
//! buffer unboundedly.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Flush cadence for coalesced (dirty-flag) channels (§5).
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(200);
/// A stalled send on a single flush is allowed this long before counting
/// against `MAX_TIMEOUT_COUNT`.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Consecutive drain timeouts before a consumer is disconnected.
pub const MAX_TIMEOUT_COUNT: u32 = 5;
/// `sendOpportunityBatches` pagination threshold (§5): payloads with more
/// than this many items are split across multiple frames.
pub const OPPORTUNITY_BATCH_SIZE: usize = 200;

/// One frame delivered to a WS consumer: a named channel plus its JSON body.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardFrame {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Coalescing publish/subscribe hub plus the lifecycle-event broadcast.
///
/// Modeled as `{dirty_set, latest_payload_per_channel, tick}` per §9's design
/// note: `publish` only ever records the *latest* value for a channel; the
/// flush loop is solely responsible for turning that into outbound frames.
pub struct Dashboard {
    latest: DashMap<String, serde_json::Value>,
    dirty: DashMap<String, ()>,
    flush_tx: broadcast::Sender<DashboardFrame>,
    event_tx: broadcast::Sender<DashboardFrame>,
    api_token: Option<String>,
}

impl Dashboard {
    pub fn new(api_token: Option<String>) -> Arc<Self> {
        let (flush_tx, _) = broadcast::channel(1024);
        let (event_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            latest: DashMap::new(),
            dirty: DashMap::new(),
            flush_tx,
            event_tx,
            api_token,
        })
    }

    /// Record `payload` as the latest value for `channel`; delivered on the
    /// next 200ms flush tick, superseding anything not yet flushed.
    pub fn publish(&self, channel: &str, payload: serde_json::Value) {
        self.latest.insert(channel.to_string(), payload);
        self.dirty.insert(channel.to_string(), ());
    }

    /// `opportunity` channel convenience: pages a snapshot into
    /// `OPPORTUNITY_BATCH_SIZE`-sized frames instead of one unbounded array.
    pub fn publish_opportunity_batches<T: Serialize>(&self, items: &[T]) {
        if items.is_empty() {
            self.publish("opportunity", serde_json::json!([]));
            return;
        }
        for (page_index, chunk) in items.chunks(OPPORTUNITY_BATCH_SIZE).enumerate() {
            let channel = format!("opportunity#{page_index}");
            match serde_json::to_value(chunk) {
                Ok(payload) => self.publish(&channel, payload),
                Err(e) => warn!(error = %e, "failed to serialize opportunity batch"),
            }
        }
    }

    /// Deliver a lifecycle event immediately, bypassing coalescing.
    /// `taskEvent`, `bscOrderFilled`, `exposureAlert` (§6).
    pub fn emit_event(&self, channel: &str, payload: serde_json::Value) {
        let _ = self.event_tx.send(DashboardFrame { channel: channel.to_string(), payload });
    }

    fn subscribe_flush(&self) -> broadcast::Receiver<DashboardFrame> {
        self.flush_tx.subscribe()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DashboardFrame> {
        self.event_tx.subscribe()
    }

    /// Background loop: every [`FLUSH_INTERVAL`], drain the dirty set and
    /// broadcast one frame per dirty channel.
    pub async fn run_flush_loop(self: Arc<Self>, mut shutdown: crate::coordination::ShutdownToken) {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush_once(),
                _ = shutdown.wait_for_shutdown() => {
                    debug!("dashboard flush loop stopping on shutdown");
                    break;
                }
            }
        }
    }

    fn flush_once(&self) {
        let dirty_channels: Vec<String> = self.dirty.iter().map(|e| e.key().clone()).collect();
        for channel in dirty_channels {
            self.dirty.remove(&channel);
            if let Some(payload) = self.latest.get(&channel) {
                let _ = self.flush_tx.send(DashboardFrame {
                    channel: channel.clone(),
                    payload: payload.clone(),
                });
            }
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.api_token else {
            return true;
        };
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_start_matches("Bearer ").trim() == expected)
            .unwrap_or(false)
    }

    pub async fn run_server(self: Arc<Self>, port: u16) -> crate::Result<()> {
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        info!("starting dashboard server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::EngineError::Transport(format!("dashboard server error: {}", e)))?;
        Ok(())
    }
}

async fn ws_handler(
    State(dashboard): State<Arc<Dashboard>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !dashboard.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, dashboard))
}

async fn handle_socket(mut socket: WebSocket, dashboard: Arc<Dashboard>) {
    let mut flush_rx = dashboard.subscribe_flush();
    let mut event_rx = dashboard.subscribe_events();
    let mut timeout_count: u32 = 0;

    loop {
        let frame = tokio::select! {
            f = flush_rx.recv() => f,
            f = event_rx.recv() => f,
        };

        let frame = match frame {
            Ok(f) => f,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "dashboard consumer lagging, skipping missed frames");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let text = match serde_json::to_string(&frame) {
            Ok(t) => t,
            Err(_) => continue,
        };

        match tokio::time::timeout(DRAIN_TIMEOUT, socket.send(Message::Text(text))).await {
            Ok(Ok(())) => timeout_count = 0,
            Ok(Err(_)) => return,
            Err(_) => {
                timeout_count += 1;
                if timeout_count >= MAX_TIMEOUT_COUNT {
                    warn!("dashboard consumer exceeded drain timeout budget, disconnecting");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_marks_dirty_and_flush_clears_it() {
        let dashboard = Dashboard::new(None);
        dashboard.publish("stats", serde_json::json!({"n": 1}));
        assert_eq!(dashboard.dirty.len(), 1);
        dashboard.flush_once();
        assert_eq!(dashboard.dirty.len(), 0);
        assert_eq!(dashboard.latest.get("stats").unwrap().clone(), serde_json::json!({"n": 1}));
    }

    #[test]
    fn republish_before_flush_coalesces_to_latest() {
        let dashboard = Dashboard::new(None);
        dashboard.publish("stats", serde_json::json!({"n": 1}));
        dashboard.publish("stats", serde_json::json!({"n": 2}));
        dashboard.flush_once();
        assert_eq!(dashboard.latest.get("stats").unwrap().clone(), serde_json::json!({"n": 2}));
    }

    #[test]
    fn authorized_without_token_configured_always_passes() {
        let dashboard = Dashboard::new(None);
        assert!(dashboard.authorized(&HeaderMap::new()));
    }

    #[test]
    fn authorized_rejects_missing_bearer_when_token_configured() {
        let dashboard = Dashboard::new(Some("secret".to_string()));
        assert!(!dashboard.authorized(&HeaderMap::new()));
    }
}
