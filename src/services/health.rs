//! Health check HTTP server for process supervision and a Prometheus endpoint.

use crate::services::Metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Shared state for the health server, updated by the order-book cache and
/// executor as they observe WS connectivity and store writes (§4.1).
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    pub maker_ws_connected: AtomicBool,
    pub last_maker_ws_message: RwLock<Option<DateTime<Utc>>>,
    pub hedge_ws_connected: AtomicBool,
    pub last_hedge_ws_message: RwLock<Option<DateTime<Utc>>>,
    pub store_writable: AtomicBool,
    pub last_store_write: RwLock<Option<DateTime<Utc>>>,
    pub metrics: Option<Arc<Metrics>>,
    pub quote_staleness_threshold_secs: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            maker_ws_connected: AtomicBool::new(false),
            last_maker_ws_message: RwLock::new(None),
            hedge_ws_connected: AtomicBool::new(false),
            last_hedge_ws_message: RwLock::new(None),
            store_writable: AtomicBool::new(true),
            last_store_write: RwLock::new(None),
            metrics: None,
            quote_staleness_threshold_secs: 30,
        }
    }

    pub fn with_metrics(mut self, m: Arc<Metrics>) -> Self {
        self.metrics = Some(m);
        self
    }

    pub fn set_maker_ws_connected(&self, connected: bool) {
        self.maker_ws_connected.store(connected, Ordering::SeqCst);
    }

    pub async fn record_maker_ws_message(&self) {
        *self.last_maker_ws_message.write().await = Some(Utc::now());
        self.maker_ws_connected.store(true, Ordering::SeqCst);
    }

    pub fn set_hedge_ws_connected(&self, connected: bool) {
        self.hedge_ws_connected.store(connected, Ordering::SeqCst);
    }

    pub async fn record_hedge_ws_message(&self) {
        *self.last_hedge_ws_message.write().await = Some(Utc::now());
        self.hedge_ws_connected.store(true, Ordering::SeqCst);
    }

    pub async fn record_store_write(&self, success: bool) {
        *self.last_store_write.write().await = Some(Utc::now());
        self.store_writable.store(success, Ordering::SeqCst);
    }

    async fn is_stale(&self, last: &RwLock<Option<DateTime<Utc>>>) -> bool {
        match *last.read().await {
            Some(last) => (Utc::now() - last).num_seconds() as u64 > self.quote_staleness_threshold_secs,
            None => true,
        }
    }

    pub async fn get_health(&self) -> HealthResponse {
        let mut components = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        for (name, connected_flag, last_msg) in [
            (
                "maker_websocket",
                &self.maker_ws_connected,
                &self.last_maker_ws_message,
            ),
            (
                "hedge_websocket",
                &self.hedge_ws_connected,
                &self.last_hedge_ws_message,
            ),
        ] {
            let connected = connected_flag.load(Ordering::SeqCst);
            let stale = self.is_stale(last_msg).await;
            let status = if connected && !stale {
                HealthStatus::Healthy
            } else if connected && stale {
                HealthStatus::Degraded
            } else {
                HealthStatus::Unhealthy
            };
            if status != HealthStatus::Healthy {
                overall_status = status.max_severity(overall_status);
            }
            components.push(ComponentHealth {
                name: name.to_string(),
                status,
                message: if stale {
                    Some("book feed is stale".to_string())
                } else if !connected {
                    Some("disconnected".to_string())
                } else {
                    None
                },
                last_check: *last_msg.read().await,
            });
        }

        let store_ok = self.store_writable.load(Ordering::SeqCst);
        let store_status = if store_ok {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        overall_status = store_status.max_severity(overall_status);
        components.push(ComponentHealth {
            name: "task_store".to_string(),
            status: store_status,
            message: if store_ok {
                None
            } else {
                Some("last persistence write failed".to_string())
            },
            last_check: *self.last_store_write.read().await,
        });

        HealthResponse {
            status: overall_status,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds() as u64,
            components,
        }
    }
}

impl HealthStatus {
    fn rank(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }

    fn max_severity(self, other: Self) -> Self {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    pub async fn run(&self) -> crate::Result<()> {
        let state = Arc::clone(&self.state);

        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::EngineError::Transport(format!("health server error: {}", e)))?;

        Ok(())
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let prometheus_body = state
        .metrics
        .as_ref()
        .map(|m| m.prometheus())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        prometheus_body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_state_is_unhealthy_until_connected() {
        let state = HealthState::new();
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn connected_feeds_report_healthy() {
        let state = HealthState::new();
        state.record_maker_ws_message().await;
        state.record_hedge_ws_message().await;
        let health = state.get_health().await;
        assert!(health.status.is_healthy());
    }

    #[tokio::test]
    async fn failed_store_write_marks_unhealthy() {
        let state = HealthState::new();
        state.record_maker_ws_message().await;
        state.record_hedge_ws_message().await;
        state.record_store_write(false).await;
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
