//! Alert Manager
//!
//! Routes alerts based on severity to a configured [`AlertSink`], with rate
//! limiting to prevent alert storms from a flapping guard or stuck task.

use crate::notify::AlertSink;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    /// Informational - log only
    Info,
    /// Warning - notify
    Warning,
    /// Error - notify, task likely paused
    Error,
    /// Critical - notify, manual intervention required
    Critical,
}

impl AlertLevel {
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "\u{2139}\u{fe0f}",
            AlertLevel::Warning => "\u{26a0}\u{fe0f}",
            AlertLevel::Error => "\u{274c}",
            AlertLevel::Critical => "\u{1f6a8}",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub component: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, component: &str, title: &str, message: &str) -> Self {
        Self {
            level,
            component: component.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn format_text(&self) -> String {
        format!(
            "{} {}\ncomponent: {}\ntime: {}\n\n{}",
            self.level.emoji(),
            self.title,
            self.component,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        )
    }
}

#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    pub rate_limit_secs: u64,
    pub notify_info: bool,
    pub max_alerts_per_minute: u32,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 60,
            notify_info: false,
            max_alerts_per_minute: 10,
        }
    }
}

#[derive(Debug)]
struct RateLimitState {
    last_sent: DateTime<Utc>,
    suppressed_count: u32,
}

/// Coordinates alert delivery for the pause/exposure/hedge-failure alerts
/// raised by the executor and exposure monitor (§4.7.7, §5).
pub struct AlertManager {
    config: AlertManagerConfig,
    sink: Option<Arc<dyn AlertSink>>,
    rate_limits: Arc<RwLock<HashMap<String, RateLimitState>>>,
    alerts_this_minute: Arc<RwLock<Vec<DateTime<Utc>>>>,
    event_tx: tokio::sync::broadcast::Sender<Alert>,
}

impl AlertManager {
    pub fn new(config: AlertManagerConfig) -> Self {
        let (event_tx, _) = tokio::sync::broadcast::channel(64);
        Self {
            config,
            sink: None,
            rate_limits: Arc::new(RwLock::new(HashMap::new())),
            alerts_this_minute: Arc::new(RwLock::new(Vec::new())),
            event_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AlertManagerConfig::default())
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Alert> {
        self.event_tx.subscribe()
    }

    fn rate_limit_key(alert: &Alert) -> String {
        format!("{}:{}:{}", alert.component, alert.level, alert.title)
    }

    async fn should_rate_limit(&self, alert: &Alert) -> bool {
        let key = Self::rate_limit_key(alert);
        let now = Utc::now();

        let mut limits = self.rate_limits.write().await;

        if let Some(state) = limits.get_mut(&key) {
            let elapsed = now.signed_duration_since(state.last_sent).num_seconds() as u64;
            if elapsed < self.config.rate_limit_secs {
                state.suppressed_count += 1;
                debug!(
                    "rate limiting alert '{}' ({} suppressed)",
                    alert.title, state.suppressed_count
                );
                return true;
            }
            state.last_sent = now;
            state.suppressed_count = 0;
        } else {
            limits.insert(
                key,
                RateLimitState {
                    last_sent: now,
                    suppressed_count: 0,
                },
            );
        }

        false
    }

    async fn is_throttled(&self) -> bool {
        let now = Utc::now();
        let minute_ago = now - chrono::Duration::minutes(1);

        let mut alerts = self.alerts_this_minute.write().await;
        alerts.retain(|t| *t > minute_ago);

        if alerts.len() >= self.config.max_alerts_per_minute as usize {
            warn!(
                "alert throttling: {} alerts in last minute (max: {})",
                alerts.len(),
                self.config.max_alerts_per_minute
            );
            return true;
        }

        alerts.push(now);
        false
    }

    pub async fn alert(&self, alert: Alert) {
        let _ = self.event_tx.send(alert.clone());

        match alert.level {
            AlertLevel::Info => info!("[{}] {}: {}", alert.component, alert.title, alert.message),
            AlertLevel::Warning => {
                warn!("[{}] {}: {}", alert.component, alert.title, alert.message)
            }
            AlertLevel::Error => {
                error!("[{}] {}: {}", alert.component, alert.title, alert.message)
            }
            AlertLevel::Critical => error!(
                "CRITICAL [{}] {}: {}",
                alert.component, alert.title, alert.message
            ),
        }

        let should_notify = match alert.level {
            AlertLevel::Info => self.config.notify_info,
            AlertLevel::Warning | AlertLevel::Error | AlertLevel::Critical => true,
        };
        if !should_notify {
            return;
        }
        if self.should_rate_limit(&alert).await || self.is_throttled().await {
            return;
        }

        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.send(&alert.format_text()).await {
                error!("failed to deliver alert: {}", e);
            }
        }
    }

    pub async fn info(&self, component: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Info, component, title, message))
            .await;
    }

    pub async fn warning(&self, component: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Warning, component, title, message))
            .await;
    }

    pub async fn error(&self, component: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Error, component, title, message))
            .await;
    }

    pub async fn critical(&self, component: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Critical, component, title, message))
            .await;
    }

    /// Price/depth guard tripped and the maker order was cancelled (§4.7.6).
    pub async fn task_paused(&self, task_id: &str, market_id: &str, reason: &str) {
        self.alert(
            Alert::new(
                AlertLevel::Warning,
                "executor",
                "Task paused",
                &format!("task {} on {} paused: {}", task_id, market_id, reason),
            )
            .with_metadata(serde_json::json!({ "task_id": task_id, "market_id": market_id })),
        )
        .await;
    }

    /// Hedge retries exhausted with unhedged quantity remaining (§4.7.4).
    pub async fn hedge_failed(&self, task_id: &str, remaining_qty: &str) {
        self.alert(
            Alert::new(
                AlertLevel::Critical,
                "executor",
                "Hedge failed",
                &format!(
                    "task {} exhausted hedge retries with {} shares unhedged",
                    task_id, remaining_qty
                ),
            )
            .with_metadata(serde_json::json!({ "task_id": task_id })),
        )
        .await;
    }

    /// Exposure sweep found unhedged quantity above the configured threshold (§5).
    pub async fn exposure_breach(&self, total_unhedged: &str, threshold: &str) {
        self.alert(
            Alert::new(
                AlertLevel::Critical,
                "exposure_monitor",
                "Exposure threshold breached",
                &format!(
                    "total unhedged quantity {} exceeds threshold {}",
                    total_unhedged, threshold
                ),
            )
            .with_metadata(serde_json::json!({ "total_unhedged": total_unhedged })),
        )
        .await;
    }

    pub async fn get_suppressed_counts(&self) -> HashMap<String, u32> {
        let limits = self.rate_limits.read().await;
        limits
            .iter()
            .filter(|(_, state)| state.suppressed_count > 0)
            .map(|(key, state)| (key.clone(), state.suppressed_count))
            .collect()
    }

    pub async fn reset_rate_limits(&self) {
        let mut limits = self.rate_limits.write().await;
        limits.clear();
        debug!("alert rate limits reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_level_ordering() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Error);
        assert!(AlertLevel::Error < AlertLevel::Critical);
    }

    #[test]
    fn alert_format_includes_component_and_message() {
        let alert = Alert::new(AlertLevel::Warning, "test_component", "Test Alert", "msg");
        let formatted = alert.format_text();
        assert!(formatted.contains("Test Alert"));
        assert!(formatted.contains("test_component"));
        assert!(formatted.contains("msg"));
    }

    #[tokio::test]
    async fn rate_limiting_suppresses_repeat_alerts() {
        let manager = AlertManager::new(AlertManagerConfig {
            rate_limit_secs: 60,
            ..Default::default()
        });
        let alert = Alert::new(AlertLevel::Warning, "test", "Test", "Message");
        assert!(!manager.should_rate_limit(&alert).await);
        assert!(manager.should_rate_limit(&alert).await);
    }
}
