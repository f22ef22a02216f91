//! Exposure monitor (§4.8): periodically sums un-hedged quantity across every
//! non-terminal task and escalates once it clears [`ExposureConfig::threshold_shares`].
//!
//! The 30-second default period is deliberate: a hedge that is mid-flight
//! (order placed, fill not yet reconciled) briefly looks like exposure, and a
//! tighter loop would raise alerts on timing rather than on a real gap.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExposureConfig;
use crate::coordination::ShutdownToken;
use crate::store::TaskStore;
use crate::supervisor::AlertManager;

/// One exposure sweep's result: total un-hedged quantity and whether it
/// breached the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureSnapshot {
    pub total_unhedged: Decimal,
    pub breached: bool,
}

pub struct ExposureMonitor {
    store: Arc<TaskStore>,
    alerts: Arc<AlertManager>,
    config: ExposureConfig,
}

impl ExposureMonitor {
    pub fn new(store: Arc<TaskStore>, alerts: Arc<AlertManager>, config: ExposureConfig) -> Self {
        Self { store, alerts, config }
    }

    /// Sum `predict_filled_qty - hedged_qty` over every non-terminal task.
    /// Terminal tasks carry no live exposure regardless of their final
    /// `hedged_qty` — a `HEDGE_FAILED` task's unhedged remainder is already
    /// surfaced through its own terminal alert, not re-summed here.
    pub fn sweep(&self) -> ExposureSnapshot {
        let total: Decimal = self
            .store
            .list()
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| (t.predict_filled_qty - t.hedged_qty).max(Decimal::ZERO))
            .sum();

        let breached = total > self.config.threshold_shares;
        ExposureSnapshot { total_unhedged: total, breached }
    }

    async fn sweep_and_alert(&self) -> ExposureSnapshot {
        let snapshot = self.sweep();
        if snapshot.breached {
            warn!(
                total_unhedged = %snapshot.total_unhedged,
                threshold = %self.config.threshold_shares,
                "exposure threshold breached"
            );
            self.alerts
                .exposure_breach(
                    &snapshot.total_unhedged.to_string(),
                    &self.config.threshold_shares.to_string(),
                )
                .await;
        } else {
            debug!(total_unhedged = %snapshot.total_unhedged, "exposure sweep clean");
        }
        snapshot
    }

    /// Background loop: sweep every `config.check_ms`, stopping on shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.check_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_and_alert().await;
                }
                _ = shutdown.wait_for_shutdown() => {
                    debug!("exposure monitor stopping on shutdown");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Side, Strategy, TaskInput, TaskStatus, TaskType};
    use crate::supervisor::AlertManagerConfig;
    use rust_decimal_macros::dec;

    async fn store() -> Arc<TaskStore> {
        let dir = std::env::temp_dir().join(format!("xvenue-exposure-{}", uuid::Uuid::new_v4()));
        TaskStore::open(dir).await.unwrap()
    }

    fn input(market_id: &str) -> TaskInput {
        TaskInput {
            market_id: market_id.to_string(),
            task_type: TaskType::Buy,
            strategy: Strategy::Maker,
            arb_side: Side::Yes,
            quantity: dec!(10),
            predict_price: dec!(0.42),
            hedge_price_limit: dec!(0.56),
            entry_cost: None,
            predict_ask_price: None,
            max_total_cost: None,
            predict_bid_price: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn clean_sweep_below_threshold() {
        let store = store().await;
        let task = store.create(input("m1")).unwrap();
        store
            .update(&task.id, |t| {
                let now = chrono::Utc::now();
                t.apply_predict_fill(dec!(3), now).unwrap();
                let _ = t.transition(TaskStatus::PartiallyFilled, "fill", now);
            })
            .unwrap();

        let monitor = ExposureMonitor::new(
            store,
            Arc::new(AlertManager::new(AlertManagerConfig::default())),
            ExposureConfig { threshold_shares: dec!(10), check_ms: 30_000 },
        );
        let snapshot = monitor.sweep();
        assert_eq!(snapshot.total_unhedged, dec!(3));
        assert!(!snapshot.breached);
    }

    #[tokio::test]
    async fn breach_detected_above_threshold() {
        let store = store().await;
        let task = store.create(input("m1")).unwrap();
        store
            .update(&task.id, |t| {
                let now = chrono::Utc::now();
                t.apply_predict_fill(dec!(15), now).unwrap();
                let _ = t.transition(TaskStatus::PartiallyFilled, "fill", now);
            })
            .unwrap();

        let monitor = ExposureMonitor::new(
            store,
            Arc::new(AlertManager::new(AlertManagerConfig::default())),
            ExposureConfig { threshold_shares: dec!(10), check_ms: 30_000 },
        );
        let snapshot = monitor.sweep();
        assert_eq!(snapshot.total_unhedged, dec!(15));
        assert!(snapshot.breached);
    }

    #[tokio::test]
    async fn terminal_tasks_excluded_from_sweep() {
        let store = store().await;
        let task = store.create(input("m1")).unwrap();
        store
            .update(&task.id, |t| {
                let now = chrono::Utc::now();
                t.apply_predict_fill(dec!(15), now).unwrap();
                let _ = t.transition(TaskStatus::PartiallyFilled, "fill", now);
                let _ = t.transition(TaskStatus::Failed, "abandoned", now);
            })
            .unwrap();

        let monitor = ExposureMonitor::new(
            store,
            Arc::new(AlertManager::new(AlertManagerConfig::default())),
            ExposureConfig { threshold_shares: dec!(10), check_ms: 30_000 },
        );
        assert_eq!(monitor.sweep().total_unhedged, Decimal::ZERO);
    }
}
