//! Delayed-settlement verification (§4.7.5): a cancelled maker order can
//! still settle on-chain minutes later. Six probes, five seconds apart,
//! watch for predict-side fill arriving *after* the task stopped, and hedge
//! it at a widened tolerance if so.
//!
//! Deliberately spawned independent of the task's own [`super::TaskCancelWatch`]
//! — it exists precisely because the task was cancelled, so it must only stop
//! on process shutdown, never on the per-task cancel that triggered it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{OrderSide, TaskType};

use super::context::ExecutorContext;
use super::hedging::hedge_incremental;

const PROBE_COUNT: u32 = 6;
const PROBE_INTERVAL: Duration = Duration::from_secs(5);
/// Widened beyond the task's normal hedge price limit (§4.7.5): a late,
/// unexpected fill is worth hedging even a little worse than usual rather
/// than left fully exposed.
const WIDENED_TOLERANCE: Decimal = dec!(0.02);

pub fn spawn_delayed_verification(ctx: Arc<ExecutorContext>, task_id: String, baseline_filled_qty: Decimal) {
    tokio::spawn(async move {
        let mut shutdown = ctx.shutdown.token();

        for probe in 1..=PROBE_COUNT {
            tokio::select! {
                _ = tokio::time::sleep(PROBE_INTERVAL) => {}
                _ = shutdown.wait_for_shutdown() => {
                    info!(task_id, "delayed-fill verification stopped by process shutdown");
                    return;
                }
            }

            let Some(task) = ctx.store.get(&task_id) else {
                return;
            };
            let Some(hash) = task.current_order_hash.clone() else {
                return;
            };

            // The cancelled maker order can keep settling at the venue after
            // the run loop exited, so the stored `predict_filled_qty` is
            // stale — re-query the venue's own view of the order directly.
            let live_filled = match ctx.maker.get_order(&hash).await {
                Ok(Some(status)) => status.filled_qty,
                Ok(None) => {
                    warn!(task_id, hash, "order missing at venue during delayed-fill probe");
                    continue;
                }
                Err(e) => {
                    warn!(task_id, error = %e, "delayed-fill probe failed to query order status");
                    continue;
                }
            };

            let late_fill = live_filled - baseline_filled_qty;
            if late_fill <= Decimal::ZERO {
                continue;
            }

            warn!(
                task_id,
                probe,
                %late_fill,
                "late predict fill observed after cancellation, hedging at widened tolerance"
            );

            let _ = ctx.store.update(&task_id, |t| {
                let now = chrono::Utc::now();
                let _ = t.apply_predict_fill(live_filled, now);
            });

            // Hedging a `side` position lifts the same-direction order on the
            // complementary outcome (see `executor::run::maybe_hedge`).
            let hedge_side = match task.task_type {
                TaskType::Buy => OrderSide::Buy,
                TaskType::Sell => OrderSide::Sell,
            };
            let widened_limit = task.hedge_price_limit + WIDENED_TOLERANCE;
            let token_id = format!("{}:{}", task.market_id, task.arb_side.opposite().as_str());

            match hedge_incremental(&ctx, &task, &token_id, hedge_side, late_fill, widened_limit).await {
                Ok((filled, price)) => {
                    let _ = ctx.store.update(&task_id, |t| {
                        let now = chrono::Utc::now();
                        t.apply_hedge_fill(filled, price, now);
                    });
                    info!(task_id, %filled, %price, "delayed-fill hedge settled");
                }
                Err(e) => {
                    ctx.alerts
                        .hedge_failed(&task_id, &late_fill.to_string())
                        .await;
                    warn!(task_id, error = %e, "delayed-fill hedge attempt failed");
                }
            }
            return;
        }

        info!(task_id, "delayed-fill verification window elapsed with no late fill");
    });
}
