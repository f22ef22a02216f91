//! The per-task run loop: one `tokio::select!` driving submission, the
//! price/depth guards, fill reconciliation, and hedging for a single task
//! from `Pending` through to a terminal status.
//!
//! Three logical "sub-scopes" are named in the design (price guard, depth
//! guard, fill watch) but they share one mutable loop rather than three
//! separately spawned tasks — matching the single `select!`-loop style
//! already used by [`crate::adapters::ChainFillWatcher::run`] and
//! [`crate::cache::OrderStatusCache::run`] elsewhere in this codebase.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::adapters::onchain_indexer::ChainFill;
use crate::cache::MaybeCompleted;
use crate::domain::{OrderRequest, OrderSide, Task, TaskStatus, TaskType, VenueOrderState};
use crate::error::{EngineError, Result};
use crate::exchange::PlaceOpts;

use super::cancel::{CancelReason, TaskCancelWatch};
use super::context::ExecutorContext;
use super::guard::{depth_guard_decision, price_breached, DepthAction, DepthSignal};
use super::hedging::{hedge_incremental, is_dust, should_hedge_now};
use super::{delayed_fill, submission};

const DEPTH_COOLDOWN: Duration = Duration::from_secs(10);
const LIVE_TICK: Duration = Duration::from_secs(1);
const PAUSE_RESUME_TICK: Duration = Duration::from_secs(2);

enum LoopControl {
    Continue,
    Stop,
}

pub async fn run_task(ctx: Arc<ExecutorContext>, task_id: String, mut cancel: TaskCancelWatch) {
    loop {
        let Some(task) = ctx.store.get(&task_id) else {
            return;
        };
        if task.status.is_terminal() {
            return;
        }

        let control = match task.status {
            TaskStatus::Pending => handle_pending(&ctx, &task).await,
            TaskStatus::Paused => handle_paused(&ctx, &task_id, &mut cancel).await,
            TaskStatus::PredictSubmitted | TaskStatus::PartiallyFilled | TaskStatus::Hedging => {
                handle_live(&ctx, &task_id, &mut cancel).await
            }
            _ => LoopControl::Stop,
        };

        match control {
            LoopControl::Continue => continue,
            LoopControl::Stop => return,
        }
    }
}

async fn handle_pending(ctx: &Arc<ExecutorContext>, task: &Task) -> LoopControl {
    match submission::submit_order(ctx, task).await {
        Ok(_) => LoopControl::Continue,
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "order submission failed");
            let _ = ctx.store.update(&task.id, |t| {
                let now = chrono::Utc::now();
                let _ = t.transition(TaskStatus::Failed, e.to_string(), now);
            });
            LoopControl::Stop
        }
    }
}

/// §4.7.2/§4.7.3: re-check every [`PAUSE_RESUME_TICK`] whether the hedge
/// venue's price and depth have recovered enough to resubmit the maker
/// order. A user cancel or expiry ends the task outright from here too.
async fn handle_paused(ctx: &Arc<ExecutorContext>, task_id: &str, cancel: &mut TaskCancelWatch) -> LoopControl {
    let mut shutdown = ctx.shutdown.token();
    let mut ticker = tokio::time::interval(PAUSE_RESUME_TICK);

    loop {
        let Some(task) = ctx.store.get(task_id) else {
            return LoopControl::Stop;
        };
        if task.status != TaskStatus::Paused {
            return LoopControl::Continue;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if expired(&task) {
                    finish(ctx, task_id, TaskStatus::TimeoutCancelled, "expired while paused").await;
                    return LoopControl::Stop;
                }
                if clear_to_resume(ctx, &task).await {
                    let resubmitted = ctx.store.update(task_id, |t| {
                        let now = chrono::Utc::now();
                        t.current_order_hash = None;
                        let _ = t.transition(TaskStatus::Pending, "resuming after pause cleared", now);
                    });
                    if resubmitted.is_ok() {
                        info!(task_id, "price/depth cleared, resubmitting");
                        return LoopControl::Continue;
                    }
                }
            }
            reason = cancel.cancelled() => {
                apply_cancel(ctx, task_id, reason).await;
                return LoopControl::Stop;
            }
            _ = shutdown.wait_for_shutdown() => {
                // Already paused; nothing further to do for shutdown.
                return LoopControl::Stop;
            }
        }
    }
}

async fn clear_to_resume(ctx: &Arc<ExecutorContext>, task: &Task) -> bool {
    let hedge_side = task.arb_side.opposite();
    let token_id = format!("{}:{}", task.market_id, hedge_side.as_str());
    let Ok(Some(book)) = ctx.hedge.get_book(&token_id).await else {
        return false;
    };
    let Some(ask) = book.best_ask() else {
        return false;
    };
    !price_breached(ask.price, task.hedge_price_limit)
}

fn expired(task: &Task) -> bool {
    task.expires_at.map(|at| chrono::Utc::now() >= at).unwrap_or(false)
}

async fn finish(ctx: &Arc<ExecutorContext>, task_id: &str, status: TaskStatus, reason: &str) {
    let _ = ctx.store.update(task_id, |t| {
        let now = chrono::Utc::now();
        let _ = t.transition(status, reason.to_string(), now);
    });
}

async fn apply_cancel(ctx: &Arc<ExecutorContext>, task_id: &str, reason: CancelReason) {
    let Some(task) = ctx.store.get(task_id) else {
        return;
    };
    if let Some(hash) = task.current_order_hash.clone() {
        let _ = ctx.maker.cancel(&hash, Duration::from_secs(10)).await;
    }
    let baseline = task.predict_filled_qty;
    match reason {
        CancelReason::UserCancel => {
            finish(ctx, task_id, TaskStatus::Cancelled, "cancelled by user").await;
        }
        CancelReason::Expired => {
            finish(ctx, task_id, TaskStatus::TimeoutCancelled, "expired").await;
        }
        CancelReason::Shutdown => {
            finish(ctx, task_id, TaskStatus::Paused, "shutdown").await;
        }
    }
    if !matches!(reason, CancelReason::Shutdown) {
        delayed_fill::spawn_delayed_verification(ctx.clone(), task_id.to_string(), baseline);
    }
}

/// The live-order watch loop: covers `PredictSubmitted`, `PartiallyFilled`
/// and `Hedging`, all of which have a resting or recently-resting maker
/// order plus an ongoing hedge obligation.
async fn handle_live(ctx: &Arc<ExecutorContext>, task_id: &str, cancel: &mut TaskCancelWatch) -> LoopControl {
    let mut shutdown = ctx.shutdown.token();
    let mut ticker = tokio::time::interval(LIVE_TICK);
    let mut chain_fills = ctx.chain_fills.subscribe();
    let mut maybe_completed = ctx.order_status_cache.subscribe_maybe_completed();
    let mut depth_paused = false;
    let mut depth_last_change: Option<Instant> = None;

    loop {
        let Some(task) = ctx.store.get(task_id) else {
            return LoopControl::Stop;
        };
        if task.status.is_terminal() || task.status == TaskStatus::Paused {
            return LoopControl::Continue;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if expired(&task) {
                    apply_cancel(ctx, task_id, CancelReason::Expired).await;
                    return LoopControl::Stop;
                }
                match live_tick(ctx, task_id, &task, &mut depth_paused, &mut depth_last_change).await {
                    Ok(LoopControl::Continue) => {}
                    Ok(LoopControl::Stop) | Err(_) => return LoopControl::Stop,
                }
            }
            fill = chain_fills.recv() => {
                if let Ok(fill) = fill {
                    handle_chain_fill(ctx, &task, fill).await;
                }
            }
            mc = maybe_completed.recv() => {
                if let Ok(mc) = mc {
                    handle_maybe_completed(ctx, &task, mc).await;
                }
            }
            reason = cancel.cancelled() => {
                apply_cancel(ctx, task_id, reason).await;
                return LoopControl::Stop;
            }
            _ = shutdown.wait_for_shutdown() => {
                apply_cancel(ctx, task_id, CancelReason::Shutdown).await;
                return LoopControl::Stop;
            }
        }
    }
}

/// One second's worth of guard + fill-reconciliation work (§4.7.2-§4.7.4).
async fn live_tick(
    ctx: &Arc<ExecutorContext>,
    task_id: &str,
    task: &Task,
    depth_paused: &mut bool,
    depth_last_change: &mut Option<Instant>,
) -> Result<LoopControl> {
    reconcile_predict_fill(ctx, task).await;

    let Some(fresh) = ctx.store.get(task_id) else {
        return Ok(LoopControl::Stop);
    };

    if fresh.remaining_qty > Decimal::ZERO {
        maybe_hedge(ctx, &fresh).await?;
    }

    let Some(after_hedge) = ctx.store.get(task_id) else {
        return Ok(LoopControl::Stop);
    };
    if after_hedge.is_hedge_complete(ctx.hedge_cfg.min_hedge_qty_shares)
        && after_hedge.current_order_hash.is_none()
    {
        finish(ctx, task_id, TaskStatus::Completed, "hedge complete").await;
        return Ok(LoopControl::Stop);
    }

    // Price guard: only meaningful while a maker order is still resting.
    if after_hedge.current_order_hash.is_some() {
        if let Some(price) = hedge_ask_price(ctx, &after_hedge).await {
            if price_breached(price, after_hedge.hedge_price_limit) {
                return Ok(pause_for_guard_trip(ctx, task_id, &after_hedge, "price guard tripped").await);
            }
        }

        let depth = hedge_depth(ctx, &after_hedge).await;
        let needed = after_hedge.quantity - after_hedge.predict_filled_qty;
        let action = depth_guard_decision(
            depth,
            needed,
            *depth_paused,
            *depth_last_change,
            DEPTH_COOLDOWN,
            Instant::now(),
        );
        match action {
            DepthAction::Shrink => {
                if let DepthSignal::Known(available) = depth {
                    let new_quantity = after_hedge.predict_filled_qty + available.floor();
                    if new_quantity < after_hedge.quantity {
                        resize_maker_order(ctx, task_id, &after_hedge, new_quantity).await;
                    }
                }
                *depth_paused = true;
                *depth_last_change = Some(Instant::now());
            }
            DepthAction::Expand => {
                if after_hedge.quantity < after_hedge.total_quantity {
                    resize_maker_order(ctx, task_id, &after_hedge, after_hedge.total_quantity).await;
                }
                *depth_paused = false;
                *depth_last_change = Some(Instant::now());
            }
            DepthAction::Hold | DepthAction::SkipUnknown => {}
        }
    }

    Ok(LoopControl::Continue)
}

async fn pause_for_guard_trip(ctx: &Arc<ExecutorContext>, task_id: &str, task: &Task, reason: &str) -> LoopControl {
    if let Some(hash) = task.current_order_hash.clone() {
        let _ = ctx.maker.cancel(&hash, Duration::from_secs(10)).await;
    }
    let updated = ctx.store.update(task_id, |t| {
        let now = chrono::Utc::now();
        t.pause_count += 1;
        t.current_order_hash = None;
        if t.pause_count >= ctx.hedge_cfg.max_pause_count {
            let _ = t.transition(TaskStatus::Failed, format!("{reason}, max pause count reached"), now);
        } else {
            let _ = t.transition(TaskStatus::Paused, reason.to_string(), now);
        }
    });
    match updated {
        Ok(t) if t.status == TaskStatus::Failed => {
            ctx.alerts.task_paused(task_id, &t.market_id, "failed: max pause count").await;
        }
        Ok(t) => {
            ctx.alerts.task_paused(task_id, &t.market_id, reason).await;
        }
        Err(_) => {}
    }
    LoopControl::Stop
}

/// §4.7.3: cancel the resting maker order and re-rest it sized to
/// `new_quantity` — shrinking when hedge-side depth falls short of what the
/// remainder needs, expanding back toward `total_quantity` once it recovers.
/// A task whose predict leg already covers `new_quantity` just adopts the new
/// ceiling without resubmitting anything.
async fn resize_maker_order(ctx: &Arc<ExecutorContext>, task_id: &str, task: &Task, new_quantity: Decimal) {
    if let Some(hash) = task.current_order_hash.clone() {
        let _ = ctx.maker.cancel(&hash, Duration::from_secs(10)).await;
    }

    let remainder = new_quantity - task.predict_filled_qty;
    if remainder <= Decimal::ZERO {
        let _ = ctx.store.update(task_id, |t| {
            t.quantity = new_quantity;
            t.current_order_hash = None;
        });
        return;
    }

    let token_id = format!("{}:{}", task.market_id, task.arb_side.as_str());
    let request = match task.task_type {
        TaskType::Buy => OrderRequest::buy_limit(token_id, task.arb_side, remainder, task.predict_price, false),
        TaskType::Sell => OrderRequest::sell_limit(token_id, task.arb_side, remainder, task.predict_price, false),
    };

    match ctx.maker.place_limit(&request, PlaceOpts::default()).await {
        Ok(order) => {
            let hash = order.venue_order_id.clone().unwrap_or_else(|| order.client_order_id.clone());
            info!(task_id, %new_quantity, %remainder, "maker order resized by depth guard");
            let _ = ctx.store.update(task_id, |t| {
                t.quantity = new_quantity;
                t.current_order_hash = Some(hash.clone());
            });
        }
        Err(e) => {
            warn!(task_id, error = %e, "failed to resubmit resized maker order, clearing resting order");
            let _ = ctx.store.update(task_id, |t| {
                t.current_order_hash = None;
            });
        }
    }
}

async fn hedge_ask_price(ctx: &Arc<ExecutorContext>, task: &Task) -> Option<Decimal> {
    let side = task.arb_side.opposite();
    let token_id = format!("{}:{}", task.market_id, side.as_str());
    let book = ctx.hedge.get_book(&token_id).await.ok().flatten()?;
    book.best_ask().map(|l| l.price)
}

async fn hedge_depth(ctx: &Arc<ExecutorContext>, task: &Task) -> DepthSignal {
    let side = task.arb_side.opposite();
    let token_id = format!("{}:{}", task.market_id, side.as_str());
    match ctx.hedge.get_book(&token_id).await {
        Ok(Some(book)) => DepthSignal::Known(book.depth_within(false, task.hedge_price_limit)),
        _ => DepthSignal::Unknown,
    }
}

/// Folds in the latest REST-polled order status, enforcing the monotone
/// `filled_qty` invariant via [`Task::apply_predict_fill`].
async fn reconcile_predict_fill(ctx: &Arc<ExecutorContext>, task: &Task) {
    let Some(hash) = task.current_order_hash.clone() else {
        return;
    };
    let Some(status) = ctx.order_status_cache.get(&hash) else {
        return;
    };
    if status.filled_qty <= task.predict_filled_qty {
        return;
    }
    let _ = ctx.store.update(&task.id, |t| {
        let now = chrono::Utc::now();
        if t.apply_predict_fill(status.filled_qty, now).is_ok() && t.status == TaskStatus::PredictSubmitted {
            let _ = t.transition(TaskStatus::PartiallyFilled, "predict leg filling", now);
        }
    });
}

async fn handle_chain_fill(ctx: &Arc<ExecutorContext>, task: &Task, fill: ChainFill) {
    let Some(hash) = &task.current_order_hash else {
        return;
    };
    if &fill.order_hash != hash {
        return;
    }
    let size = rust_decimal::Decimal::try_from(fill.size_shares()).unwrap_or(Decimal::ZERO);
    if size <= task.predict_filled_qty {
        return;
    }
    let _ = ctx.store.update(&task.id, |t| {
        let now = chrono::Utc::now();
        if t.apply_predict_fill(size, now).is_ok() && t.status == TaskStatus::PredictSubmitted {
            let _ = t.transition(TaskStatus::PartiallyFilled, "on-chain fill observed", now);
        }
    });
}

async fn handle_maybe_completed(ctx: &Arc<ExecutorContext>, task: &Task, mc: MaybeCompleted) {
    let Some(hash) = &task.current_order_hash else {
        return;
    };
    if &mc.hash != hash {
        return;
    }
    match ctx.maker.get_order(hash).await {
        Ok(Some(status)) => ctx.order_status_cache.merge(status),
        Ok(None) => {
            warn!(task_id = %task.id, hash, "order missing at venue after maybe_completed signal");
        }
        Err(e) => warn!(task_id = %task.id, error = %e, "failed resolving maybe_completed order"),
    }
}

/// §4.7.4: once unhedged quantity clears the notional/qty floor, lift the
/// hedge leg. A residual below the minimum is accepted as dust rather than
/// chased with ever-smaller IOCs.
async fn maybe_hedge(ctx: &Arc<ExecutorContext>, task: &Task) -> Result<()> {
    let hedge_side_outcome = task.arb_side.opposite();
    let token_id = format!("{}:{}", task.market_id, hedge_side_outcome.as_str());
    let Some(price) = hedge_ask_price(ctx, task).await else {
        return Ok(());
    };

    if is_dust(task.remaining_qty, ctx.hedge_cfg.min_hedge_qty_shares) {
        return Ok(());
    }
    if !should_hedge_now(task.remaining_qty, price, &ctx.hedge_cfg) {
        return Ok(());
    }

    // Hedging a `side` position lifts the *same-direction* order on the
    // complementary outcome: a BUY task (long YES on the maker) buys the
    // hedge venue's NO ask to cover the event regardless of outcome (§3,
    // §4.7.2's BUY guard watches best-ask for exactly this leg).
    let order_side = match task.task_type {
        TaskType::Buy => OrderSide::Buy,
        TaskType::Sell => OrderSide::Sell,
    };

    let _ = ctx.store.update(&task.id, |t| {
        let now = chrono::Utc::now();
        if matches!(t.status, TaskStatus::PartiallyFilled) {
            let _ = t.transition(TaskStatus::Hedging, "lifting hedge leg", now);
        }
    });

    match hedge_incremental(ctx, task, &token_id, order_side, task.remaining_qty, task.hedge_price_limit).await {
        Ok((filled, avg_price)) => {
            ctx.store.update(&task.id, |t| {
                let now = chrono::Utc::now();
                t.apply_hedge_fill(filled, avg_price, now);
            })?;
        }
        Err(e) if matches!(&e, EngineError::Logic(msg) if msg.contains("ghost depth")) => {
            warn!(task_id = %task.id, error = %e, "hedge exhausted retries against ghost depth, pausing task");
            pause_for_ghost_depth(ctx, &task.id, task, &e.to_string()).await;
        }
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "hedge attempt failed, will retry on next tick");
        }
    }
    Ok(())
}

/// §4.7.4 scenario 4: a hedge IOC that exhausts retries with zero fill means
/// the visible depth was a ghost. Cancel the resting maker order, record the
/// reason on the task, and pause rather than silently retrying forever.
async fn pause_for_ghost_depth(ctx: &Arc<ExecutorContext>, task_id: &str, task: &Task, reason: &str) {
    if let Some(hash) = task.current_order_hash.clone() {
        let _ = ctx.maker.cancel(&hash, Duration::from_secs(10)).await;
    }
    let updated = ctx.store.update(task_id, |t| {
        let now = chrono::Utc::now();
        t.pause_count += 1;
        t.current_order_hash = None;
        t.error = Some(reason.to_string());
        if t.pause_count >= ctx.hedge_cfg.max_pause_count {
            let _ = t.transition(TaskStatus::Failed, reason.to_string(), now);
        } else {
            let _ = t.transition(TaskStatus::Paused, reason.to_string(), now);
        }
    });
    match updated {
        Ok(t) if t.status == TaskStatus::Failed => {
            ctx.alerts.task_paused(task_id, &t.market_id, "failed: ghost depth, max pause count reached").await;
        }
        Ok(t) => {
            ctx.alerts.task_paused(task_id, &t.market_id, reason).await;
        }
        Err(_) => {}
    }
}
