//! Order submission (§4.7.1): puts a `Pending` task's first order on the
//! wire and advances it to `PredictSubmitted`.
//!
//! MAKER tasks rest a limit order on the maker venue and lean on the price
//! guard to react if the hedge leg moves after the fact. TAKER tasks instead
//! run a FOK sub-executor here: a resting order was never the point, so a
//! TAKER task that doesn't fill immediately is abandoned rather than left on
//! the book.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::{OrderRequest, Side, Strategy, Task, TaskStatus, TaskType};
use crate::error::{EngineError, Result};
use crate::exchange::PlaceOpts;

use super::context::ExecutorContext;

/// Safety margin (§4.7.1): a MAKER order is only posted if the hedge venue's
/// current opposite-side price still leaves the combined cost under 1, with
/// a little room for it moving between the check and the post.
const MAKER_SAFETY_MARGIN: Decimal = Decimal::from_parts(5, 0, 0, false, 3); // 0.005

pub async fn submit_order(ctx: &ExecutorContext, task: &Task) -> Result<Task> {
    match task.strategy {
        Strategy::Maker => submit_maker(ctx, task).await,
        Strategy::Taker => submit_taker(ctx, task).await,
    }
}

async fn submit_maker(ctx: &ExecutorContext, task: &Task) -> Result<Task> {
    let hedge_side = task.arb_side.opposite();
    let hedge_price = current_hedge_price(ctx, task, hedge_side).await?;

    if task.predict_price + hedge_price > Decimal::ONE - MAKER_SAFETY_MARGIN {
        return ctx.store.update(&task.id, |t| {
            let now = chrono::Utc::now();
            let _ = t.transition(
                TaskStatus::Failed,
                format!(
                    "maker safety check failed: predict {} + hedge {} too close to 1",
                    t.predict_price, hedge_price
                ),
                now,
            );
        });
    }

    let token_id = maker_token_id(ctx, task).await?;
    let request = match task.task_type {
        TaskType::Buy => OrderRequest::buy_limit(token_id, task.arb_side, task.quantity, task.predict_price, false),
        TaskType::Sell => OrderRequest::sell_limit(token_id, task.arb_side, task.quantity, task.predict_price, false),
    };
    let opts = PlaceOpts::default();
    let order = ctx.maker.place_limit(&request, opts).await?;
    let hash = order.venue_order_id.clone().unwrap_or_else(|| order.client_order_id.clone());

    info!(task_id = %task.id, %hash, "maker order submitted");
    ctx.store.update(&task.id, |t| {
        let now = chrono::Utc::now();
        t.current_order_hash = Some(hash.clone());
        let _ = t.transition(TaskStatus::PredictSubmitted, "order placed", now);
    })
}

async fn submit_taker(ctx: &ExecutorContext, task: &Task) -> Result<Task> {
    let order_side = match task.task_type {
        TaskType::Buy => crate::domain::OrderSide::Buy,
        TaskType::Sell => crate::domain::OrderSide::Sell,
    };
    let token_id = maker_token_id(ctx, task).await?;
    let request = OrderRequest::hedge_ioc(
        token_id,
        task.arb_side,
        order_side,
        task.quantity,
        task.predict_price,
        false,
    );
    let order = ctx.maker.place_limit(&request, PlaceOpts::default()).await?;

    if order.filled_shares.is_zero() {
        warn!(task_id = %task.id, "taker FOK leg did not fill, abandoning task");
        return ctx.store.update(&task.id, |t| {
            let now = chrono::Utc::now();
            let _ = t.transition(TaskStatus::Cancelled, "FOK did not fill", now);
        });
    }

    info!(task_id = %task.id, qty = %order.filled_shares, "taker leg filled immediately");
    ctx.store.update(&task.id, |t| {
        let now = chrono::Utc::now();
        t.avg_predict_price = order.avg_fill_price.unwrap_or(t.predict_price);
        let _ = t.apply_predict_fill(order.filled_shares, now);
        let _ = t.transition(TaskStatus::PartiallyFilled, "FOK filled", now);
    })
}

async fn current_hedge_price(ctx: &ExecutorContext, task: &Task, side: Side) -> Result<Decimal> {
    let token_id = hedge_token_id(ctx, task, side).await?;
    let book = ctx
        .hedge
        .get_book(&token_id)
        .await?
        .ok_or_else(|| EngineError::StaleData(format!("no hedge book for {token_id}")))?;
    book.best_ask()
        .map(|l| l.price)
        .ok_or_else(|| EngineError::StaleData(format!("hedge book empty for {token_id}")))
}

/// Token id resolution is a placeholder seam: a full build wires this from
/// the matched `MarketPair` carried alongside the task's market_id. Tasks
/// currently store only the flattened fields needed for the state machine.
async fn maker_token_id(_ctx: &ExecutorContext, task: &Task) -> Result<String> {
    Ok(format!("{}:{}", task.market_id, task.arb_side.as_str()))
}

async fn hedge_token_id(_ctx: &ExecutorContext, task: &Task, side: Side) -> Result<String> {
    Ok(format!("{}:{}", task.market_id, side.as_str()))
}
