//! Incremental hedging (§4.7.4): whenever new predict-side fill arrives,
//! decide whether it's worth lifting the hedge venue now or waiting for more
//! fill to accumulate, then place the IOC and reconcile the residue.

use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::HedgeConfig;
use crate::domain::{OrderRequest, OrderSide, Task};
use crate::error::{EngineError, Result};

use super::context::ExecutorContext;

/// §4.7.4 decision rule: hedge now if the unhedged notional or quantity alone
/// clears either floor — whichever the venue's own minimums make binding.
pub fn should_hedge_now(unhedged_qty: Decimal, hedge_price: Decimal, cfg: &HedgeConfig) -> bool {
    if unhedged_qty <= Decimal::ZERO {
        return false;
    }
    let notional = unhedged_qty * hedge_price;
    notional >= cfg.min_hedge_notional_usd || unhedged_qty >= cfg.min_hedge_qty_shares
}

/// Lifts `qty` of the hedge leg via IOC, retrying through ghost-depth
/// (visible book depth that vanishes on attempted fill) with a capped
/// exponential backoff, then cancels whatever the IOC left resting.
///
/// Returns the total filled quantity and the volume-weighted average price.
pub async fn hedge_incremental(
    ctx: &ExecutorContext,
    task: &Task,
    token_id: &str,
    side: OrderSide,
    qty: Decimal,
    limit_price: Decimal,
) -> Result<(Decimal, Decimal)> {
    let mut remaining = qty;
    let mut filled_total = Decimal::ZERO;
    let mut value_total = Decimal::ZERO;
    let mut attempt = 0u32;
    let mut backoff = Duration::from_millis(500);

    while remaining > Decimal::ZERO && attempt < ctx.hedge_cfg.max_hedge_retries {
        let request = OrderRequest::hedge_ioc(
            token_id.to_string(),
            task.arb_side,
            side,
            remaining,
            limit_price,
            false,
        );
        let order = ctx.hedge.place_limit(&request, Default::default()).await?;

        if let Some(hash) = order.venue_order_id.clone() {
            let _ = ctx.hedge.cancel(&hash, Duration::from_secs(5)).await;
        }

        if order.filled_shares.is_zero() {
            attempt += 1;
            warn!(
                task_id = %task.id,
                attempt,
                "hedge IOC returned zero fill against visible depth, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(2));
            continue;
        }

        let price = order.avg_fill_price.unwrap_or(limit_price);
        filled_total += order.filled_shares;
        value_total += order.filled_shares * price;
        remaining -= order.filled_shares;
        attempt = 0;
        backoff = Duration::from_millis(500);
    }

    if filled_total.is_zero() {
        return Err(EngineError::Logic(
            "hedge exhausted retries with zero fill (ghost depth)".into(),
        ));
    }

    let avg_price = value_total / filled_total;
    info!(task_id = %task.id, filled = %filled_total, %avg_price, "hedge leg lifted");
    Ok((filled_total, avg_price))
}

/// Small residual unhedged quantity left after the last predict fill and the
/// last hedge attempt — accepted as dust rather than chased forever (§9).
pub fn is_dust(remaining_qty: Decimal, min_hedge_qty: Decimal) -> bool {
    remaining_qty.abs() < min_hedge_qty
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn cfg() -> HedgeConfig {
        HedgeConfig {
            min_hedge_notional_usd: dec!(5),
            min_hedge_qty_shares: dec!(10),
            max_pause_count: 3,
            unwind_max_retries: 3,
            max_hedge_retries: 5,
        }
    }

    #[test]
    fn hedges_once_notional_floor_cleared() {
        assert!(should_hedge_now(dec!(20), dec!(0.5), &cfg())); // $10 notional
    }

    #[test]
    fn hedges_once_qty_floor_cleared_even_if_notional_small() {
        assert!(should_hedge_now(dec!(12), dec!(0.1), &cfg())); // $1.2 notional, but 12 shares
    }

    #[test]
    fn waits_when_neither_floor_cleared() {
        assert!(!should_hedge_now(dec!(3), dec!(0.3), &cfg()));
    }

    #[test]
    fn dust_is_recognized_below_min_qty() {
        assert!(is_dust(dec!(0.5), dec!(1)));
        assert!(!is_dust(dec!(2), dec!(1)));
    }
}
