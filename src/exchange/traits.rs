use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{Book, CachedOrderStatus, Order, OrderRequest, TimeInForce};
use crate::error::Result;

/// Which side of the arbitrage a client sits on. A venue's role never changes at
/// runtime; it is fixed at construction by the factory (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueRole {
    /// Rests limit orders; the leg we make a market on.
    Maker,
    /// Lifted with IOC/FOK to neutralize exposure from maker fills.
    Hedge,
}

impl std::fmt::Display for VenueRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VenueRole::Maker => write!(f, "maker"),
            VenueRole::Hedge => write!(f, "hedge"),
        }
    }
}

/// Outcome of a cancel request. Cancellation is idempotent: cancelling an
/// already-filled or already-cancelled order returns `cancelled: false`, not an
/// error (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    pub cancelled: bool,
}

/// Extra knobs for `place_limit` beyond token/side/price/qty (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct PlaceOpts {
    pub neg_risk: bool,
    pub time_in_force: TimeInForce,
    pub tick_size: Decimal,
}

impl Default for PlaceOpts {
    fn default() -> Self {
        Self {
            neg_risk: false,
            time_in_force: TimeInForce::GTC,
            tick_size: Decimal::new(1, 2),
        }
    }
}

/// Capability set every venue exposes to the scanner and executor (§4.1).
///
/// WebSocket subscriptions (`subscribeBook`/`subscribeUser`) are intentionally not
/// part of this trait: they are long-lived streams rather than request/response
/// calls, and are owned instead by dedicated adapter structs that feed the
/// order-book cache and fill watchers directly.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn role(&self) -> VenueRole;

    fn is_dry_run(&self) -> bool;

    async fn place_limit(&self, request: &OrderRequest, opts: PlaceOpts) -> Result<Order>;

    /// Idempotent: cancelling a fully filled or already-cancelled order returns
    /// `cancelled: false` without error.
    async fn cancel(&self, order_id: &str, timeout: Duration) -> Result<CancelOutcome>;

    async fn get_order(&self, order_id: &str) -> Result<Option<CachedOrderStatus>>;

    async fn list_open_orders(&self) -> Result<Vec<CachedOrderStatus>>;

    async fn get_book(&self, token_id: &str) -> Result<Option<Book>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_place_opts_are_gtc_with_cent_tick() {
        let opts = PlaceOpts::default();
        assert!(!opts.neg_risk);
        assert_eq!(opts.time_in_force, TimeInForce::GTC);
        assert_eq!(opts.tick_size, Decimal::new(1, 2));
    }

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(VenueRole::Maker.to_string(), "maker");
        assert_eq!(VenueRole::Hedge.to_string(), "hedge");
    }
}
