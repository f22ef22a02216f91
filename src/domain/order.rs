use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Side;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good Till Cancelled (maker-venue resting orders).
    GTC,
    /// Fill Or Kill (TAKER sub-executor orders).
    FOK,
    /// Immediate Or Cancel (hedge-venue lifts).
    IOC,
}

/// Lifecycle of one order placed at a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderLifecycle {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Failed,
}

impl OrderLifecycle {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderLifecycle::Filled
                | OrderLifecycle::Cancelled
                | OrderLifecycle::Rejected
                | OrderLifecycle::Expired
                | OrderLifecycle::Failed
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderLifecycle::Pending | OrderLifecycle::Submitted | OrderLifecycle::PartiallyFilled
        )
    }
}

/// What we want a venue to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub token_id: String,
    pub market_side: Side,
    pub order_side: OrderSide,
    pub shares: Decimal,
    pub limit_price: Decimal,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub neg_risk: bool,
}

impl OrderRequest {
    pub fn buy_limit(token_id: String, market_side: Side, shares: Decimal, price: Decimal, neg_risk: bool) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            token_id,
            market_side,
            order_side: OrderSide::Buy,
            shares,
            limit_price: price,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GTC,
            neg_risk,
        }
    }

    pub fn sell_limit(token_id: String, market_side: Side, shares: Decimal, price: Decimal, neg_risk: bool) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            token_id,
            market_side,
            order_side: OrderSide::Sell,
            shares,
            limit_price: price,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GTC,
            neg_risk,
        }
    }

    /// An immediate-or-cancel lift on the hedge venue.
    pub fn hedge_ioc(token_id: String, market_side: Side, order_side: OrderSide, shares: Decimal, price: Decimal, neg_risk: bool) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            token_id,
            market_side,
            order_side,
            shares,
            limit_price: price,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::IOC,
            neg_risk,
        }
    }
}

/// An order as tracked by this system (venue id assigned once submitted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub venue_order_id: Option<String>,
    pub token_id: String,
    pub market_side: Side,
    pub order_side: OrderSide,
    pub shares: Decimal,
    pub limit_price: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub filled_shares: Decimal,
    pub status: OrderLifecycle,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(request: &OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            client_order_id: request.client_order_id.clone(),
            venue_order_id: None,
            token_id: request.token_id.clone(),
            market_side: request.market_side,
            order_side: request.order_side,
            shares: request.shares,
            limit_price: request.limit_price,
            avg_fill_price: None,
            filled_shares: Decimal::ZERO,
            status: OrderLifecycle::Pending,
            submitted_at: None,
            filled_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn value(&self) -> Decimal {
        self.limit_price * self.shares
    }

    pub fn fill_pct(&self) -> Decimal {
        if self.shares.is_zero() {
            return Decimal::ZERO;
        }
        self.filled_shares / self.shares * Decimal::from(100)
    }

    pub fn is_fully_filled(&self) -> bool {
        self.status == OrderLifecycle::Filled && self.filled_shares >= self.shares
    }

    pub fn fill_value(&self) -> Decimal {
        match self.avg_fill_price {
            Some(price) => price * self.filled_shares,
            None => Decimal::ZERO,
        }
    }
}

/// A single fill, from either venue, deduplicated by `(order_id, trade_id)` upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub trade_id: String,
    pub price: Decimal,
    pub shares: Decimal,
    pub timestamp: DateTime<Utc>,
    pub fee: Decimal,
}

/// Terminal-or-not status of an order as seen by the order-status cache (§3/§4.3).
///
/// Distinct from [`OrderLifecycle`]: this is the coarse venue-reported state used to
/// drive `maybeCompleted` resolution, not the full submission lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VenueOrderState {
    Open,
    Filled,
    Cancelled,
    Expired,
    Invalidated,
}

impl VenueOrderState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VenueOrderState::Open)
    }
}

/// Cached order-status entry keyed by order hash/id.
///
/// Invariant: `filled_qty` is monotonically non-decreasing over the entry's lifetime;
/// callers merge with `max`, never overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedOrderStatus {
    pub hash: String,
    pub status: VenueOrderState,
    pub filled_qty: Decimal,
    pub remaining_qty: Decimal,
    pub cancel_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_fill_pct() {
        let mut order = Order::from_request(&OrderRequest::buy_limit(
            "tok".into(),
            Side::Yes,
            dec!(100),
            dec!(0.45),
            false,
        ));
        order.filled_shares = dec!(50);
        order.status = OrderLifecycle::PartiallyFilled;
        assert_eq!(order.fill_pct(), dec!(50));

        order.filled_shares = dec!(100);
        order.status = OrderLifecycle::Filled;
        assert!(order.is_fully_filled());
    }

    #[test]
    fn venue_order_state_terminal() {
        assert!(!VenueOrderState::Open.is_terminal());
        assert!(VenueOrderState::Filled.is_terminal());
        assert!(VenueOrderState::Cancelled.is_terminal());
    }
}
