use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Which leg rests and which is lifted (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    /// Maker venue rests at its best bid; hedge venue is lifted at its best ask.
    Maker,
    /// Maker venue is lifted at its best ask (with fee); hedge venue is lifted at its best ask.
    Taker,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Maker => write!(f, "MAKER"),
            Strategy::Taker => write!(f, "TAKER"),
        }
    }
}

/// A detected cross-venue arbitrage opportunity (§3). Identity is
/// `(market_id, side, strategy)`; refreshed in place as books move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub market_id: String,
    pub side: Side,
    pub strategy: Strategy,
    pub predict_price: Decimal,
    pub hedge_price: Decimal,
    pub total_cost: Decimal,
    pub profit: Decimal,
    pub max_quantity: Decimal,
    pub predict_depth: Decimal,
    pub hedge_depth: Decimal,
    pub predict_fee: Decimal,
    pub last_update: DateTime<Utc>,
    pub is_new: bool,
}

/// Identity tuple used for dedup, cache keys, and the "active market" set.
pub type OpportunityId = (String, Side, Strategy);

impl Opportunity {
    pub fn id(&self) -> OpportunityId {
        (self.market_id.clone(), self.side, self.strategy)
    }

    /// Build from priced legs, applying the maker fee and computing profit.
    ///
    /// `predict_fee` is the absolute per-share fee already deducted from `profit`,
    /// so `total_cost = predict_price + hedge_price + predict_fee` and
    /// `profit = 1 - total_cost`.
    pub fn new(
        market_id: impl Into<String>,
        side: Side,
        strategy: Strategy,
        predict_price: Decimal,
        hedge_price: Decimal,
        predict_fee: Decimal,
        max_quantity: Decimal,
        predict_depth: Decimal,
        hedge_depth: Decimal,
    ) -> Self {
        let total_cost = predict_price + hedge_price + predict_fee;
        let profit = Decimal::ONE - total_cost;
        Self {
            market_id: market_id.into(),
            side,
            strategy,
            predict_price,
            hedge_price,
            total_cost,
            profit,
            max_quantity,
            predict_depth,
            hedge_depth,
            predict_fee,
            last_update: Utc::now(),
            is_new: true,
        }
    }

    pub fn is_profitable(&self) -> bool {
        self.profit > Decimal::ZERO
    }

    /// 5-minute cache eviction window (§4.5).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_update > chrono::Duration::minutes(5)
    }

    /// Refresh prices/depth in place, clearing the `is_new` flag (it is only ever
    /// tagged true on first discovery).
    pub fn refresh(
        &mut self,
        predict_price: Decimal,
        hedge_price: Decimal,
        predict_fee: Decimal,
        max_quantity: Decimal,
        predict_depth: Decimal,
        hedge_depth: Decimal,
    ) {
        self.predict_price = predict_price;
        self.hedge_price = hedge_price;
        self.predict_fee = predict_fee;
        self.total_cost = predict_price + hedge_price + predict_fee;
        self.profit = Decimal::ONE - self.total_cost;
        self.max_quantity = max_quantity;
        self.predict_depth = predict_depth;
        self.hedge_depth = hedge_depth;
        self.last_update = Utc::now();
        self.is_new = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn profit_is_one_minus_total_cost() {
        let opp = Opportunity::new(
            "m1",
            Side::Yes,
            Strategy::Maker,
            dec!(0.42),
            dec!(0.55),
            dec!(0),
            dec!(10),
            dec!(100),
            dec!(100),
        );
        assert_eq!(opp.total_cost, dec!(0.97));
        assert_eq!(opp.profit, dec!(0.03));
        assert!(opp.is_profitable());
        assert!(opp.is_new);
    }

    #[test]
    fn refresh_clears_is_new_and_recomputes() {
        let mut opp = Opportunity::new(
            "m1",
            Side::Yes,
            Strategy::Maker,
            dec!(0.42),
            dec!(0.55),
            dec!(0),
            dec!(10),
            dec!(100),
            dec!(100),
        );
        opp.refresh(dec!(0.40), dec!(0.55), dec!(0), dec!(12), dec!(90), dec!(80));
        assert!(!opp.is_new);
        assert_eq!(opp.total_cost, dec!(0.95));
        assert_eq!(opp.profit, dec!(0.05));
    }

    #[test]
    fn expires_after_five_minutes_without_refresh() {
        let opp = Opportunity::new(
            "m1",
            Side::Yes,
            Strategy::Maker,
            dec!(0.42),
            dec!(0.55),
            dec!(0),
            dec!(10),
            dec!(100),
            dec!(100),
        );
        assert!(!opp.is_expired(Utc::now() + chrono::Duration::minutes(4)));
        assert!(opp.is_expired(Utc::now() + chrono::Duration::minutes(6)));
    }
}
