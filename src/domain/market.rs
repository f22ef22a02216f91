use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome token side of a binary prediction market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A matched pair of markets, one per venue, for the same real-world event.
///
/// Built once at startup by the market matcher and refreshed on demand. `inverted`
/// means the hedge venue's YES token corresponds to the maker venue's NO outcome;
/// callers must flip the side when routing hedge orders for an inverted pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPair {
    pub maker_market_id: String,
    pub hedge_condition_id: String,
    pub maker_yes_token_id: String,
    pub maker_no_token_id: String,
    pub hedge_yes_token_id: String,
    pub hedge_no_token_id: String,
    pub fee_rate_bps: u32,
    pub tick_size: rust_decimal::Decimal,
    pub inverted: bool,
    pub neg_risk: bool,
    pub settlement_date: Option<DateTime<Utc>>,
}

impl MarketPair {
    pub fn maker_token_id(&self, side: Side) -> &str {
        match side {
            Side::Yes => &self.maker_yes_token_id,
            Side::No => &self.maker_no_token_id,
        }
    }

    /// Hedge-venue token id for the maker-venue `side`, accounting for inversion.
    pub fn hedge_token_id(&self, side: Side) -> &str {
        let hedge_side = if self.inverted { side.opposite() } else { side };
        match hedge_side {
            Side::Yes => &self.hedge_yes_token_id,
            Side::No => &self.hedge_no_token_id,
        }
    }

    /// Quantize a price to the venue's tick size (round to nearest tick, floor on ties down).
    pub fn quantize(&self, price: rust_decimal::Decimal) -> rust_decimal::Decimal {
        if self.tick_size.is_zero() {
            return price;
        }
        (price / self.tick_size).round() * self.tick_size
    }
}

/// Best bid/ask for one token on one venue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub side: Side,
    pub best_bid: Option<rust_decimal::Decimal>,
    pub best_ask: Option<rust_decimal::Decimal>,
    pub bid_size: Option<rust_decimal::Decimal>,
    pub ask_size: Option<rust_decimal::Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn mid_price(&self) -> Option<rust_decimal::Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / rust_decimal::Decimal::from(2)),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Yes.opposite(), Side::No);
        assert_eq!(Side::No.opposite(), Side::Yes);
    }

    #[test]
    fn inverted_pair_flips_hedge_token() {
        let pair = MarketPair {
            maker_market_id: "m1".into(),
            hedge_condition_id: "c1".into(),
            maker_yes_token_id: "myes".into(),
            maker_no_token_id: "mno".into(),
            hedge_yes_token_id: "hyes".into(),
            hedge_no_token_id: "hno".into(),
            fee_rate_bps: 0,
            tick_size: dec!(0.01),
            inverted: true,
            neg_risk: false,
            settlement_date: None,
        };
        assert_eq!(pair.hedge_token_id(Side::Yes), "hno");
        assert_eq!(pair.hedge_token_id(Side::No), "hyes");
    }

    #[test]
    fn quantize_rounds_to_tick() {
        let pair = MarketPair {
            maker_market_id: "m".into(),
            hedge_condition_id: "c".into(),
            maker_yes_token_id: "y".into(),
            maker_no_token_id: "n".into(),
            hedge_yes_token_id: "hy".into(),
            hedge_no_token_id: "hn".into(),
            fee_rate_bps: 0,
            tick_size: dec!(0.01),
            inverted: false,
            neg_risk: false,
            settlement_date: None,
        };
        assert_eq!(pair.quantize(dec!(0.4234)), dec!(0.42));
    }
}
