use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where an order-book snapshot was obtained from. WS always takes precedence over REST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSource {
    Ws,
    Rest,
}

/// A single price level. Invariant: `price` in [0, 1], `size > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Per-token order book on one venue.
///
/// Bids are sorted descending by price, asks ascending; zero-size levels are
/// dropped on ingestion rather than kept and skipped at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub token_id: String,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub ingested_at: DateTime<Utc>,
    pub source: BookSource,
}

impl Book {
    pub fn new(token_id: impl Into<String>, source: BookSource) -> Self {
        Self {
            token_id: token_id.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            ingested_at: Utc::now(),
            source,
        }
    }

    /// Replace levels with a freshly-sorted, de-zeroed snapshot.
    pub fn set_levels(&mut self, mut bids: Vec<Level>, mut asks: Vec<Level>, source: BookSource) {
        bids.retain(|l| l.size > Decimal::ZERO);
        asks.retain(|l| l.size > Decimal::ZERO);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        self.bids = bids;
        self.asks = asks;
        self.source = source;
        self.ingested_at = Utc::now();
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }

    /// True if this book is fresh enough to drive a trade-sizing decision.
    pub fn is_fresh(&self, max_age: chrono::Duration) -> bool {
        Utc::now() - self.ingested_at <= max_age
    }

    /// Sum of size on the requested side at prices no worse than `limit`.
    ///
    /// For bids, "no worse than limit" means `price >= limit` (we are selling into
    /// the book); for asks it means `price <= limit` (we are buying from the book).
    pub fn depth_within(&self, side_is_bid: bool, limit: Decimal) -> Decimal {
        if side_is_bid {
            self.bids
                .iter()
                .filter(|l| l.price >= limit)
                .map(|l| l.size)
                .sum()
        } else {
            self.asks
                .iter()
                .filter(|l| l.price <= limit)
                .map(|l| l.size)
                .sum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn set_levels_sorts_and_dezeroes() {
        let mut book = Book::new("tok", BookSource::Rest);
        book.set_levels(
            vec![
                Level { price: dec!(0.40), size: dec!(10) },
                Level { price: dec!(0.42), size: dec!(0) },
                Level { price: dec!(0.41), size: dec!(5) },
            ],
            vec![
                Level { price: dec!(0.55), size: dec!(5) },
                Level { price: dec!(0.50), size: dec!(5) },
            ],
            BookSource::Ws,
        );
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.bids[0].price, dec!(0.41));
        assert_eq!(book.asks[0].price, dec!(0.50));
        assert_eq!(book.source, BookSource::Ws);
    }

    #[test]
    fn depth_within_bounds_by_limit_price() {
        let mut book = Book::new("tok", BookSource::Ws);
        book.set_levels(
            vec![],
            vec![
                Level { price: dec!(0.50), size: dec!(10) },
                Level { price: dec!(0.60), size: dec!(10) },
            ],
            BookSource::Ws,
        );
        assert_eq!(book.depth_within(false, dec!(0.55)), dec!(10));
        assert_eq!(book.depth_within(false, dec!(0.65)), dec!(20));
    }
}
