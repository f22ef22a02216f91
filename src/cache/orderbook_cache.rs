//! Order-book cache keyed by `(venue, token)`. Sources merge by precedence
//! `ws > rest`: once a WS update has been seen for a token, a stale REST
//! response is retained only until the next WS delta arrives.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{Book, BookSource};
use crate::exchange::VenueRole;

/// `(venue role, token id)`.
pub type CacheKey = (VenueRole, String);

/// Fires on every WS delta with `(token, book)`; source is always `ws`.
#[derive(Debug, Clone)]
pub struct BookUpdateEvent {
    pub role: VenueRole,
    pub token_id: String,
    pub book: Book,
}

/// Per-venue order-book cache with WS/REST precedence and a subscription set
/// driving the REST pre-warm policy.
pub struct OrderBookCache {
    books: DashMap<CacheKey, Book>,
    subscribed: DashMap<CacheKey, ()>,
    update_tx: broadcast::Sender<BookUpdateEvent>,
}

impl Default for OrderBookCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(1024);
        Self {
            books: DashMap::new(),
            subscribed: DashMap::new(),
            update_tx,
        }
    }

    pub fn onupdate(&self) -> broadcast::Receiver<BookUpdateEvent> {
        self.update_tx.subscribe()
    }

    /// Add a token to the subscription set. Returns `true` if this is a new
    /// subscription (caller should trigger a REST pre-warm for it).
    pub fn subscribe(&self, role: VenueRole, token_id: &str) -> bool {
        let key = (role, token_id.to_string());
        self.subscribed.insert(key, ()).is_none()
    }

    pub fn is_subscribed(&self, role: VenueRole, token_id: &str) -> bool {
        self.subscribed.contains_key(&(role, token_id.to_string()))
    }

    /// Ingest a WS book delta. WS never loses to a REST update: once written
    /// here, only a newer WS update or `ingest_rest` with no prior WS value
    /// can replace it.
    pub fn ingest_ws(&self, role: VenueRole, token_id: &str, mut book: Book) {
        book.source = BookSource::Ws;
        let key = (role, token_id.to_string());
        self.books.insert(key, book.clone());
        let _ = self.update_tx.send(BookUpdateEvent { role, token_id: token_id.to_string(), book });
    }

    /// Ingest a REST snapshot. Dropped silently if a WS-sourced entry already
    /// exists for this key (WS always wins per §4.2).
    pub fn ingest_rest(&self, role: VenueRole, token_id: &str, mut book: Book) {
        let key = (role, token_id.to_string());
        if let Some(existing) = self.books.get(&key) {
            if existing.source == BookSource::Ws {
                debug!(token_id, "dropping REST book snapshot, WS entry present");
                return;
            }
        }
        book.source = BookSource::Rest;
        self.books.insert(key, book);
    }

    /// Non-blocking; returns a possibly stale book.
    pub fn get_sync(&self, role: VenueRole, token_id: &str) -> Option<Book> {
        self.books.get(&(role, token_id.to_string())).map(|b| b.clone())
    }

    /// Returns a book only if fresh enough for the caller's purpose.
    pub fn get_fresh(&self, role: VenueRole, token_id: &str, max_age: chrono::Duration) -> Option<Book> {
        self.get_sync(role, token_id).filter(|b| b.is_fresh(max_age))
    }

    pub fn best_bid(&self, role: VenueRole, token_id: &str) -> Option<Decimal> {
        self.get_sync(role, token_id).and_then(|b| b.best_bid()).map(|l| l.price)
    }

    pub fn best_ask(&self, role: VenueRole, token_id: &str) -> Option<Decimal> {
        self.get_sync(role, token_id).and_then(|b| b.best_ask()).map(|l| l.price)
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

pub type SharedOrderBookCache = Arc<OrderBookCache>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Level;
    use rust_decimal_macros::dec;

    fn book_with(bid: Decimal, ask: Decimal, source: BookSource) -> Book {
        let mut b = Book::new("tok", source);
        b.set_levels(
            vec![Level { price: bid, size: dec!(10) }],
            vec![Level { price: ask, size: dec!(10) }],
            source,
        );
        b
    }

    #[test]
    fn ws_update_wins_over_later_rest() {
        let cache = OrderBookCache::new();
        cache.ingest_ws(VenueRole::Maker, "tok", book_with(dec!(0.40), dec!(0.42), BookSource::Ws));
        cache.ingest_rest(VenueRole::Maker, "tok", book_with(dec!(0.30), dec!(0.32), BookSource::Rest));

        let book = cache.get_sync(VenueRole::Maker, "tok").unwrap();
        assert_eq!(book.source, BookSource::Ws);
        assert_eq!(book.best_bid().unwrap().price, dec!(0.40));
    }

    #[test]
    fn rest_seeds_cache_before_any_ws_update() {
        let cache = OrderBookCache::new();
        cache.ingest_rest(VenueRole::Hedge, "tok", book_with(dec!(0.50), dec!(0.52), BookSource::Rest));
        let book = cache.get_sync(VenueRole::Hedge, "tok").unwrap();
        assert_eq!(book.source, BookSource::Rest);
    }

    #[test]
    fn subscribe_reports_only_first_call_as_new() {
        let cache = OrderBookCache::new();
        assert!(cache.subscribe(VenueRole::Maker, "tok"));
        assert!(!cache.subscribe(VenueRole::Maker, "tok"));
    }
}
