//! Per-venue market-data and order-status caches (§4.2, §4.3).

pub mod order_status_cache;
pub mod orderbook_cache;

pub use order_status_cache::{MaybeCompleted, OrderStatusCache, SharedOrderStatusCache};
pub use orderbook_cache::{BookUpdateEvent, CacheKey, OrderBookCache, SharedOrderBookCache};
