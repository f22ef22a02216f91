//! Order-status cache: polls `list_open_orders` on the maker venue every
//! `POLL_MS` and seeds a per-hash cache (§4.3).
//!
//! An order missing from a successful poll response is never deleted outright
//! — it emits `maybe_completed(hash)` and leaves resolution of the terminal
//! state (filled vs. cancelled vs. expired) to the executor, which has the
//! context (did we cancel it ourselves?) to tell the difference.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::coordination::ShutdownToken;
use crate::domain::CachedOrderStatus;
use crate::error::Result;
use crate::exchange::VenueClient;

/// Emitted when a hash seen on a prior poll is absent from the latest
/// successful response. Not necessarily terminal — the executor resolves it.
#[derive(Debug, Clone)]
pub struct MaybeCompleted {
    pub hash: String,
}

pub struct OrderStatusCache {
    entries: DashMap<String, CachedOrderStatus>,
    maybe_completed_tx: broadcast::Sender<MaybeCompleted>,
}

impl Default for OrderStatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStatusCache {
    pub fn new() -> Self {
        let (maybe_completed_tx, _) = broadcast::channel(256);
        Self {
            entries: DashMap::new(),
            maybe_completed_tx,
        }
    }

    pub fn subscribe_maybe_completed(&self) -> broadcast::Receiver<MaybeCompleted> {
        self.maybe_completed_tx.subscribe()
    }

    /// Returns the cached entry even if older than any staleness window —
    /// §4.3 leaves that judgment to the caller.
    pub fn get(&self, hash: &str) -> Option<CachedOrderStatus> {
        self.entries.get(hash).map(|e| e.clone())
    }

    /// Merge a freshly observed status, enforcing the monotone-`filled_qty`
    /// invariant (§3) by taking the max rather than overwriting.
    pub fn merge(&self, status: CachedOrderStatus) {
        self.entries
            .entry(status.hash.clone())
            .and_modify(|existing| {
                if status.filled_qty > existing.filled_qty {
                    existing.filled_qty = status.filled_qty;
                    existing.remaining_qty = status.remaining_qty;
                }
                if status.status.is_terminal() {
                    existing.status = status.status;
                    existing.cancel_reason = status.cancel_reason.clone();
                }
                existing.updated_at = status.updated_at;
            })
            .or_insert(status);
    }

    /// One poll cycle: seeds/refreshes every hash in the response, then
    /// fires `maybe_completed` for any previously-seen hash absent from it.
    pub async fn poll_once(&self, maker: &dyn VenueClient) -> Result<()> {
        let open = maker.list_open_orders().await?;
        let seen: std::collections::HashSet<String> =
            open.iter().map(|o| o.hash.clone()).collect();

        for status in open {
            self.merge(status);
        }

        let missing: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.status.is_terminal() && !seen.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();

        for hash in missing {
            debug!(hash, "order missing from open-orders poll, may be completed");
            let _ = self.maybe_completed_tx.send(MaybeCompleted { hash });
        }

        Ok(())
    }

    /// Background poll loop at `poll_interval`, stopping on shutdown.
    pub async fn run(
        self: Arc<Self>,
        maker: Arc<dyn VenueClient>,
        poll_interval: Duration,
        mut shutdown: ShutdownToken,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(maker.as_ref()).await {
                        warn!(error = %e, "order-status poll failed, retrying next tick");
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    debug!("order-status cache poll loop stopping on shutdown");
                    break;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type SharedOrderStatusCache = Arc<OrderStatusCache>;

/// Sum of `filled_qty - 0` isn't meaningful here; this helper is used by the
/// delayed-fill verification probe to compare against a captured baseline.
pub fn filled_qty_or_zero(status: Option<&CachedOrderStatus>) -> Decimal {
    status.map(|s| s.filled_qty).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VenueOrderState;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn status(hash: &str, filled: Decimal, state: VenueOrderState) -> CachedOrderStatus {
        CachedOrderStatus {
            hash: hash.to_string(),
            status: state,
            filled_qty: filled,
            remaining_qty: dec!(10) - filled,
            cancel_reason: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merge_never_retreats_filled_qty() {
        let cache = OrderStatusCache::new();
        cache.merge(status("h1", dec!(3), VenueOrderState::Open));
        cache.merge(status("h1", dec!(2), VenueOrderState::Open));
        assert_eq!(cache.get("h1").unwrap().filled_qty, dec!(3));
        cache.merge(status("h1", dec!(5), VenueOrderState::Open));
        assert_eq!(cache.get("h1").unwrap().filled_qty, dec!(5));
    }

    #[test]
    fn terminal_status_is_retained_once_observed() {
        let cache = OrderStatusCache::new();
        cache.merge(status("h1", dec!(5), VenueOrderState::Open));
        cache.merge(status("h1", dec!(5), VenueOrderState::Filled));
        assert_eq!(cache.get("h1").unwrap().status, VenueOrderState::Filled);
    }
}
