//! Opportunity scanner: recomputes MAKER/TAKER × YES/NO costs for every
//! matched market pair as order books move (§4.5).
//!
//! The scanner itself never places orders; it only maintains the opportunity
//! cache that the executor and dashboard read from. Each matched pair is
//! rescanned at most once per `THROTTLE` regardless of how many book updates
//! arrive for it in that window, and any opportunity not refreshed within the
//! eviction window falls out of the cache on the next sweep.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::cache::SharedOrderBookCache;
use crate::coordination::ShutdownToken;
use crate::domain::{MarketPair, Opportunity, OpportunityId, Side, Strategy};
use crate::exchange::VenueRole;

/// Minimum per-market gap between rescans, regardless of book-update volume.
pub const THROTTLE: Duration = Duration::from_millis(50);

/// A computed opportunity is evicted if it hasn't refreshed in this long.
pub const EVICTION_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

/// `cost_yes + cost_no` must clear `1 - CONSISTENCY_EPSILON` or the pair is
/// suppressed outright — a sub-parity sum on both sides at once usually means
/// a stale or crossed book rather than a genuine arbitrage.
pub const CONSISTENCY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// One side's priced legs before being admitted into the opportunity cache.
#[derive(Debug, Clone, Copy)]
struct PricedLeg {
    maker_price: Decimal,
    maker_depth: Decimal,
    maker_fee: Decimal,
    hedge_price: Decimal,
    hedge_depth: Decimal,
}

impl PricedLeg {
    fn total_cost(&self) -> Decimal {
        self.maker_price + self.hedge_price + self.maker_fee
    }
}

/// A per-market throttle + last-scan bookkeeping entry.
struct MarketState {
    last_scan: std::time::Instant,
    seen_before: bool,
}

pub struct Scanner {
    book_cache: SharedOrderBookCache,
    opportunities: DashMap<OpportunityId, Opportunity>,
    market_state: DashMap<String, MarketState>,
    update_tx: broadcast::Sender<Opportunity>,
    stale_calc: chrono::Duration,
}

impl Scanner {
    pub fn new(book_cache: SharedOrderBookCache, stale_calc: chrono::Duration) -> Self {
        let (update_tx, _) = broadcast::channel(1024);
        Self {
            book_cache,
            opportunities: DashMap::new(),
            market_state: DashMap::new(),
            update_tx,
            stale_calc,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Opportunity> {
        self.update_tx.subscribe()
    }

    pub fn get(&self, id: &OpportunityId) -> Option<Opportunity> {
        self.opportunities.get(id).map(|o| o.clone())
    }

    pub fn snapshot(&self) -> Vec<Opportunity> {
        self.opportunities.iter().map(|e| e.value().clone()).collect()
    }

    /// Drop the throttle check for this market, forcing the next call to
    /// `scan_pair` through regardless of elapsed time. Used when a pair is
    /// matched for the first time.
    fn should_scan(&self, market_id: &str) -> bool {
        let now = std::time::Instant::now();
        let mut entry = self
            .market_state
            .entry(market_id.to_string())
            .or_insert_with(|| MarketState {
                last_scan: now - THROTTLE - Duration::from_millis(1),
                seen_before: false,
            });
        if now.duration_since(entry.last_scan) < THROTTLE {
            return false;
        }
        entry.last_scan = now;
        true
    }

    /// Recompute every strategy/side combination for `pair` and update the
    /// opportunity cache. No-ops (and returns `false`) if the per-market
    /// throttle hasn't elapsed.
    pub fn scan_pair(&self, pair: &MarketPair) -> bool {
        if !self.should_scan(&pair.maker_market_id) {
            return false;
        }

        let is_new_market = {
            let mut entry = self.market_state.get_mut(&pair.maker_market_id).unwrap();
            let first = !entry.seen_before;
            entry.seen_before = true;
            first
        };

        for strategy in [Strategy::Maker, Strategy::Taker] {
            // Both sides are priced together so the consistency check can
            // compare their combined cost before either is published.
            let yes_leg = self.price_leg(pair, Side::Yes, strategy);
            let no_leg = self.price_leg(pair, Side::No, strategy);

            let consistent = match (&yes_leg, &no_leg) {
                (Some(y), Some(n)) => y.total_cost() + n.total_cost() >= Decimal::ONE - CONSISTENCY_EPSILON,
                _ => true,
            };

            if !consistent {
                debug!(
                    market_id = %pair.maker_market_id,
                    %strategy,
                    "suppressing pair, combined YES/NO cost below parity floor"
                );
                self.evict_if_present(pair, Side::Yes, strategy);
                self.evict_if_present(pair, Side::No, strategy);
                continue;
            }

            self.apply_leg(pair, Side::Yes, strategy, yes_leg, is_new_market);
            self.apply_leg(pair, Side::No, strategy, no_leg, is_new_market);
        }
        true
    }

    fn price_leg(&self, pair: &MarketPair, side: Side, strategy: Strategy) -> Option<PricedLeg> {
        let maker_token = pair.maker_token_id(side);
        // Hedging a `side` position means lifting the *complementary* outcome
        // on the hedge venue — long YES on the maker + long NO on the hedge
        // covers the event regardless of outcome (§3, §4.5).
        let hedge_token = pair.hedge_token_id(side.opposite());

        let maker_book = self
            .book_cache
            .get_fresh(VenueRole::Maker, maker_token, self.stale_calc)?;
        let hedge_book = self
            .book_cache
            .get_fresh(VenueRole::Hedge, hedge_token, self.stale_calc)?;

        let fee_rate = Decimal::new(pair.fee_rate_bps as i64, 4);

        let (maker_price, maker_depth, maker_fee) = match strategy {
            Strategy::Maker => {
                let level = maker_book.best_bid()?;
                (level.price, level.size, Decimal::ZERO)
            }
            Strategy::Taker => {
                let level = maker_book.best_ask()?;
                (level.price, level.size, level.price * fee_rate)
            }
        };

        let hedge_level = hedge_book.best_ask()?;

        Some(PricedLeg {
            maker_price,
            maker_depth,
            maker_fee,
            hedge_price: hedge_level.price,
            hedge_depth: hedge_level.size,
        })
    }

    fn apply_leg(
        &self,
        pair: &MarketPair,
        side: Side,
        strategy: Strategy,
        leg: Option<PricedLeg>,
        is_new_market: bool,
    ) {
        let Some(leg) = leg else {
            self.evict_if_present(pair, side, strategy);
            return;
        };

        let max_quantity = leg.maker_depth.min(leg.hedge_depth);
        let id = (pair.maker_market_id.clone(), side, strategy);
        let mut opp_ref = self.opportunities.get_mut(&id);
        match opp_ref.as_mut() {
            Some(existing) => existing.refresh(
                leg.maker_price,
                leg.hedge_price,
                leg.maker_fee,
                max_quantity,
                leg.maker_depth,
                leg.hedge_depth,
            ),
            None => {
                drop(opp_ref);
                let mut opp = Opportunity::new(
                    pair.maker_market_id.clone(),
                    side,
                    strategy,
                    leg.maker_price,
                    leg.hedge_price,
                    leg.maker_fee,
                    max_quantity,
                    leg.maker_depth,
                    leg.hedge_depth,
                );
                opp.is_new = is_new_market;
                self.opportunities.insert(id, opp);
            }
        }

        if let Some(opp) = self.opportunities.get(&id) {
            let _ = self.update_tx.send(opp.clone());
            trace!(
                market_id = %pair.maker_market_id,
                %side,
                %strategy,
                profit = %opp.profit,
                "opportunity refreshed"
            );
        }
    }

    fn evict_if_present(&self, pair: &MarketPair, side: Side, strategy: Strategy) {
        let id = (pair.maker_market_id.clone(), side, strategy);
        if self.opportunities.remove(&id).is_some() {
            debug!(market_id = %pair.maker_market_id, %side, %strategy, "opportunity evicted, book unavailable");
        }
    }

    /// Drop any opportunity that hasn't refreshed within [`EVICTION_WINDOW`].
    pub fn sweep_expired(&self) {
        let now = chrono::Utc::now();
        let expired: Vec<OpportunityId> = self
            .opportunities
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        for id in expired {
            self.opportunities.remove(&id);
        }
    }

    /// Active-market set: markets whose opportunity has been seen in the
    /// current cache (i.e., not yet evicted). Used to decide `is_new`.
    pub fn active_markets(&self) -> HashSet<String> {
        self.opportunities
            .iter()
            .map(|e| e.key().0.clone())
            .collect()
    }

    /// Background loop: periodic eviction sweep, stopping on shutdown.
    pub async fn run_eviction_loop(self: Arc<Self>, mut shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_expired(),
                _ = shutdown.wait_for_shutdown() => {
                    debug!("scanner eviction loop stopping on shutdown");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OrderBookCache;
    use crate::domain::{Book, BookSource, Level};
    use rust_decimal_macros::dec;

    fn pair() -> MarketPair {
        MarketPair {
            maker_market_id: "m1".into(),
            hedge_condition_id: "c1".into(),
            maker_yes_token_id: "my".into(),
            maker_no_token_id: "mn".into(),
            hedge_yes_token_id: "hy".into(),
            hedge_no_token_id: "hn".into(),
            fee_rate_bps: 0,
            tick_size: dec!(0.01),
            inverted: false,
            neg_risk: false,
            settlement_date: None,
        }
    }

    fn seed_books(cache: &OrderBookCache, pair: &MarketPair) {
        let mut maker_book = Book::new(&pair.maker_yes_token_id, BookSource::Ws);
        maker_book.set_levels(
            vec![Level { price: dec!(0.40), size: dec!(50) }],
            vec![Level { price: dec!(0.43), size: dec!(50) }],
            BookSource::Ws,
        );
        cache.ingest_ws(VenueRole::Maker, &pair.maker_yes_token_id, maker_book);

        // Pricing a YES opportunity lifts the hedge venue's NO book and vice
        // versa, so both complementary-side books need to be seeded.
        let mut hedge_no_book = Book::new(&pair.hedge_no_token_id, BookSource::Ws);
        hedge_no_book.set_levels(
            vec![Level { price: dec!(0.55), size: dec!(30) }],
            vec![Level { price: dec!(0.57), size: dec!(30) }],
            BookSource::Ws,
        );
        cache.ingest_ws(VenueRole::Hedge, &pair.hedge_no_token_id, hedge_no_book);

        let mut hedge_yes_book = Book::new(&pair.hedge_yes_token_id, BookSource::Ws);
        hedge_yes_book.set_levels(
            vec![Level { price: dec!(0.56), size: dec!(30) }],
            vec![Level { price: dec!(0.58), size: dec!(30) }],
            BookSource::Ws,
        );
        cache.ingest_ws(VenueRole::Hedge, &pair.hedge_yes_token_id, hedge_yes_book);
    }

    #[test]
    fn scan_produces_maker_opportunity_from_books() {
        let cache = Arc::new(OrderBookCache::new());
        let p = pair();
        seed_books(&cache, &p);

        let scanner = Scanner::new(cache, chrono::Duration::seconds(10));
        assert!(scanner.scan_pair(&p));

        let opp = scanner
            .get(&(p.maker_market_id.clone(), Side::Yes, Strategy::Maker))
            .unwrap();
        assert_eq!(opp.predict_price, dec!(0.40));
        assert_eq!(opp.hedge_price, dec!(0.57));
        assert!(opp.is_new);
    }

    #[test]
    fn throttle_suppresses_immediate_rescan() {
        let cache = Arc::new(OrderBookCache::new());
        let p = pair();
        seed_books(&cache, &p);

        let scanner = Scanner::new(cache, chrono::Duration::seconds(10));
        assert!(scanner.scan_pair(&p));
        assert!(!scanner.scan_pair(&p));
    }

    #[test]
    fn missing_hedge_book_evicts_existing_opportunity() {
        let cache = Arc::new(OrderBookCache::new());
        let p = pair();
        seed_books(&cache, &p);

        let scanner = Scanner::new(cache.clone(), chrono::Duration::seconds(10));
        scanner.scan_pair(&p);
        assert!(scanner
            .get(&(p.maker_market_id.clone(), Side::Yes, Strategy::Maker))
            .is_some());

        // Force past the throttle window and remove hedge book entirely by
        // letting the state go stale.
        std::thread::sleep(THROTTLE + Duration::from_millis(5));
        let stale_scanner = Scanner::new(cache, chrono::Duration::milliseconds(0));
        stale_scanner.scan_pair(&p);
        assert!(stale_scanner
            .get(&(p.maker_market_id.clone(), Side::Yes, Strategy::Maker))
            .is_none());
    }
}
