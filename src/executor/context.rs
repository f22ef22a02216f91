//! Dependency bundle handed to every spawned task, instead of reaching for
//! global singletons (§9 design note: DI over globals).

use std::sync::Arc;

use crate::adapters::ChainFillWatcher;
use crate::cache::{SharedOrderBookCache, SharedOrderStatusCache};
use crate::config::{FreshnessConfig, HedgeConfig};
use crate::coordination::GracefulShutdown;
use crate::exchange::VenueClient;
use crate::store::TaskStore;
use crate::supervisor::AlertManager;

/// Everything a task's run loop needs, cloned cheaply (it's all `Arc`s) into
/// the spawned future.
pub struct ExecutorContext {
    pub store: Arc<TaskStore>,
    pub maker: Arc<dyn VenueClient>,
    pub hedge: Arc<dyn VenueClient>,
    pub book_cache: SharedOrderBookCache,
    pub order_status_cache: SharedOrderStatusCache,
    pub chain_fills: Arc<ChainFillWatcher>,
    pub alerts: Arc<AlertManager>,
    pub hedge_cfg: HedgeConfig,
    pub freshness_cfg: FreshnessConfig,
    /// Minting a fresh [`crate::coordination::ShutdownToken`] per subscriber
    /// is cheap and the token itself isn't `Clone`, so tasks hold the
    /// `GracefulShutdown` and call `.token()` when they need one.
    pub shutdown: Arc<GracefulShutdown>,
}
