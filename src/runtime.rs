//! Engine bootstrap: wires every component built elsewhere in this crate into
//! one running process and owns the shutdown sequence (§9's dependency
//! injection note — one `Engine` holds the `Arc`s, nothing here reaches for a
//! global).
//!
//! `bootstrap` constructs everything from [`AppConfig`]; `run` spawns the
//! background loops and blocks until [`GracefulShutdown::execute`] finishes.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::adapters::ChainFillWatcher;
use crate::cache::{OrderBookCache, OrderStatusCache};
use crate::config::AppConfig;
use crate::coordination::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownToken,
};
use crate::domain::{MarketPair, Side};
use crate::exchange::{self, VenueClient, VenueRole};
use crate::executor::{self, ExecutorContext, TaskCancel};
use crate::notify::WebhookNotifier;
use crate::scanner::Scanner;
use crate::services::{HealthServer, HealthState, Metrics};
use crate::store::TaskStore;
use crate::supervisor::{AlertManager, AlertManagerConfig};
use crate::Result;

/// Matched-pairs cache file consumed at startup (§6): the product of a
/// separate market-matching run, not refreshed by this process.
const MATCH_RESULT_FILE: &str = "polymarket-match-result.json";

/// Interval the task dispatch loop polls the store for newly created,
/// not-yet-running tasks. The store has no change-notification channel of
/// its own, so this is a plain poll rather than a subscription.
const TASK_DISPATCH_POLL: Duration = Duration::from_secs(2);

/// Fallback cadence for the maker/hedge REST book poll when no WS source is
/// wired for a venue (hedge venue always polls this way; maker venue falls
/// back to it when `orderbook_mode = "legacy"`).
fn rest_poll_interval(cfg: &AppConfig) -> Duration {
    Duration::from_millis(cfg.freshness.poll_ms)
}

/// Everything the running process needs, constructed once in [`bootstrap`].
pub struct Engine {
    pub config: AppConfig,
    pub store: Arc<TaskStore>,
    pub maker: Arc<dyn VenueClient>,
    pub hedge: Arc<dyn VenueClient>,
    pub book_cache: Arc<OrderBookCache>,
    pub order_status_cache: Arc<OrderStatusCache>,
    pub chain_fills: Arc<ChainFillWatcher>,
    pub alerts: Arc<AlertManager>,
    pub scanner: Arc<Scanner>,
    pub dashboard: Arc<crate::dashboard::Dashboard>,
    pub exposure: Arc<crate::exposure::ExposureMonitor>,
    pub health: Arc<HealthState>,
    pub metrics: Arc<Metrics>,
    pub shutdown: Arc<GracefulShutdown>,
    pub pairs: Vec<MarketPair>,
    /// Every token id this process cares about, mapped back to the owning
    /// pair, so a book-cache update event can find the `scan_pair` call it
    /// should trigger without scanning the whole pair list.
    token_to_pair: HashMap<String, MarketPair>,
    /// Live task executors, keyed by task id, so the dispatch loop doesn't
    /// double-spawn and shutdown can fan cancellation out to all of them.
    running: Mutex<HashMap<String, TaskCancel>>,
    accepting_new_tasks: std::sync::atomic::AtomicBool,
}

/// Build every component from `config`. Does not start any background loop —
/// call [`run`] for that.
pub async fn bootstrap(config: AppConfig) -> Result<Arc<Engine>> {
    let validation_errors = config.validate();
    if !validation_errors.is_empty() {
        for e in &validation_errors {
            error!(error = %e, "configuration invalid");
        }
        return Err(crate::EngineError::Config(validation_errors.join("; ")));
    }

    let data_dir = PathBuf::from(&config.runtime.data_dir).join(&config.runtime.account_name);
    let store = TaskStore::open(&data_dir).await?;

    let (maker, hedge) = exchange::build_venue_clients(&config).await?;

    let book_cache = Arc::new(OrderBookCache::new());
    let order_status_cache = Arc::new(OrderStatusCache::new());

    let chain_fills = Arc::new(build_chain_fill_watcher(&config)?);

    let mut alert_manager = AlertManager::new(AlertManagerConfig::default());
    if let Some(sink) = WebhookNotifier::from_env() {
        alert_manager = alert_manager.with_sink(sink);
    }
    let alerts = Arc::new(alert_manager);

    let scanner = Arc::new(Scanner::new(book_cache.clone(), config.freshness.stale_calc()));
    let dashboard = crate::dashboard::Dashboard::new(config.dashboard.api_token.clone());
    let exposure = Arc::new(crate::exposure::ExposureMonitor::new(
        store.clone(),
        alerts.clone(),
        config.exposure.clone(),
    ));

    let metrics = Metrics::new();
    let health = Arc::new(HealthState::new().with_metrics(metrics.clone()));

    let shutdown = Arc::new(GracefulShutdown::new(ShutdownConfig::default()));

    let pairs = load_market_pairs(&data_dir).unwrap_or_default();
    if pairs.is_empty() {
        warn!(
            path = %data_dir.join(MATCH_RESULT_FILE).display(),
            "no matched market pairs found; scanner has nothing to watch until one is provided"
        );
    }
    let token_to_pair = index_pairs_by_token(&pairs);

    Ok(Arc::new(Engine {
        config,
        store,
        maker,
        hedge,
        book_cache,
        order_status_cache,
        chain_fills,
        alerts,
        scanner,
        dashboard,
        exposure,
        health,
        metrics,
        shutdown,
        pairs,
        token_to_pair,
        running: Mutex::new(HashMap::new()),
        accepting_new_tasks: std::sync::atomic::AtomicBool::new(true),
    }))
}

/// In dry run (or absent credentials) the chain watcher still runs — against
/// a public RPC, watching an all-zero address — so `ExecutorContext` always
/// has a real `Arc<ChainFillWatcher>` to hold rather than an `Option` every
/// call site must unwrap.
fn build_chain_fill_watcher(config: &AppConfig) -> Result<ChainFillWatcher> {
    use alloy::primitives::Address;

    let rpc_url = std::env::var("POLYGON_RPC_URL").unwrap_or_else(|_| "https://polygon-rpc.com".to_string());

    if config.runtime.dry_run {
        return ChainFillWatcher::new(&rpc_url, Address::ZERO);
    }

    let wallet = crate::signing::Wallet::from_env(crate::adapters::polymarket_clob::POLYGON_CHAIN_ID)?;
    ChainFillWatcher::new(&rpc_url, wallet.address())
}

fn load_market_pairs(data_dir: &std::path::Path) -> Option<Vec<MarketPair>> {
    let path = data_dir.join(MATCH_RESULT_FILE);
    let bytes = std::fs::read(&path).ok()?;
    match serde_json::from_slice::<Vec<MarketPair>>(&bytes) {
        Ok(pairs) => {
            info!(count = pairs.len(), path = %path.display(), "loaded matched market pairs");
            Some(pairs)
        }
        Err(e) => {
            error!(error = %e, path = %path.display(), "failed to parse matched market pairs");
            None
        }
    }
}

fn index_pairs_by_token(pairs: &[MarketPair]) -> HashMap<String, MarketPair> {
    let mut map = HashMap::new();
    for pair in pairs {
        map.insert(pair.maker_token_id(Side::Yes).to_string(), pair.clone());
        map.insert(pair.maker_token_id(Side::No).to_string(), pair.clone());
        map.insert(pair.hedge_token_id(Side::Yes).to_string(), pair.clone());
        map.insert(pair.hedge_token_id(Side::No).to_string(), pair.clone());
    }
    map
}

impl Engine {
    fn executor_context(self: &Arc<Self>) -> Arc<ExecutorContext> {
        Arc::new(ExecutorContext {
            store: self.store.clone(),
            maker: self.maker.clone(),
            hedge: self.hedge.clone(),
            book_cache: self.book_cache.clone(),
            order_status_cache: self.order_status_cache.clone(),
            chain_fills: self.chain_fills.clone(),
            alerts: self.alerts.clone(),
            hedge_cfg: self.config.hedge.clone(),
            freshness_cfg: self.config.freshness.clone(),
            shutdown: self.shutdown.clone(),
        })
    }

    /// REST pre-warm + steady poll for every token this process watches on
    /// `role`. Used unconditionally for the hedge venue (no WS adapter exists
    /// for it yet) and for the maker venue when `orderbook_mode = "legacy"`.
    async fn run_rest_book_poll(self: Arc<Self>, role: VenueRole, mut shutdown: ShutdownToken) {
        let client: Arc<dyn VenueClient> = match role {
            VenueRole::Maker => self.maker.clone(),
            VenueRole::Hedge => self.hedge.clone(),
        };
        let tokens: Vec<String> = self
            .pairs
            .iter()
            .flat_map(|p| match role {
                VenueRole::Maker => vec![
                    p.maker_token_id(Side::Yes).to_string(),
                    p.maker_token_id(Side::No).to_string(),
                ],
                VenueRole::Hedge => vec![
                    p.hedge_token_id(Side::Yes).to_string(),
                    p.hedge_token_id(Side::No).to_string(),
                ],
            })
            .collect();

        let mut ticker = tokio::time::interval(rest_poll_interval(&self.config));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for token_id in &tokens {
                        match client.get_book(token_id).await {
                            Ok(Some(book)) => self.book_cache.ingest_rest(role, token_id, book),
                            Ok(None) => debug!(token_id, %role, "no book returned on REST poll"),
                            Err(e) => warn!(token_id, %role, error = %e, "REST book poll failed"),
                        }
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    debug!(%role, "REST book poll loop stopping on shutdown");
                    break;
                }
            }
        }
    }

    /// Maker-venue WS book/user-event adapter, feeding `book_cache` on every
    /// delta. Only started when `maker_venue.orderbook_mode = "ws"`.
    async fn run_maker_ws(self: Arc<Self>, shutdown: ShutdownToken) {
        let ws = Arc::new(crate::adapters::PolymarketWebSocket::new(&self.config.maker_venue.ws_url));
        for pair in &self.pairs {
            ws.add_token(pair.maker_token_id(Side::Yes)).await;
            ws.add_token(pair.maker_token_id(Side::No)).await;
        }

        let mut books = ws.subscribe_books();
        let book_cache = self.book_cache.clone();
        let health = self.health.clone();
        tokio::spawn(async move {
            while let Ok(update) = books.recv().await {
                health.record_maker_ws_message().await;
                book_cache.ingest_ws(VenueRole::Maker, &update.token_id, update.book);
            }
        });

        self.health.set_maker_ws_connected(true);
        ws.run(shutdown).await;
        self.health.set_maker_ws_connected(false);
    }

    /// Every book-cache delta that touches a watched token re-scans that
    /// token's pair, rather than re-scanning the whole pair list on a timer —
    /// recomputation tracks the WS delta that caused it (§4.4).
    async fn run_scan_dispatch(self: Arc<Self>, mut shutdown: ShutdownToken) {
        let mut updates = self.book_cache.onupdate();
        loop {
            tokio::select! {
                event = updates.recv() => {
                    match event {
                        Ok(event) => {
                            if let Some(pair) = self.token_to_pair.get(&event.token_id) {
                                if self.scanner.scan_pair(pair) {
                                    let snapshot = self.scanner.snapshot();
                                    self.metrics.inc_opportunities();
                                    self.dashboard.publish_opportunity_batches(&snapshot);
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "scan dispatch lagging book-cache updates");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    debug!("scan dispatch loop stopping on shutdown");
                    break;
                }
            }
        }
    }

    /// Scans every pair once at startup so the first dashboard snapshot isn't
    /// empty while waiting on the first WS/REST delta.
    async fn initial_scan(&self) {
        for pair in &self.pairs {
            self.scanner.scan_pair(pair);
        }
        self.dashboard.publish_opportunity_batches(&self.scanner.snapshot());
    }

    /// Polls the store for newly created, non-terminal tasks with no running
    /// executor and spawns one for each. The store has no task-created
    /// channel of its own (§4.6 leaves dispatch to the caller), so this is a
    /// plain poll rather than a subscription.
    async fn run_task_dispatch(self: Arc<Self>, mut shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(TASK_DISPATCH_POLL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.accepting_new_tasks.load(std::sync::atomic::Ordering::SeqCst) {
                        self.dispatch_new_tasks().await;
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    debug!("task dispatch loop stopping on shutdown");
                    break;
                }
            }
        }
    }

    async fn dispatch_new_tasks(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        for task in self.store.list() {
            if task.status.is_terminal() {
                continue;
            }
            if running.contains_key(&task.id) {
                continue;
            }
            let ctx = self.executor_context();
            let cancel = executor::spawn(ctx, task.id.clone());
            self.metrics.inc_tasks_created();
            running.insert(task.id, cancel);
        }
    }

    /// Recovers every task left in a non-terminal state by a prior process
    /// exit (§4.7.1) and spawns its executor immediately, before the regular
    /// dispatch poll would notice it.
    async fn recover_tasks(self: &Arc<Self>) {
        let recoverable = self.store.get_recoverable();
        if recoverable.is_empty() {
            return;
        }
        info!(count = recoverable.len(), "recovering in-flight tasks from prior run");
        let mut running = self.running.lock().await;
        for task in recoverable {
            let ctx = self.executor_context();
            let cancel = executor::spawn(ctx, task.id.clone());
            running.insert(task.id, cancel);
        }
    }

    /// Cancels every live task executor with [`executor::CancelReason::Shutdown`]
    /// and waits (bounded by the caller's timeout) until each has reached a
    /// terminal or paused state in the store. Returns whether every task
    /// drained before the deadline.
    async fn drain_tasks(self: &Arc<Self>) -> bool {
        let ids: Vec<String> = {
            let running = self.running.lock().await;
            for cancel in running.values() {
                cancel.cancel(executor::CancelReason::Shutdown);
            }
            running.keys().cloned().collect()
        };

        if ids.is_empty() {
            return true;
        }

        let mut poll = tokio::time::interval(Duration::from_millis(250));
        loop {
            poll.tick().await;
            let all_settled = ids.iter().all(|id| {
                self.store
                    .get(id)
                    .map(|t| t.status.is_terminal() || t.status == crate::domain::TaskStatus::Paused)
                    .unwrap_or(true)
            });
            if all_settled {
                return true;
            }
        }
    }
}

/// Start every background loop, install OS signal handlers, and block until
/// the shutdown sequence (stop → drain → checkpoint → close WS → flush) has
/// run to completion.
pub async fn run(engine: Arc<Engine>) -> Result<()> {
    engine.recover_tasks().await;
    engine.initial_scan().await;

    install_signal_handlers(engine.shutdown.clone()).await;

    let health_server = HealthServer::new(engine.health.clone(), engine.config.runtime.health_port);
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!(error = %e, "health server exited");
        }
    });

    {
        let dashboard = engine.dashboard.clone();
        let port = engine.config.dashboard.port;
        tokio::spawn(async move {
            if let Err(e) = dashboard.run_server(port).await {
                error!(error = %e, "dashboard server exited");
            }
        });
    }
    tokio::spawn(engine.dashboard.clone().run_flush_loop(engine.shutdown.token()));

    tokio::spawn(
        engine
            .order_status_cache
            .clone()
            .run(engine.maker.clone(), rest_poll_interval(&engine.config), engine.shutdown.token()),
    );

    tokio::spawn(engine.chain_fills.clone().run(engine.shutdown.token()));
    tokio::spawn(engine.scanner.clone().run_eviction_loop(engine.shutdown.token()));
    tokio::spawn(engine.exposure.clone().run(engine.shutdown.token()));
    tokio::spawn(engine.clone().run_scan_dispatch(engine.shutdown.token()));
    tokio::spawn(engine.clone().run_task_dispatch(engine.shutdown.token()));

    if engine.config.maker_venue.orderbook_mode == "ws" {
        tokio::spawn(engine.clone().run_maker_ws(engine.shutdown.token()));
    } else {
        tokio::spawn(engine.clone().run_rest_book_poll(VenueRole::Maker, engine.shutdown.token()));
    }

    if engine.config.hedge_venue.orderbook_source != "rest" {
        debug!("hedge-venue WS orderbook source is not implemented; falling back to REST polling");
    }
    tokio::spawn(engine.clone().run_rest_book_poll(VenueRole::Hedge, engine.shutdown.token()));

    engine.health.record_store_write(true).await;
    engine.alerts.info("engine", "startup", "xvenue-arb engine started").await;

    let mut shutdown_signal_rx = engine.shutdown.subscribe();
    shutdown_signal_rx.recv().await.ok();

    let result = {
        let engine_stop = engine.clone();
        let engine_drain = engine.clone();
        let engine_flush = engine.clone();

        engine
            .shutdown
            .execute(
                move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
                    Box::pin(async move {
                        engine_stop
                            .accepting_new_tasks
                            .store(false, std::sync::atomic::Ordering::SeqCst);
                    })
                },
                move || -> Pin<Box<dyn Future<Output = bool> + Send>> {
                    Box::pin(async move { engine_drain.drain_tasks().await })
                },
                move || -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>> {
                    Box::pin(async move { Ok(()) })
                },
                move || -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(async move {}) },
                move || -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>> {
                    Box::pin(async move {
                        engine_flush.store.list();
                        Ok(())
                    })
                },
            )
            .await
    };

    if let Err(e) = result {
        error!(error = %e, "shutdown sequence did not complete cleanly");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
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

    #[test]
    fn index_pairs_by_token_covers_all_four_tokens() {
        let pairs = vec![pair()];
        let index = index_pairs_by_token(&pairs);
        assert_eq!(index.len(), 4);
        assert!(index.contains_key("my"));
        assert!(index.contains_key("hn"));
    }

    #[test]
    fn load_market_pairs_missing_file_returns_none() {
        let dir = std::env::temp_dir().join(format!("xvenue-runtime-test-{}", uuid::Uuid::new_v4()));
        assert!(load_market_pairs(&dir).is_none());
    }

    #[test]
    fn load_market_pairs_reads_persisted_cache() {
        let dir = std::env::temp_dir().join(format!("xvenue-runtime-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let pairs = vec![pair()];
        std::fs::write(dir.join(MATCH_RESULT_FILE), serde_json::to_vec(&pairs).unwrap()).unwrap();
        let loaded = load_market_pairs(&dir).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].maker_market_id, "m1");
    }
}
