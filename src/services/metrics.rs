//! In-process counters exposed over the Prometheus text format (§4.1 ambient
//! observability; grounded in the teacher's `services::health` metrics block).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Process-wide counters updated by the cache, scanner, and executor.
pub struct Metrics {
    pub book_updates: AtomicU64,
    pub ws_reconnections: AtomicU64,
    pub opportunities_found: AtomicU64,
    pub tasks_created: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_hedge_failed: AtomicU64,
    pub tasks_paused: AtomicU64,
    pub maker_orders_submitted: AtomicU64,
    pub hedge_orders_submitted: AtomicU64,
    pub hedge_retries: AtomicU64,
    current_state: RwLock<String>,
    last_update: RwLock<chrono::DateTime<chrono::Utc>>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            book_updates: AtomicU64::new(0),
            ws_reconnections: AtomicU64::new(0),
            opportunities_found: AtomicU64::new(0),
            tasks_created: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_hedge_failed: AtomicU64::new(0),
            tasks_paused: AtomicU64::new(0),
            maker_orders_submitted: AtomicU64::new(0),
            hedge_orders_submitted: AtomicU64::new(0),
            hedge_retries: AtomicU64::new(0),
            current_state: RwLock::new("starting".to_string()),
            last_update: RwLock::new(chrono::Utc::now()),
        })
    }

    pub fn inc_book_updates(&self) {
        self.book_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnections(&self) {
        self.ws_reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_opportunities(&self) {
        self.opportunities_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_hedge_failed(&self) {
        self.tasks_hedge_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_paused(&self) {
        self.tasks_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_maker_orders(&self) {
        self.maker_orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hedge_orders(&self) {
        self.hedge_orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hedge_retries(&self) {
        self.hedge_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn set_state(&self, state: impl Into<String>) {
        *self.current_state.write().await = state.into();
        *self.last_update.write().await = chrono::Utc::now();
    }

    pub async fn summary(&self) -> String {
        format!(
            "state={} book_updates={} opportunities={} tasks_created={} tasks_completed={} tasks_paused={} tasks_hedge_failed={} maker_orders={} hedge_orders={} hedge_retries={} ws_reconnections={}",
            self.current_state.read().await,
            self.book_updates.load(Ordering::Relaxed),
            self.opportunities_found.load(Ordering::Relaxed),
            self.tasks_created.load(Ordering::Relaxed),
            self.tasks_completed.load(Ordering::Relaxed),
            self.tasks_paused.load(Ordering::Relaxed),
            self.tasks_hedge_failed.load(Ordering::Relaxed),
            self.maker_orders_submitted.load(Ordering::Relaxed),
            self.hedge_orders_submitted.load(Ordering::Relaxed),
            self.hedge_retries.load(Ordering::Relaxed),
            self.ws_reconnections.load(Ordering::Relaxed),
        )
    }

    pub fn prometheus(&self) -> String {
        format!(
            r#"# HELP xvenue_book_updates_total Order book updates ingested
# TYPE xvenue_book_updates_total counter
xvenue_book_updates_total {}

# HELP xvenue_ws_reconnections_total WebSocket reconnections
# TYPE xvenue_ws_reconnections_total counter
xvenue_ws_reconnections_total {}

# HELP xvenue_opportunities_found_total Opportunities discovered by the scanner
# TYPE xvenue_opportunities_found_total counter
xvenue_opportunities_found_total {}

# HELP xvenue_tasks_created_total Tasks created
# TYPE xvenue_tasks_created_total counter
xvenue_tasks_created_total {}

# HELP xvenue_tasks_completed_total Tasks reaching COMPLETED
# TYPE xvenue_tasks_completed_total counter
xvenue_tasks_completed_total {}

# HELP xvenue_tasks_paused_total Tasks paused by a guard trip
# TYPE xvenue_tasks_paused_total counter
xvenue_tasks_paused_total {}

# HELP xvenue_tasks_hedge_failed_total Tasks reaching HEDGE_FAILED
# TYPE xvenue_tasks_hedge_failed_total counter
xvenue_tasks_hedge_failed_total {}

# HELP xvenue_maker_orders_submitted_total Maker-venue limit orders submitted
# TYPE xvenue_maker_orders_submitted_total counter
xvenue_maker_orders_submitted_total {}

# HELP xvenue_hedge_orders_submitted_total Hedge-venue IOC/FOK orders submitted
# TYPE xvenue_hedge_orders_submitted_total counter
xvenue_hedge_orders_submitted_total {}

# HELP xvenue_hedge_retries_total Hedge retry attempts
# TYPE xvenue_hedge_retries_total counter
xvenue_hedge_retries_total {}
"#,
            self.book_updates.load(Ordering::Relaxed),
            self.ws_reconnections.load(Ordering::Relaxed),
            self.opportunities_found.load(Ordering::Relaxed),
            self.tasks_created.load(Ordering::Relaxed),
            self.tasks_completed.load(Ordering::Relaxed),
            self.tasks_paused.load(Ordering::Relaxed),
            self.tasks_hedge_failed.load(Ordering::Relaxed),
            self.maker_orders_submitted.load(Ordering::Relaxed),
            self.hedge_orders_submitted.load(Ordering::Relaxed),
            self.hedge_retries.load(Ordering::Relaxed),
        )
    }

    pub async fn log_status(&self) {
        info!(summary = %self.summary().await, "metrics snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_increment_independently() {
        let m = Metrics::new();
        m.inc_book_updates();
        m.inc_book_updates();
        m.inc_tasks_created();
        assert_eq!(m.book_updates.load(Ordering::Relaxed), 2);
        assert_eq!(m.tasks_created.load(Ordering::Relaxed), 1);
        assert_eq!(m.tasks_completed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn summary_reflects_current_state() {
        let m = Metrics::new();
        m.set_state("scanning").await;
        let s = m.summary().await;
        assert!(s.contains("state=scanning"));
    }
}
