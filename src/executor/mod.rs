//! Per-task execution: the state machine, guards, and hedging pipeline
//! described in §4.7. [`context::ExecutorContext`] is the dependency bundle
//! every spawned task's run loop (`run::run_task`) closes over; [`cancel`]
//! layers per-task stop signals on top of the process-wide shutdown token.

pub mod cancel;
pub mod context;
pub mod delayed_fill;
pub mod guard;
pub mod hedging;
pub mod run;
pub mod submission;

pub use cancel::{CancelReason, TaskCancel, TaskCancelWatch};
pub use context::ExecutorContext;
pub use run::run_task;

use std::sync::Arc;
use tracing::info;

/// Spawn a task's run loop and return the [`TaskCancel`] handle the caller
/// uses to cancel it (user request, expiry, or shutdown fan-out).
pub fn spawn(ctx: Arc<ExecutorContext>, task_id: String) -> TaskCancel {
    let cancel = TaskCancel::new();
    let watch = cancel.watch();
    info!(task_id, "spawning task executor");
    tokio::spawn(run_task(ctx, task_id, watch));
    cancel
}
