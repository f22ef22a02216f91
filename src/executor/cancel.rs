//! Per-task cancellation, layered on top of the process-wide
//! [`crate::coordination::ShutdownToken`] rather than replacing it.
//!
//! A task is stopped far more often than the whole process is: the user
//! cancels it, it expires, or shutdown asks every task to pause. Each of
//! those needs its own signal so the run loop can tell *why* it stopped and
//! react differently (cancelled vs. paused-for-resume). Modeled as a
//! `watch::channel` the same way [`crate::coordination::ShutdownToken`] is,
//! but scoped to one task and carrying a reason.

use tokio::sync::watch;

/// Why a task's run loop was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit user/API cancel request.
    UserCancel,
    /// `expires_at` reached.
    Expired,
    /// Process shutdown: pause rather than cancel, so the task resumes.
    Shutdown,
}

/// Owned by whoever spawned the task; `cancel()` is the only write.
pub struct TaskCancel {
    tx: watch::Sender<Option<CancelReason>>,
}

impl TaskCancel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn watch(&self) -> TaskCancelWatch {
        TaskCancelWatch {
            rx: self.tx.subscribe(),
        }
    }

    /// Idempotent: the first reason wins, later calls are ignored.
    pub fn cancel(&self, reason: CancelReason) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

impl Default for TaskCancel {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the task's run loop; cloneable so the loop can hand a copy to
/// helper futures (price guard, depth guard) without giving up its own.
#[derive(Clone)]
pub struct TaskCancelWatch {
    rx: watch::Receiver<Option<CancelReason>>,
}

impl TaskCancelWatch {
    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called, yielding the reason.
    /// Safe to call repeatedly or from multiple `select!` branches.
    pub async fn cancelled(&mut self) -> CancelReason {
        loop {
            if let Some(reason) = *self.rx.borrow() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped without ever cancelling; treat like a user
                // cancel so the loop still exits instead of spinning.
                return CancelReason::UserCancel;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_every_watcher() {
        let cancel = TaskCancel::new();
        let mut a = cancel.watch();
        let mut b = cancel.watch();
        cancel.cancel(CancelReason::Expired);
        assert_eq!(a.cancelled().await, CancelReason::Expired);
        assert_eq!(b.cancelled().await, CancelReason::Expired);
    }

    #[tokio::test]
    async fn first_reason_sticks() {
        let cancel = TaskCancel::new();
        cancel.cancel(CancelReason::UserCancel);
        cancel.cancel(CancelReason::Shutdown);
        assert_eq!(cancel.watch().reason(), Some(CancelReason::UserCancel));
    }
}
