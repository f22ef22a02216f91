use serde::{Deserialize, Serialize};
use std::fmt;

/// Task execution state machine (spec §4.7).
///
/// ```text
/// PENDING -> PREDICT_SUBMITTED -> PARTIALLY_FILLED -> HEDGING -> COMPLETED
///                  |                     |                |
///                  v                     v                v
///               PAUSED <--------------- (guard trigger)  HEDGE_FAILED
///                  |
///                  v
///      TIMEOUT_CANCELLED | CANCELLED | FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created, not yet submitted to the maker venue.
    Pending,
    /// Maker order resting (or in-flight for TAKER mode).
    PredictSubmitted,
    /// Maker order has at least one fill, not yet fully filled.
    PartiallyFilled,
    /// Actively running the hedge pipeline against accumulated fills.
    Hedging,
    /// Price or depth guard tripped; maker order cancelled, awaiting resume or abandonment.
    Paused,
    /// All filled quantity hedged, maker order fully filled or accepted as hedge-complete.
    Completed,
    /// Order placement failed or an invariant was violated.
    Failed,
    /// User-initiated cancellation.
    Cancelled,
    /// `expiresAt` reached before completion.
    TimeoutCancelled,
    /// Hedge retries exhausted with unhedged quantity remaining. Terminal, no auto-reversal.
    HedgeFailed,
    /// Reserved: no automatic unwind path emits this state (§9 open question).
    UnwindCompleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::PredictSubmitted => "PREDICT_SUBMITTED",
            TaskStatus::PartiallyFilled => "PARTIALLY_FILLED",
            TaskStatus::Hedging => "HEDGING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::TimeoutCancelled => "TIMEOUT_CANCELLED",
            TaskStatus::HedgeFailed => "HEDGE_FAILED",
            TaskStatus::UnwindCompleted => "UNWIND_COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::TimeoutCancelled
                | TaskStatus::HedgeFailed
                | TaskStatus::UnwindCompleted
        )
    }

    /// States counted as "mid-flight" for §4.6 `getRecoverable()` startup recovery.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending
                | TaskStatus::PredictSubmitted
                | TaskStatus::PartiallyFilled
                | TaskStatus::Hedging
                | TaskStatus::Paused
        )
    }

    pub fn has_live_maker_order(&self) -> bool {
        matches!(
            self,
            TaskStatus::PredictSubmitted | TaskStatus::PartiallyFilled | TaskStatus::Hedging
        )
    }

    /// Valid transitions for the state machine in §4.7. `UnwindCompleted` has no
    /// producing arm anywhere — it is retained in the enum as reserved only (§9).
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, target) {
            (Pending, PredictSubmitted) => true,
            (Pending, Failed) => true,
            (Pending, Cancelled) => true,

            (PredictSubmitted, PartiallyFilled) => true,
            (PredictSubmitted, Hedging) => true,
            (PredictSubmitted, Completed) => true,
            (PredictSubmitted, Paused) => true,
            (PredictSubmitted, Failed) => true,
            (PredictSubmitted, Cancelled) => true,
            (PredictSubmitted, TimeoutCancelled) => true,

            (PartiallyFilled, Hedging) => true,
            (PartiallyFilled, Paused) => true,
            (PartiallyFilled, Completed) => true,
            (PartiallyFilled, Failed) => true,
            (PartiallyFilled, Cancelled) => true,
            (PartiallyFilled, TimeoutCancelled) => true,

            (Hedging, PartiallyFilled) => true,
            (Hedging, Hedging) => true,
            (Hedging, Completed) => true,
            (Hedging, Paused) => true,
            (Hedging, HedgeFailed) => true,
            (Hedging, Cancelled) => true,
            (Hedging, TimeoutCancelled) => true,

            // Resume: back to submission for the remaining quantity.
            (Paused, PredictSubmitted) => true,
            (Paused, Failed) => true,
            (Paused, Cancelled) => true,
            (Paused, TimeoutCancelled) => true,

            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "PREDICT_SUBMITTED" => Ok(TaskStatus::PredictSubmitted),
            "PARTIALLY_FILLED" => Ok(TaskStatus::PartiallyFilled),
            "HEDGING" => Ok(TaskStatus::Hedging),
            "PAUSED" => Ok(TaskStatus::Paused),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            "TIMEOUT_CANCELLED" => Ok(TaskStatus::TimeoutCancelled),
            "HEDGE_FAILED" => Ok(TaskStatus::HedgeFailed),
            "UNWIND_COMPLETED" => Ok(TaskStatus::UnwindCompleted),
            _ => Err(format!("unknown task status: {}", s)),
        }
    }
}

/// A recorded state transition, used for the per-task append-only event log (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StateTransition {
    pub fn new(from: TaskStatus, to: TaskStatus, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn happy_path_transitions_are_valid() {
        assert!(Pending.can_transition_to(PredictSubmitted));
        assert!(PredictSubmitted.can_transition_to(PartiallyFilled));
        assert!(PartiallyFilled.can_transition_to(Hedging));
        assert!(Hedging.can_transition_to(Completed));
    }

    #[test]
    fn price_guard_pause_and_resume_round_trips() {
        assert!(PredictSubmitted.can_transition_to(Paused));
        assert!(Paused.can_transition_to(PredictSubmitted));
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for terminal in [Completed, Failed, Cancelled, TimeoutCancelled, HedgeFailed] {
            assert!(terminal.is_terminal());
            for target in [Pending, PredictSubmitted, PartiallyFilled, Hedging, Paused] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn unwind_completed_is_reserved_and_unreachable() {
        for from in [
            Pending,
            PredictSubmitted,
            PartiallyFilled,
            Hedging,
            Paused,
        ] {
            assert!(!from.can_transition_to(UnwindCompleted));
        }
    }

    #[test]
    fn recoverable_states_match_mid_flight_statuses() {
        assert!(Pending.is_recoverable());
        assert!(PredictSubmitted.is_recoverable());
        assert!(PartiallyFilled.is_recoverable());
        assert!(Hedging.is_recoverable());
        assert!(Paused.is_recoverable());
        assert!(!Completed.is_recoverable());
    }

    #[test]
    fn status_round_trips_through_display_and_try_from() {
        for s in [
            Pending,
            PredictSubmitted,
            PartiallyFilled,
            Hedging,
            Paused,
            Completed,
            Failed,
            Cancelled,
            TimeoutCancelled,
            HedgeFailed,
            UnwindCompleted,
        ] {
            let rendered = s.to_string();
            assert_eq!(TaskStatus::try_from(rendered.as_str()).unwrap(), s);
        }
    }
}
