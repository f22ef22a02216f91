//! Price guard and depth guard (§4.7.2, §4.7.3): the two watchers that run
//! alongside a resting maker order and can pull it before it fills at a price
//! that's no longer profitable.
//!
//! Both are expressed as pure decision functions over a snapshot plus a
//! little bit of guard-local state, so the run loop just samples the venue,
//! calls the decision function, and acts on the result — the actual
//! sampling and cancel/resubmit side effects stay in `run.rs`.

use rust_decimal::Decimal;
use std::time::{Duration, Instant};

/// Hedge-side depth at the task's limit price. A failed depth read is a
/// distinct "unknown" state (§4.7.3) — it must never be treated as zero,
/// which would otherwise look identical to the book having gone dry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthSignal {
    Known(Decimal),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthAction {
    /// Depth is adequate, or we're within cooldown of the last change — do nothing.
    Hold,
    /// Depth fell below what the remaining quantity needs; pause submission.
    Shrink,
    /// Depth recovered after a prior shrink and cooldown has elapsed; resume.
    Expand,
    /// Depth read failed; skip this cycle rather than acting on a zero.
    SkipUnknown,
}

/// §4.7.2: the hedge venue's current opposite-side price has moved past the
/// task's acceptable limit. `current` and `limit` are both already oriented
/// so that breach means "more expensive to hedge than we can afford".
pub fn price_breached(current: Decimal, limit: Decimal) -> bool {
    current > limit
}

/// §4.7.3 depth-guard state machine. `paused` is the guard's own idea of
/// whether it last shrank (distinct from the task's overall `Paused` status,
/// which also covers price-guard pauses); `cooldown` prevents flapping
/// between shrink and expand on a noisy book.
pub fn depth_guard_decision(
    depth: DepthSignal,
    required_qty: Decimal,
    paused: bool,
    last_change: Option<Instant>,
    cooldown: Duration,
    now: Instant,
) -> DepthAction {
    let Some(elapsed_ok) = last_change.map(|t| now.duration_since(t) >= cooldown).or(Some(true)) else {
        return DepthAction::Hold;
    };

    match depth {
        DepthSignal::Unknown => DepthAction::SkipUnknown,
        DepthSignal::Known(available) => {
            let adequate = available >= required_qty;
            match (paused, adequate, elapsed_ok) {
                (false, false, _) => DepthAction::Shrink,
                (true, true, true) => DepthAction::Expand,
                _ => DepthAction::Hold,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_breach_is_strict_excess_over_limit() {
        assert!(price_breached(dec!(0.61), dec!(0.60)));
        assert!(!price_breached(dec!(0.60), dec!(0.60)));
        assert!(!price_breached(dec!(0.59), dec!(0.60)));
    }

    #[test]
    fn depth_shrinks_when_available_falls_short() {
        let action = depth_guard_decision(
            DepthSignal::Known(dec!(5)),
            dec!(10),
            false,
            None,
            Duration::from_secs(10),
            Instant::now(),
        );
        assert_eq!(action, DepthAction::Shrink);
    }

    #[test]
    fn depth_holds_during_cooldown_even_if_recovered() {
        let now = Instant::now();
        let action = depth_guard_decision(
            DepthSignal::Known(dec!(20)),
            dec!(10),
            true,
            Some(now),
            Duration::from_secs(10),
            now,
        );
        assert_eq!(action, DepthAction::Hold);
    }

    #[test]
    fn depth_expands_after_cooldown_elapses() {
        let last_change = Instant::now() - Duration::from_secs(11);
        let action = depth_guard_decision(
            DepthSignal::Known(dec!(20)),
            dec!(10),
            true,
            Some(last_change),
            Duration::from_secs(10),
            Instant::now(),
        );
        assert_eq!(action, DepthAction::Expand);
    }

    #[test]
    fn unknown_depth_never_reads_as_shrink() {
        let action = depth_guard_decision(
            DepthSignal::Unknown,
            dec!(10),
            false,
            None,
            Duration::from_secs(10),
            Instant::now(),
        );
        assert_eq!(action, DepthAction::SkipUnknown);
    }
}
