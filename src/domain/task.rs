use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::opportunity::Strategy;
use super::{Side, TaskStatus};

/// Direction of the maker-venue leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    Buy,
    Sell,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Buy => write!(f, "BUY"),
            TaskType::Sell => write!(f, "SELL"),
        }
    }
}

/// Fields required to create a task, before idempotency hashing and defaulting (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    pub market_id: String,
    pub task_type: TaskType,
    pub strategy: Strategy,
    pub arb_side: Side,
    pub quantity: Decimal,
    pub predict_price: Decimal,
    /// BUY: max acceptable hedge ask. SELL: min acceptable hedge bid.
    pub hedge_price_limit: Decimal,
    /// Required for SELL tasks (cost basis of the position being closed).
    pub entry_cost: Option<Decimal>,
    /// TAKER-BUY requires this (current maker-venue ask) and `max_total_cost`.
    pub predict_ask_price: Option<Decimal>,
    pub max_total_cost: Option<Decimal>,
    /// TAKER-SELL additionally requires this.
    pub predict_bid_price: Option<Decimal>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TaskInput {
    /// Per-strategy required-field validation from §4.6's `create(input)` contract.
    pub fn validate(&self) -> Result<(), String> {
        match (self.strategy, self.task_type) {
            (Strategy::Taker, TaskType::Buy) => {
                if self.predict_ask_price.is_none() {
                    return Err("TAKER-BUY requires predict_ask_price".into());
                }
                if self.max_total_cost.is_none() {
                    return Err("TAKER-BUY requires max_total_cost".into());
                }
            }
            (Strategy::Taker, TaskType::Sell) => {
                if self.predict_bid_price.is_none() {
                    return Err("TAKER-SELL requires predict_bid_price".into());
                }
                if self.entry_cost.is_none() {
                    return Err("TAKER-SELL requires entry_cost".into());
                }
            }
            (Strategy::Maker, TaskType::Sell) => {
                if self.entry_cost.is_none() {
                    return Err("MAKER-SELL requires entry_cost".into());
                }
            }
            (Strategy::Maker, TaskType::Buy) => {}
        }
        if self.quantity <= Decimal::ZERO {
            return Err("quantity must be positive".into());
        }
        Ok(())
    }
}

/// Pure idempotency hash: `(market_id, type, price, qty, floor(now/10s))`, 16 hex
/// chars, no clock-dependent side effects beyond the bucket (§9).
pub fn idempotency_hash(
    market_id: &str,
    task_type: TaskType,
    price: Decimal,
    qty: Decimal,
    now: DateTime<Utc>,
) -> String {
    let bucket = now.timestamp() / 10;
    let mut hasher = Sha256::new();
    hasher.update(market_id.as_bytes());
    hasher.update(b"|");
    hasher.update(task_type.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(price.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(qty.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// A task's essential record (§3). Progress fields are maintained exclusively by
/// the executor; everything else is set at creation or by `update()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub market_id: String,
    pub task_type: TaskType,
    pub strategy: Strategy,
    pub arb_side: Side,

    pub quantity: Decimal,
    pub total_quantity: Decimal,
    pub predict_price: Decimal,
    pub hedge_price_limit: Decimal,
    pub entry_cost: Option<Decimal>,
    pub expires_at: Option<DateTime<Utc>>,

    pub predict_filled_qty: Decimal,
    pub hedged_qty: Decimal,
    pub remaining_qty: Decimal,
    pub avg_predict_price: Decimal,
    pub avg_hedge_price: Decimal,
    pub actual_profit: Decimal,
    pub unwind_loss: Decimal,

    pub current_order_hash: Option<String>,
    pub current_hedge_order_id: Option<String>,
    pub pause_count: u32,
    pub hedge_retry_count: u32,

    pub status: TaskStatus,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(input: TaskInput, now: DateTime<Utc>) -> Self {
        let id = idempotency_hash(
            &input.market_id,
            input.task_type,
            input.predict_price,
            input.quantity,
            now,
        );
        Self {
            id,
            market_id: input.market_id,
            task_type: input.task_type,
            strategy: input.strategy,
            arb_side: input.arb_side,
            quantity: input.quantity,
            total_quantity: input.quantity,
            predict_price: input.predict_price,
            hedge_price_limit: input.hedge_price_limit,
            entry_cost: input.entry_cost,
            expires_at: input.expires_at,
            predict_filled_qty: Decimal::ZERO,
            hedged_qty: Decimal::ZERO,
            remaining_qty: Decimal::ZERO,
            avg_predict_price: Decimal::ZERO,
            avg_hedge_price: Decimal::ZERO,
            actual_profit: Decimal::ZERO,
            unwind_loss: Decimal::ZERO,
            current_order_hash: None,
            current_hedge_order_id: None,
            pause_count: 0,
            hedge_retry_count: 0,
            status: TaskStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity used by §4.6/P3's "at most one active task per (market_id, type)".
    pub fn key(&self) -> (String, TaskType) {
        (self.market_id.clone(), self.task_type)
    }

    /// Check the at-rest invariants from §3. Never panics; callers decide what to
    /// do with a violation (typically: log loudly and move to `Failed`, §7).
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.predict_filled_qty > self.quantity {
            return Err(format!(
                "predict_filled_qty {} > quantity {}",
                self.predict_filled_qty, self.quantity
            ));
        }
        if self.quantity > self.total_quantity {
            return Err(format!(
                "quantity {} > total_quantity {}",
                self.quantity, self.total_quantity
            ));
        }
        if self.hedged_qty > self.predict_filled_qty {
            return Err(format!(
                "hedged_qty {} > predict_filled_qty {}",
                self.hedged_qty, self.predict_filled_qty
            ));
        }
        if self.remaining_qty != self.predict_filled_qty - self.hedged_qty {
            return Err(format!(
                "remaining_qty {} != predict_filled_qty {} - hedged_qty {}",
                self.remaining_qty, self.predict_filled_qty, self.hedged_qty
            ));
        }
        Ok(())
    }

    /// Apply a monotone fill increase. Returns the delta, or an error if fills
    /// would retreat (a `Logic` violation per §7).
    pub fn apply_predict_fill(&mut self, new_filled_qty: Decimal, now: DateTime<Utc>) -> Result<Decimal, String> {
        if new_filled_qty < self.predict_filled_qty {
            return Err(format!(
                "filled_qty retreated: {} -> {}",
                self.predict_filled_qty, new_filled_qty
            ));
        }
        let delta = new_filled_qty - self.predict_filled_qty;
        self.predict_filled_qty = new_filled_qty;
        self.remaining_qty = self.predict_filled_qty - self.hedged_qty;
        self.updated_at = now;
        Ok(delta)
    }

    pub fn apply_hedge_fill(&mut self, hedge_qty: Decimal, hedge_price: Decimal, now: DateTime<Utc>) {
        let prior_notional = self.avg_hedge_price * self.hedged_qty;
        self.hedged_qty += hedge_qty;
        if self.hedged_qty > Decimal::ZERO {
            self.avg_hedge_price = (prior_notional + hedge_price * hedge_qty) / self.hedged_qty;
        }
        self.remaining_qty = self.predict_filled_qty - self.hedged_qty;
        self.updated_at = now;
    }

    /// True once the unhedged residue is small enough to be accepted as dust (§4.7.4).
    pub fn is_hedge_complete(&self, min_hedge_qty: Decimal) -> bool {
        self.remaining_qty < min_hedge_qty
    }

    pub fn transition(&mut self, target: TaskStatus, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "invalid transition {} -> {} ({})",
                self.status,
                target,
                reason.into()
            ));
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_input() -> TaskInput {
        TaskInput {
            market_id: "m101".into(),
            task_type: TaskType::Buy,
            strategy: Strategy::Maker,
            arb_side: Side::Yes,
            quantity: dec!(10),
            predict_price: dec!(0.42),
            hedge_price_limit: dec!(0.56),
            entry_cost: None,
            predict_ask_price: None,
            max_total_cost: None,
            predict_bid_price: None,
            expires_at: None,
        }
    }

    #[test]
    fn idempotent_create_within_window_collapses_to_one_id() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let a = Task::new(sample_input(), t0);
        let b = Task::new(sample_input(), t0 + chrono::Duration::seconds(5));
        let c = Task::new(sample_input(), t0 + chrono::Duration::seconds(12));
        assert_eq!(a.id, b.id, "same 10s bucket collapses to one id");
        assert_ne!(a.id, c.id, "new bucket after 10s produces a new id");
    }
    use chrono::TimeZone;

    #[test]
    fn maker_sell_requires_entry_cost() {
        let mut input = sample_input();
        input.task_type = TaskType::Sell;
        assert!(input.validate().is_err());
        input.entry_cost = Some(dec!(0.40));
        assert!(input.validate().is_ok());
    }

    #[test]
    fn taker_buy_requires_ask_and_budget() {
        let mut input = sample_input();
        input.strategy = Strategy::Taker;
        assert!(input.validate().is_err());
        input.predict_ask_price = Some(dec!(0.43));
        input.max_total_cost = Some(dec!(1.0));
        assert!(input.validate().is_ok());
    }

    #[test]
    fn fill_must_not_retreat() {
        let now = Utc::now();
        let mut task = Task::new(sample_input(), now);
        task.apply_predict_fill(dec!(5), now).unwrap();
        assert!(task.apply_predict_fill(dec!(3), now).is_err());
    }

    #[test]
    fn invariants_hold_after_partial_hedge() {
        let now = Utc::now();
        let mut task = Task::new(sample_input(), now);
        task.apply_predict_fill(dec!(5), now).unwrap();
        task.apply_hedge_fill(dec!(3), dec!(0.55), now);
        assert!(task.check_invariants().is_ok());
        assert_eq!(task.remaining_qty, dec!(2));
        assert_eq!(task.avg_hedge_price, dec!(0.55));
    }

    #[test]
    fn dust_residue_is_accepted_as_hedge_complete() {
        let now = Utc::now();
        let mut task = Task::new(sample_input(), now);
        task.apply_predict_fill(dec!(10), now).unwrap();
        task.apply_hedge_fill(dec!(9.7), dec!(0.55), now);
        assert!(task.is_hedge_complete(dec!(1)));
    }
}
