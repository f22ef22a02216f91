//! API key cooldown pool.
//!
//! Venues that hand out multiple API keys benefit from round-robin rotation
//! with a per-key cooldown after a 429, instead of a single shared key that
//! backs off the whole pool. This keeps the venue adapters issuing requests
//! instead of queuing behind one rate-limited credential (§4.1, §5).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Minimum back-off applied to a key after it receives an HTTP 429 (§5).
pub const MIN_COOLDOWN: Duration = Duration::from_secs(10);

struct KeySlot {
    label: String,
    cooldown_until_ms: AtomicU64,
}

/// Round-robin pool of API keys with per-key cooldown tracking.
///
/// `next()` skips any key still in its cooldown window, wrapping back to the
/// first non-cooling key found. If every key is cooling, it returns the one
/// closest to becoming available rather than failing outright.
pub struct KeyPool {
    keys: Vec<KeySlot>,
    cursor: AtomicU32,
}

impl KeyPool {
    pub fn new(labels: impl IntoIterator<Item = String>) -> Self {
        let keys: Vec<KeySlot> = labels
            .into_iter()
            .map(|label| KeySlot {
                label,
                cooldown_until_ms: AtomicU64::new(0),
            })
            .collect();
        assert!(!keys.is_empty(), "KeyPool requires at least one key");
        Self {
            keys,
            cursor: AtomicU32::new(0),
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Pick the next usable key label, advancing the round-robin cursor.
    pub fn next(&self) -> &str {
        let now = Self::now_ms();
        let len = self.keys.len() as u32;
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            let idx = ((start + offset) % len) as usize;
            if self.keys[idx].cooldown_until_ms.load(Ordering::Relaxed) <= now {
                return &self.keys[idx].label;
            }
        }

        debug!("all keys in cooldown, returning least-cooled");
        let idx = self
            .keys
            .iter()
            .enumerate()
            .min_by_key(|(_, k)| k.cooldown_until_ms.load(Ordering::Relaxed))
            .map(|(i, _)| i)
            .unwrap_or(0);
        &self.keys[idx].label
    }

    /// Record a 429 for `label`, putting it in cooldown for at least [`MIN_COOLDOWN`].
    pub fn mark_rate_limited(&self, label: &str, cooldown: Duration) {
        let cooldown = cooldown.max(MIN_COOLDOWN);
        let until = Self::now_ms() + cooldown.as_millis() as u64;
        if let Some(slot) = self.keys.iter().find(|k| k.label == label) {
            slot.cooldown_until_ms.store(until, Ordering::Relaxed);
            warn!(key = %label, cooldown_ms = cooldown.as_millis(), "key rate limited");
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub type SharedKeyPool = Arc<KeyPool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_keys() {
        let pool = KeyPool::new(["a".to_string(), "b".to_string(), "c".to_string()]);
        let seq: Vec<&str> = (0..6).map(|_| pool.next()).collect();
        assert_eq!(seq, vec!["b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn rate_limited_key_is_skipped_until_cooldown_elapses() {
        let pool = KeyPool::new(["a".to_string(), "b".to_string()]);
        pool.mark_rate_limited("a", Duration::from_secs(600));
        for _ in 0..4 {
            assert_eq!(pool.next(), "b");
        }
    }

    #[test]
    fn minimum_cooldown_is_enforced() {
        let pool = KeyPool::new(["a".to_string()]);
        pool.mark_rate_limited("a", Duration::from_millis(1));
        // Single key pool always returns its only key regardless of cooldown.
        assert_eq!(pool.next(), "a");
    }
}
