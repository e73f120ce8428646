//! Rate Limiter / Authorizer (component D).
//!
//! The limiter's state is in-memory only — advisory, not persisted across
//! restarts.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Commands exempt from rate limiting and processed even if the sender is
/// mid-cooldown: discovery and notice reads must always work.
pub fn is_bypass(normalized: &str) -> bool {
    matches!(normalized, "?" | "menu" | "??" | "help") || normalized.starts_with("info")
}

/// Per-sender cooldown tracker. Not persisted; reset on restart.
pub struct RateLimiter {
    rate_secs: u64,
    last_accepted: Mutex<HashMap<String, i64>>,
}

impl RateLimiter {
    pub fn new(rate_secs: u64) -> Self {
        Self {
            rate_secs,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` and records `now` if `sender` is allowed to proceed;
    /// returns `false` (sender stays suppressed) otherwise.
    pub fn allow(&self, sender: &str, now: i64) -> bool {
        let mut map = self.last_accepted.lock().unwrap();
        match map.get(sender) {
            Some(&last) if now.saturating_sub(last) < self.rate_secs as i64 => false,
            _ => {
                map.insert(sender.to_string(), now);
                true
            }
        }
    }
}

/// Bounded FIFO of recent packet discriminators, used by Packet Intake to
/// deduplicate packets delivered on both the callback and pub/sub paths.
pub struct DedupWindow {
    capacity: usize,
    seen: Mutex<(VecDeque<String>, std::collections::HashSet<String>)>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: Mutex::new((VecDeque::new(), std::collections::HashSet::new())),
        }
    }

    /// Returns `true` if `key` was already seen (i.e. this packet should be
    /// dropped as a duplicate); otherwise records it and returns `false`.
    pub fn seen_or_insert(&self, key: String) -> bool {
        let mut guard = self.seen.lock().unwrap();
        let (queue, set) = &mut *guard;
        if set.contains(&key) {
            return true;
        }
        queue.push_back(key.clone());
        set.insert(key);
        if queue.len() > self.capacity {
            if let Some(oldest) = queue.pop_front() {
                set.remove(&oldest);
            }
        }
        false
    }
}
