//! Per-entity command rate limiting.
//!
//! Fixed one-second windows: each entity may run `limit` commands per
//! window; anything beyond that is rejected, never queued.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::mud::sync::lock;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_window_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= WINDOW
    }
}

#[derive(Debug)]
pub struct CommandRateLimiter {
    limit: u32,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl CommandRateLimiter {
    pub fn new(commands_per_second: u32) -> Self {
        Self {
            limit: commands_per_second.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Count one command for `entity`; false means it must be rejected.
    pub fn check(&self, entity: &str) -> bool {
        self.check_at(entity, Instant::now())
    }

    pub fn check_at(&self, entity: &str, now: Instant) -> bool {
        let mut entries = lock(&self.entries);
        let entry = entries
            .entry(entity.to_ascii_lowercase())
            .or_insert_with(|| RateLimitEntry::new(now));
        if entry.is_window_expired(now) {
            *entry = RateLimitEntry::new(now);
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    pub fn forget(&self, entity: &str) {
        lock(&self.entries).remove(&entity.to_ascii_lowercase());
    }

    pub fn tracked(&self) -> usize {
        lock(&self.entries).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excess_within_window_is_rejected() {
        let limiter = CommandRateLimiter::new(3);
        let t0 = Instant::now();
        assert!(limiter.check_at("neo", t0));
        assert!(limiter.check_at("neo", t0));
        assert!(limiter.check_at("NEO", t0 + Duration::from_millis(500)));
        assert!(!limiter.check_at("neo", t0 + Duration::from_millis(900)));
        // Other entities are unaffected.
        assert!(limiter.check_at("trinity", t0 + Duration::from_millis(900)));
    }

    #[test]
    fn window_resets_after_a_second() {
        let limiter = CommandRateLimiter::new(1);
        let t0 = Instant::now();
        assert!(limiter.check_at("neo", t0));
        assert!(!limiter.check_at("neo", t0 + Duration::from_millis(999)));
        assert!(limiter.check_at("neo", t0 + Duration::from_secs(1)));
    }

    #[test]
    fn forget_drops_tracking() {
        let limiter = CommandRateLimiter::new(1);
        limiter.check("neo");
        assert_eq!(limiter.tracked(), 1);
        limiter.forget("Neo");
        assert_eq!(limiter.tracked(), 0);
    }
}
