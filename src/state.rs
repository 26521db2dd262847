//! Process-wide "seen" bookkeeping: processed task ids and TTS cooldowns.
//!
//! Both live behind [`StateStore`] so callers control time through a [`Clock`]
//! and entries can be evicted with [`StateStore::sweep`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of "now" for cooldown and eviction decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Maps ids to the instant they were last seen.
pub trait StateStore: Send + Sync {
    fn last_seen(&self, id: &str) -> Option<Instant>;

    fn mark_seen(&self, id: &str, at: Instant);

    /// Drop entries last seen more than `ttl` before `now`, except those `keep`
    /// accepts. Returns how many were removed.
    fn sweep_except(&self, now: Instant, ttl: Duration, keep: &dyn Fn(&str) -> bool) -> usize;

    /// Drop entries last seen more than `ttl` before `now`. Returns how many were removed.
    fn sweep(&self, now: Instant, ttl: Duration) -> usize {
        self.sweep_except(now, ttl, &|_: &str| false)
    }

    fn len(&self) -> usize;

    fn has(&self, id: &str) -> bool {
        self.last_seen(id).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `id` was seen less than `window` before `now`.
    fn seen_within(&self, id: &str, now: Instant, window: Duration) -> bool {
        self.last_seen(id)
            .map(|at| now.saturating_duration_since(at) < window)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn last_seen(&self, id: &str) -> Option<Instant> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(id).copied()
    }

    fn mark_seen(&self, id: &str, at: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(id.to_string(), at);
    }

    fn sweep_except(&self, now: Instant, ttl: Duration, keep: &dyn Fn(&str) -> bool) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|id, at| now.saturating_duration_since(*at) < ttl || keep(id));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_has() {
        let store = InMemoryStateStore::new();
        let clock = ManualClock::new();

        assert!(!store.has("task-1"));
        store.mark_seen("task-1", clock.now());
        assert!(store.has("task-1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_seen_within_window() {
        let store = InMemoryStateStore::new();
        let clock = ManualClock::new();
        let window = Duration::from_secs(10);

        store.mark_seen("el", clock.now());
        clock.advance(Duration::from_secs(9));
        assert!(store.seen_within("el", clock.now(), window));

        clock.advance(Duration::from_secs(1));
        assert!(!store.seen_within("el", clock.now(), window));
        assert!(!store.seen_within("other", clock.now(), window));
    }

    #[test]
    fn test_sweep_evicts_only_expired() {
        let store = InMemoryStateStore::new();
        let clock = ManualClock::new();

        store.mark_seen("old", clock.now());
        clock.advance(Duration::from_secs(30));
        store.mark_seen("fresh", clock.now());
        clock.advance(Duration::from_secs(5));

        let removed = store.sweep(clock.now(), Duration::from_secs(20));
        assert_eq!(removed, 1);
        assert!(!store.has("old"));
        assert!(store.has("fresh"));
    }

    #[test]
    fn test_sweep_except_keeps_accepted_ids() {
        let store = InMemoryStateStore::new();
        let clock = ManualClock::new();

        store.mark_seen("queued", clock.now());
        store.mark_seen("gone", clock.now());
        clock.advance(Duration::from_secs(60));

        let removed = store.sweep_except(clock.now(), Duration::from_secs(10), &|id: &str| id == "queued");
        assert_eq!(removed, 1);
        assert!(store.has("queued"));
        assert!(!store.has("gone"));
    }
}
