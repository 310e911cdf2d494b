//! Fixed-window counter storage.
//!
//! A [`CounterStore`] maps a derived key to the number of hits seen in the
//! key's current window. Policies that must share a budget are handed the
//! same store instance and derive the same keys.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::error::{LimiterError, Result};

/// State of one rate-limited identity within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    pub count: u64,
    pub reset_time: SystemTime,
}

/// Result of a single increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub total_hits: u64,
    pub reset_time: SystemTime,
}

impl Hit {
    /// Time left in the window, zero once it has elapsed.
    pub fn time_until_reset(&self, now: SystemTime) -> Duration {
        self.reset_time.duration_since(now).unwrap_or_default()
    }
}

/// Operations a backing store must honor for the limiter.
///
/// Every operation on a single key is atomic with respect to concurrent
/// callers. An absent key behaves as a count of zero.
pub trait CounterStore: Send + Sync {
    /// Count one hit for `key`, opening a fresh window of `window` length
    /// when none exists or the previous one has elapsed.
    fn increment(&self, key: &str, window: Duration) -> Result<Hit>;

    /// Refund one hit. Never drops below zero; no-op for unknown keys.
    fn decrement(&self, key: &str) -> Result<()>;

    /// Refund one hit only while `key` is still in the window that ends at
    /// `reset_time`. Returns whether a hit was refunded.
    ///
    /// Stores that cannot compare windows refund unconditionally.
    fn decrement_window(&self, key: &str, reset_time: SystemTime) -> Result<bool> {
        let _ = reset_time;
        self.decrement(key).map(|()| true)
    }

    /// Forget `key` entirely.
    fn reset_key(&self, key: &str) -> Result<()>;

    /// Drop entries whose window has elapsed. Returns how many were removed.
    fn sweep_expired(&self) -> Result<usize>;

    /// Number of keys currently held.
    fn tracked_keys(&self) -> Result<usize>;
}

/// Process-local store backed by a single lock over the whole map.
///
/// Writes always leave entries whole; a poisoned lock is recovered on next use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CounterEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment as of `now`.
    pub fn increment_at(&self, key: &str, window: Duration, now: SystemTime) -> Result<Hit> {
        let mut entries = self.write_entries();

        let next_reset = now.checked_add(window).ok_or_else(|| {
            LimiterError::StoreFault(format!(
                "window of {:?} overflows the clock for key '{}'",
                window, key
            ))
        })?;
        let fresh = CounterEntry {
            count: 0,
            reset_time: next_reset,
        };

        let entry = entries.entry(key.to_string()).or_insert(fresh);
        if now >= entry.reset_time {
            *entry = fresh;
        }

        entry.count = entry.count.saturating_add(1);

        Ok(Hit {
            total_hits: entry.count,
            reset_time: entry.reset_time,
        })
    }

    /// Sweep as of `now`.
    pub fn sweep_expired_at(&self, now: SystemTime) -> Result<usize> {
        let mut entries = self.write_entries();

        let initial_count = entries.len();
        entries.retain(|_, entry| now < entry.reset_time);

        Ok(initial_count - entries.len())
    }

    /// Snapshot of the entry for `key`, if any.
    pub fn entry(&self, key: &str) -> Result<Option<CounterEntry>> {
        Ok(self.read_entries().get(key).copied())
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, CounterEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            self.recovered();
            poisoned.into_inner()
        })
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, CounterEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            self.recovered();
            poisoned.into_inner()
        })
    }

    fn recovered(&self) {
        warn!(
            target: "auth_throttle::store",
            "Counter map lock was poisoned by a panicking holder, recovering"
        );
        self.entries.clear_poison();
    }
}

impl CounterStore for MemoryStore {
    fn increment(&self, key: &str, window: Duration) -> Result<Hit> {
        self.increment_at(key, window, SystemTime::now())
    }

    fn decrement(&self, key: &str) -> Result<()> {
        if let Some(entry) = self.write_entries().get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
        }

        Ok(())
    }

    fn decrement_window(&self, key: &str, reset_time: SystemTime) -> Result<bool> {
        match self.write_entries().get_mut(key) {
            Some(entry) if entry.reset_time == reset_time && entry.count > 0 => {
                entry.count -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn reset_key(&self, key: &str) -> Result<()> {
        self.write_entries().remove(key);
        Ok(())
    }

    fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(SystemTime::now())
    }

    fn tracked_keys(&self) -> Result<usize> {
        Ok(self.read_entries().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const WINDOW: Duration = Duration::from_secs(300);

    fn epoch(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_first_increment_opens_window() {
        let store = MemoryStore::new();
        let hit = store.increment_at("auth_10.0.0.1", WINDOW, epoch(1_000)).unwrap();

        assert_eq!(hit.total_hits, 1);
        assert_eq!(hit.reset_time, epoch(1_300));
    }

    #[test]
    fn test_increment_inside_window_keeps_reset_time() {
        let store = MemoryStore::new();
        store.increment_at("k", WINDOW, epoch(1_000)).unwrap();
        let hit = store.increment_at("k", WINDOW, epoch(1_299)).unwrap();

        assert_eq!(hit.total_hits, 2);
        assert_eq!(hit.reset_time, epoch(1_300));
    }

    #[test]
    fn test_increment_at_reset_time_rolls_over() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.increment_at("k", WINDOW, epoch(1_000)).unwrap();
        }

        let hit = store.increment_at("k", WINDOW, epoch(1_300)).unwrap();
        assert_eq!(hit.total_hits, 1);
        assert_eq!(hit.reset_time, epoch(1_600));

        let later = store.increment_at("k", WINDOW, epoch(2_000)).unwrap();
        assert_eq!(later.total_hits, 1);
        assert_eq!(later.reset_time, epoch(2_300));
    }

    #[test]
    fn test_decrement_never_goes_negative() {
        let store = MemoryStore::new();
        store.increment_at("k", WINDOW, epoch(0)).unwrap();

        for _ in 0..5 {
            store.decrement("k").unwrap();
        }

        let entry = store.entry("k").unwrap().unwrap();
        assert_eq!(entry.count, 0);
        assert_eq!(entry.reset_time, epoch(300));
    }

    #[test]
    fn test_decrement_unknown_key_is_noop() {
        let store = MemoryStore::new();
        store.decrement("missing").unwrap();
        assert_eq!(store.entry("missing").unwrap(), None);
        assert_eq!(store.tracked_keys().unwrap(), 0);
    }

    #[test]
    fn test_reset_key_starts_fresh_window() {
        let store = MemoryStore::new();
        store.increment_at("k", WINDOW, epoch(0)).unwrap();
        store.increment_at("k", WINDOW, epoch(10)).unwrap();

        store.reset_key("k").unwrap();
        assert_eq!(store.entry("k").unwrap(), None);

        let hit = store.increment_at("k", WINDOW, epoch(20)).unwrap();
        assert_eq!(hit.total_hits, 1);
        assert_eq!(hit.reset_time, epoch(320));
    }

    #[test]
    fn test_sweep_removes_only_elapsed_windows() {
        let store = MemoryStore::new();
        store.increment_at("old", WINDOW, epoch(0)).unwrap();
        store.increment_at("fresh", WINDOW, epoch(200)).unwrap();

        let removed = store.sweep_expired_at(epoch(400)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.entry("old").unwrap(), None);
        assert!(store.entry("fresh").unwrap().is_some());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let threads = 16;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        store.increment("shared", WINDOW).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let entry = store.entry("shared").unwrap().unwrap();
        assert_eq!(entry.count, (threads * per_thread) as u64);
    }

    #[test]
    fn test_panicking_holder_does_not_wedge_the_store() {
        let store = Arc::new(MemoryStore::new());
        store.increment_at("k", WINDOW, epoch(0)).unwrap();

        let holder = store.clone();
        let _ = thread::spawn(move || {
            let _guard = holder.entries.write().unwrap();
            panic!("counter map holder panicked");
        })
        .join();
        assert!(store.entries.is_poisoned());

        let hit = store.increment_at("k", WINDOW, epoch(10)).unwrap();
        assert_eq!(hit.total_hits, 2);
        assert!(!store.entries.is_poisoned());
        assert_eq!(store.tracked_keys().unwrap(), 1);
    }

    #[test]
    fn test_refund_is_dropped_after_rollover() {
        let store = MemoryStore::new();
        let first = store.increment_at("k", WINDOW, epoch(0)).unwrap();

        assert!(store.decrement_window("k", first.reset_time).unwrap());
        assert_eq!(store.entry("k").unwrap().unwrap().count, 0);

        let stale = store.increment_at("k", WINDOW, epoch(100)).unwrap();
        let current = store.increment_at("k", WINDOW, epoch(300)).unwrap();
        assert_eq!(current.total_hits, 1);

        assert!(!store.decrement_window("k", stale.reset_time).unwrap());
        assert_eq!(store.entry("k").unwrap().unwrap().count, 1);
    }

    #[test]
    fn test_window_refund_unknown_key() {
        let store = MemoryStore::new();
        assert!(!store.decrement_window("missing", epoch(300)).unwrap());
        assert_eq!(store.tracked_keys().unwrap(), 0);
    }

    #[test]
    fn test_time_until_reset() {
        let hit = Hit {
            total_hits: 1,
            reset_time: epoch(100),
        };
        assert_eq!(hit.time_until_reset(epoch(40)), Duration::from_secs(60));
        assert_eq!(hit.time_until_reset(epoch(200)), Duration::ZERO);
    }
}
