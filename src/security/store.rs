//! Per-key fixed-window counters.
//!
//! # Design Decisions
//! - Backed by `DashMap`; the read-modify-write in [`RateLimitStore::update`]
//!   runs under the key's shard lock, so concurrent requests on one key
//!   cannot both observe a stale count
//! - `sweep` uses `retain`, which takes the same shard locks, so it never
//!   removes an entry out from under an in-flight update

use dashmap::DashMap;
use serde::Serialize;

/// Counter state for one key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitEntry {
    /// Requests seen in this window, including denied ones.
    pub count: u32,
    /// Epoch ms of the first request in the window.
    pub window_start: u64,
    /// Epoch ms at which the window expires.
    pub reset_time: u64,
}

impl RateLimitEntry {
    /// Open a new window at `now`.
    pub fn open(now: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            window_start: now,
            reset_time: now.saturating_add(window_ms),
        }
    }

    /// True if `now` falls outside `[window_start, reset_time)`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.reset_time || now < self.window_start
    }
}

#[derive(Debug, Default)]
pub struct RateLimitStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|e| *e.value())
    }

    pub fn set(&self, key: impl Into<String>, entry: RateLimitEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// Atomically read, modify and store the entry for `key`.
    ///
    /// `f` receives the current entry (if any) and returns the entry to store
    /// together with a result passed back to the caller.
    pub fn update<R>(
        &self,
        key: &str,
        f: impl FnOnce(Option<RateLimitEntry>) -> (RateLimitEntry, R),
    ) -> R {
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let (next, result) = f(Some(*occupied.get()));
                occupied.insert(next);
                result
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (next, result) = f(None);
                vacant.insert(next);
                result
            }
        }
    }

    /// Remove every entry whose window ended before `now`. Returns the count removed.
    pub fn sweep(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_time >= now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_window_bounds() {
        let entry = RateLimitEntry::open(1_000, 500);
        assert_eq!(entry.reset_time, 1_500);
        assert!(!entry.is_expired(1_000));
        assert!(!entry.is_expired(1_499));
        assert!(entry.is_expired(1_500));
    }

    #[test]
    fn update_inserts_then_modifies() {
        let store = RateLimitStore::new();

        let seen = store.update("k", |current| {
            assert!(current.is_none());
            (RateLimitEntry::open(0, 100), 1)
        });
        assert_eq!(seen, 1);

        let count = store.update("k", |current| {
            let mut entry = current.unwrap();
            entry.count += 1;
            (entry, entry.count)
        });
        assert_eq!(count, 2);
        assert_eq!(store.get("k").unwrap().count, 2);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = RateLimitStore::new();
        store.set("old", RateLimitEntry::open(0, 100));
        store.set("new", RateLimitEntry::open(1_000, 100));

        assert_eq!(store.sweep(500), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
        assert_eq!(store.len(), 1);
    }
}
