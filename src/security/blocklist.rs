//! Time-bounded client denylist.
//!
//! Consulted before any counting so that blocked clients never open a
//! window or consume limiter state. Re-blocking overwrites the previous
//! expiry; durations do not stack.

use dashmap::DashMap;
use serde::Serialize;

/// An active block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntry {
    pub ip: String,
    /// Epoch ms after which the client is admitted again.
    pub unblock_time: u64,
    /// Rule that caused the block.
    pub rule: String,
}

#[derive(Debug, Default)]
pub struct IpBlockList {
    entries: DashMap<String, BlockEntry>,
}

impl IpBlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `ip` until `now + duration_ms`, replacing any existing block.
    pub fn block(&self, ip: &str, duration_ms: u64, now: u64, rule: &str) -> u64 {
        let unblock_time = now.saturating_add(duration_ms);
        self.entries.insert(
            ip.to_string(),
            BlockEntry {
                ip: ip.to_string(),
                unblock_time,
                rule: rule.to_string(),
            },
        );
        unblock_time
    }

    /// Expiry of the active block on `ip`, removing it if it has lapsed.
    pub fn blocked_until(&self, ip: &str, now: u64) -> Option<u64> {
        let unblock_time = self.entries.get(ip).map(|e| e.unblock_time)?;
        if unblock_time > now {
            return Some(unblock_time);
        }
        self.entries.remove_if(ip, |_, e| e.unblock_time <= now);
        None
    }

    pub fn is_blocked(&self, ip: &str, now: u64) -> bool {
        self.blocked_until(ip, now).is_some()
    }

    /// Lift a block early. Returns whether one existed.
    pub fn unblock(&self, ip: &str) -> bool {
        self.entries.remove(ip).is_some()
    }

    /// Active blocks, soonest expiry first.
    pub fn snapshot(&self, now: u64) -> Vec<BlockEntry> {
        let mut active: Vec<BlockEntry> = self
            .entries
            .iter()
            .filter(|e| e.unblock_time > now)
            .map(|e| e.value().clone())
            .collect();
        active.sort_by_key(|e| e.unblock_time);
        active
    }

    /// Drop expired blocks. Returns the count removed.
    pub fn sweep(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.unblock_time > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
