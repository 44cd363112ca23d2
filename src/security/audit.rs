//! Bounded security audit log.
//!
//! Each limiter owns one log. Entries are immutable once recorded; when the
//! buffer is full the oldest entry is evicted.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

/// Default number of entries retained per log.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1_000;

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Request from a client on the block list.
    BlockedIp,
    /// Request over the policy limit.
    RateLimitExceeded,
    /// An abuse rule blocked the client.
    SuspiciousActivity,
    /// An abuse rule matched with a flag-only action.
    Flagged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BlockedIp => "blocked_ip",
            AuditAction::RateLimitExceeded => "rate_limit_exceeded",
            AuditAction::SuspiciousActivity => "suspicious_activity",
            AuditAction::Flagged => "flagged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAuditLogEntry {
    pub timestamp: u64,
    pub ip: String,
    pub user_agent: String,
    pub endpoint: String,
    pub action: AuditAction,
    pub reason: String,
    pub blocked: bool,
}

#[derive(Debug)]
pub struct SecurityAuditLog {
    policy: String,
    capacity: usize,
    entries: Mutex<VecDeque<SecurityAuditLogEntry>>,
}

impl SecurityAuditLog {
    pub fn new(policy: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            policy: policy.into(),
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY))),
        }
    }

    /// Append an entry, evicting the oldest when full, and emit it as a log event.
    pub fn record(&self, entry: SecurityAuditLogEntry) {
        if entry.blocked {
            tracing::warn!(
                policy = %self.policy,
                action = entry.action.as_str(),
                ip = %entry.ip,
                endpoint = %entry.endpoint,
                reason = %entry.reason,
                "Security event"
            );
        } else {
            tracing::info!(
                policy = %self.policy,
                action = entry.action.as_str(),
                ip = %entry.ip,
                endpoint = %entry.endpoint,
                reason = %entry.reason,
                "Security event"
            );
        }

        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of all retained entries, oldest first.
    pub fn entries(&self) -> Vec<SecurityAuditLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp: u64) -> SecurityAuditLogEntry {
        SecurityAuditLogEntry {
            timestamp,
            ip: "1.2.3.4".into(),
            user_agent: "test".into(),
            endpoint: "/api/contact".into(),
            action: AuditAction::RateLimitExceeded,
            reason: "limit".into(),
            blocked: true,
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let log = SecurityAuditLog::new("contact", 3);
        for ts in 0..5 {
            log.record(entry(ts));
        }

        let timestamps: Vec<u64> = log.entries().iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![2, 3, 4]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn action_serializes_snake_case() {
        let json = serde_json::to_value(entry(1)).unwrap();
        assert_eq!(json["action"], "rate_limit_exceeded");
        assert_eq!(json["userAgent"], "test");
    }
}
