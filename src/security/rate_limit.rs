//! Per-policy rate limiting with abuse escalation.
//!
//! # Check order
//! ```text
//! derive ip + key
//!     → block list (blocked clients never touch the counters)
//!     → atomic counter update on key
//!         → new/expired window: admit
//!         → open window: count, then abuse rules, then threshold
//! ```
//!
//! # Design Decisions
//! - Fixed window keyed by first request; expired windows restart at 1
//! - Denied requests still count, so abuse rules see traffic above the limit
//! - Every outcome is a `SecurityDecision`; nothing here errors or panics
//! - Side effects (blocking, audit) run after the counter's shard lock is released

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::config::{RateLimitPolicyConfig, SecurityConfig};
use crate::http::request::{client_ip, RequestView};
use crate::observability::metrics;
use crate::security::abuse::{AbuseAction, AbuseDetector, AbuseVerdict, RuleContext};
use crate::security::audit::{AuditAction, SecurityAuditLog, SecurityAuditLogEntry};
use crate::security::blocklist::{BlockEntry, IpBlockList};
use crate::security::store::{RateLimitEntry, RateLimitStore};

/// Error text for requests from blocked clients.
pub const BLOCKED_ERROR: &str = "blocked";
/// Error text when an abuse rule escalates.
pub const SUSPICIOUS_ERROR: &str = "suspicious activity";

/// Derives the counter key for a request.
pub type KeyGenerator = Arc<dyn Fn(&RequestView<'_>) -> String + Send + Sync>;

/// The result of a rate limit check, returned to route handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch ms when the client may retry.
    pub reset_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SecurityDecision {
    fn allow(remaining: u32, reset_time: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_time,
            error: None,
        }
    }

    fn deny(reset_time: u64, error: impl Into<String>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time,
            error: Some(error.into()),
        }
    }

    /// Denied by the block list or by an abuse rule rather than the window count.
    pub fn is_escalated(&self) -> bool {
        matches!(self.error.as_deref(), Some(BLOCKED_ERROR | SUSPICIOUS_ERROR))
    }
}

/// Immutable configuration of one named limiter.
#[derive(Clone)]
pub struct RateLimitPolicy {
    pub name: String,
    pub window_ms: u64,
    pub max_requests: u32,
    pub message: String,
    pub key_generator: Option<KeyGenerator>,
}

impl RateLimitPolicy {
    pub fn from_config(name: impl Into<String>, config: &RateLimitPolicyConfig) -> Self {
        Self {
            name: name.into(),
            window_ms: config.window_ms,
            max_requests: config.max_requests,
            message: config.message.clone(),
            key_generator: None,
        }
    }

    pub fn with_key_generator(
        mut self,
        f: impl Fn(&RequestView<'_>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_generator = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("name", &self.name)
            .field("window_ms", &self.window_ms)
            .field("max_requests", &self.max_requests)
            .field("custom_key", &self.key_generator.is_some())
            .finish()
    }
}

/// What the atomic counter step decided, before side effects.
enum Step {
    Opened(RateLimitEntry),
    Counted(RateLimitEntry, Option<AbuseVerdict>),
}

/// One named limiter: counters, block list, abuse rules and audit log.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: RateLimitStore,
    blocklist: IpBlockList,
    detector: AbuseDetector,
    audit: SecurityAuditLog,
    clock: Arc<dyn Clock>,
    trust_proxy_headers: bool,
    sweep_every_calls: u64,
    calls: AtomicU64,
}

impl RateLimiter {
    pub fn new(
        policy: RateLimitPolicy,
        detector: AbuseDetector,
        clock: Arc<dyn Clock>,
        config: &SecurityConfig,
    ) -> Self {
        let audit = SecurityAuditLog::new(policy.name.clone(), config.audit_log_capacity);
        Self {
            policy,
            store: RateLimitStore::new(),
            blocklist: IpBlockList::new(),
            detector,
            audit,
            clock,
            trust_proxy_headers: config.trust_proxy_headers,
            sweep_every_calls: config.sweep_every_calls,
            calls: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn audit_log(&self) -> &SecurityAuditLog {
        &self.audit
    }

    pub fn blocklist(&self) -> &IpBlockList {
        &self.blocklist
    }

    pub fn store(&self) -> &RateLimitStore {
        &self.store
    }

    /// Decide whether `request` may proceed under this policy.
    pub fn check_limit(&self, request: &RequestView<'_>) -> SecurityDecision {
        let now = self.clock.now_ms();
        self.maybe_sweep(now);

        let ip = client_ip(request, self.trust_proxy_headers);
        let key = match &self.policy.key_generator {
            Some(generate) => generate(request),
            None => format!("{}:{}", ip, request.path()),
        };

        if let Some(unblock_time) = self.blocklist.blocked_until(&ip, now) {
            self.audit(request, &ip, now, AuditAction::BlockedIp, "IP is temporarily blocked", true);
            metrics::record_decision(&self.policy.name, "blocked");
            return SecurityDecision::deny(unblock_time, BLOCKED_ERROR);
        }

        let window_ms = self.policy.window_ms;
        let max_requests = self.policy.max_requests;
        let step = self.store.update(&key, |current| match current {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.count = entry.count.saturating_add(1);
                let ctx = RuleContext {
                    ip: &ip,
                    now,
                    max_requests,
                    window_ms,
                };
                let verdict = self.detector.evaluate(&entry, &ctx);
                (entry, Step::Counted(entry, verdict))
            }
            _ => {
                let entry = RateLimitEntry::open(now, window_ms);
                (entry, Step::Opened(entry))
            }
        });

        match step {
            Step::Opened(entry) => {
                metrics::record_decision(&self.policy.name, "allowed");
                SecurityDecision::allow(max_requests.saturating_sub(1), entry.reset_time)
            }
            Step::Counted(entry, verdict) => self.settle(request, &ip, &key, now, entry, verdict),
        }
    }

    fn settle(
        &self,
        request: &RequestView<'_>,
        ip: &str,
        key: &str,
        now: u64,
        entry: RateLimitEntry,
        verdict: Option<AbuseVerdict>,
    ) -> SecurityDecision {
        if let Some(verdict) = verdict {
            match verdict.action {
                AbuseAction::Block => {
                    let unblock_time = self.blocklist.block(ip, verdict.duration_ms, now, &verdict.rule);
                    tracing::warn!(
                        policy = %self.policy.name,
                        ip = %ip,
                        key = %key,
                        rule = %verdict.rule,
                        count = entry.count,
                        unblock_time,
                        "Abuse rule triggered, blocking client"
                    );
                    self.audit(request, ip, now, AuditAction::SuspiciousActivity, &verdict.rule, true);
                    metrics::record_block(&self.policy.name, &verdict.rule);
                    metrics::record_decision(&self.policy.name, "blocked");
                    return SecurityDecision::deny(unblock_time, SUSPICIOUS_ERROR);
                }
                AbuseAction::Flag => {
                    self.audit(request, ip, now, AuditAction::Flagged, &verdict.rule, false);
                }
            }
        }

        if entry.count > self.policy.max_requests {
            self.audit(
                request,
                ip,
                now,
                AuditAction::RateLimitExceeded,
                &format!("{} requests in window, limit {}", entry.count, self.policy.max_requests),
                true,
            );
            metrics::record_decision(&self.policy.name, "limited");
            return SecurityDecision::deny(entry.reset_time, self.policy.message.clone());
        }

        metrics::record_decision(&self.policy.name, "allowed");
        SecurityDecision::allow(self.policy.max_requests - entry.count, entry.reset_time)
    }

    fn audit(
        &self,
        request: &RequestView<'_>,
        ip: &str,
        now: u64,
        action: AuditAction,
        reason: &str,
        blocked: bool,
    ) {
        self.audit.record(SecurityAuditLogEntry {
            timestamp: now,
            ip: ip.to_string(),
            user_agent: request.user_agent().unwrap_or_default().to_string(),
            endpoint: request.path().to_string(),
            action,
            reason: reason.to_string(),
            blocked,
        });
    }

    fn maybe_sweep(&self, now: u64) {
        if self.sweep_every_calls == 0 {
            return;
        }
        let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if calls % self.sweep_every_calls == 0 {
            self.sweep(now);
        }
    }

    /// Evict expired windows and lapsed blocks. Returns (entries, blocks) removed.
    pub fn sweep(&self, now: u64) -> (usize, usize) {
        let entries = self.store.sweep(now);
        let blocks = self.blocklist.sweep(now);
        if entries + blocks > 0 {
            tracing::debug!(policy = %self.policy.name, entries, blocks, "Swept rate limit state");
        }
        (entries, blocks)
    }

    /// Drop all counters, blocks and audit entries.
    pub fn reset(&self) {
        self.store.clear();
        for entry in self.blocklist.snapshot(0) {
            self.blocklist.unblock(&entry.ip);
        }
        self.audit.clear();
    }
}

/// Audit entries of one policy, as served to monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyAuditLog {
    #[serde(rename = "type")]
    pub policy: String,
    pub logs: Vec<SecurityAuditLogEntry>,
}

/// Active blocks of one policy.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyBlocks {
    #[serde(rename = "type")]
    pub policy: String,
    pub blocks: Vec<BlockEntry>,
}

/// Owns one limiter per named policy.
#[derive(Debug)]
pub struct RateLimitManager {
    limiters: BTreeMap<String, RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl RateLimitManager {
    /// Build a limiter for every policy in `config`.
    pub fn new(config: &SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        let detector = AbuseDetector::new(&config.abuse);
        let limiters = config
            .policies
            .iter()
            .map(|(name, policy)| {
                let limiter = RateLimiter::new(
                    RateLimitPolicy::from_config(name.clone(), policy),
                    detector.clone(),
                    Arc::clone(&clock),
                    config,
                );
                (name.clone(), limiter)
            })
            .collect();
        Self { limiters, clock }
    }

    /// Replace or add a limiter, e.g. one with a custom key generator.
    pub fn insert(&mut self, limiter: RateLimiter) {
        self.limiters.insert(limiter.policy().name.clone(), limiter);
    }

    pub fn get(&self, policy: &str) -> Option<&RateLimiter> {
        self.limiters.get(policy)
    }

    pub fn policy_names(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    pub fn get_audit_logs(&self) -> Vec<PolicyAuditLog> {
        self.limiters
            .iter()
            .map(|(name, limiter)| PolicyAuditLog {
                policy: name.clone(),
                logs: limiter.audit_log().entries(),
            })
            .collect()
    }

    pub fn blocked_ips(&self) -> Vec<PolicyBlocks> {
        let now = self.clock.now_ms();
        self.limiters
            .iter()
            .map(|(name, limiter)| PolicyBlocks {
                policy: name.clone(),
                blocks: limiter.blocklist().snapshot(now),
            })
            .collect()
    }

    /// Lift blocks on `ip` in every policy. Returns whether any existed.
    pub fn unblock(&self, ip: &str) -> bool {
        self.limiters
            .values()
            .fold(false, |found, limiter| limiter.blocklist().unblock(ip) || found)
    }

    pub fn sweep_all(&self) -> (usize, usize) {
        let now = self.clock.now_ms();
        self.limiters.values().fold((0, 0), |(entries, blocks), limiter| {
            let (e, b) = limiter.sweep(now);
            (entries + e, blocks + b)
        })
    }

    pub fn reset(&self) {
        self.limiters.values().for_each(RateLimiter::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::body::Body;
    use axum::http::Request;

    const START: u64 = 1_700_000_000_000;

    fn setup(policy: &str) -> (RateLimitManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let manager = RateLimitManager::new(&SecurityConfig::default(), clock.clone());
        assert!(manager.get(policy).is_some());
        (manager, clock)
    }

    fn request(ip: &str, path: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("x-forwarded-for", ip)
            .header("user-agent", "Mozilla/5.0")
            .body(Body::empty())
            .unwrap()
    }

    fn check(manager: &RateLimitManager, policy: &str, ip: &str, path: &str) -> SecurityDecision {
        let req = request(ip, path);
        manager.get(policy).unwrap().check_limit(&RequestView::from(&req))
    }

    #[test]
    fn remaining_decreases_to_zero_then_denies() {
        let (manager, _) = setup("auth");

        for n in 1..=5u32 {
            let decision = check(&manager, "auth", "1.2.3.4", "/api/auth/login");
            assert!(decision.allowed, "request {n} should pass");
            assert_eq!(decision.remaining, 5 - n);
            assert_eq!(decision.reset_time, START + 900_000);
        }

        let denied = check(&manager, "auth", "1.2.3.4", "/api/auth/login");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(
            denied.error.as_deref(),
            Some("Too many authentication attempts, please try again later.")
        );
        assert_eq!(denied.reset_time, START + 900_000);
    }

    #[test]
    fn window_resets_after_expiry() {
        let (manager, clock) = setup("auth");
        for _ in 0..6 {
            check(&manager, "auth", "1.2.3.4", "/login");
        }

        clock.advance(900_000);
        let decision = check(&manager, "auth", "1.2.3.4", "/login");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.reset_time, START + 1_800_000);
    }

    #[test]
    fn keys_are_independent_per_ip_and_path() {
        let (manager, _) = setup("auth");
        for _ in 0..5 {
            check(&manager, "auth", "1.2.3.4", "/login");
        }
        assert!(!check(&manager, "auth", "1.2.3.4", "/login").allowed);
        assert!(check(&manager, "auth", "5.6.7.8", "/login").allowed);
        assert!(check(&manager, "auth", "1.2.3.4", "/register").allowed);
    }

    #[test]
    fn rapid_fire_blocks_past_window_reset() {
        let (manager, clock) = setup("auth");

        for n in 1..=25 {
            let decision = check(&manager, "auth", "1.2.3.4", "/login");
            assert_ne!(decision.error.as_deref(), Some(SUSPICIOUS_ERROR), "request {n}");
        }

        let escalated = check(&manager, "auth", "1.2.3.4", "/login");
        assert!(!escalated.allowed);
        assert_eq!(escalated.error.as_deref(), Some(SUSPICIOUS_ERROR));
        assert_eq!(escalated.reset_time, START + 15 * 60 * 1000);

        let blocked = check(&manager, "auth", "1.2.3.4", "/login");
        assert_eq!(blocked.error.as_deref(), Some(BLOCKED_ERROR));

        // Blocks apply to every path for the client.
        assert!(!check(&manager, "auth", "1.2.3.4", "/elsewhere").allowed);

        // Even with the counters gone, which would open a fresh window, the block holds.
        let limiter = manager.get("auth").unwrap();
        limiter.store().clear();
        clock.advance(15 * 60 * 1000 - 1);
        let still_blocked = check(&manager, "auth", "1.2.3.4", "/login");
        assert_eq!(still_blocked.error.as_deref(), Some(BLOCKED_ERROR));
        assert!(limiter.store().is_empty());

        clock.advance(1);
        let decision = check(&manager, "auth", "1.2.3.4", "/login");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn sustained_retries_after_rejection_trigger_persistent_block() {
        let (manager, clock) = setup("auth");
        let limiter = manager.get("auth").unwrap();

        for n in 1..=5 {
            assert!(check(&manager, "auth", "1.2.3.4", "/login").allowed, "request {n}");
            clock.advance(5_000);
        }

        // First rejection carries the policy message.
        let rejected = check(&manager, "auth", "1.2.3.4", "/login");
        assert_eq!(
            rejected.error.as_deref(),
            Some("Too many authentication attempts, please try again later.")
        );
        assert!(limiter.blocklist().is_empty());

        // Second retry 5s later: 2 past the limit in 30s is well above 3x the policy rate.
        clock.advance(5_000);
        let escalated = check(&manager, "auth", "1.2.3.4", "/login");
        assert_eq!(escalated.error.as_deref(), Some(SUSPICIOUS_ERROR));
        assert_eq!(escalated.reset_time, START + 30_000 + 10 * 60 * 1000);

        let blocks = limiter.blocklist().snapshot(clock.now_ms());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].rule, "persistent_limit_hitting");
    }

    #[test]
    fn blocked_requests_do_not_touch_counters() {
        let (manager, _) = setup("api");
        let limiter = manager.get("api").unwrap();
        limiter.blocklist().block("9.9.9.9", 60_000, START, "manual");

        let decision = check(&manager, "api", "9.9.9.9", "/api/x");
        assert_eq!(decision.reset_time, START + 60_000);
        assert!(limiter.store().is_empty());
        assert_eq!(limiter.audit_log().entries()[0].action, AuditAction::BlockedIp);
    }

    #[test]
    fn custom_key_generator_groups_requests() {
        let clock = Arc::new(ManualClock::new(START));
        let config = SecurityConfig::default();
        let mut manager = RateLimitManager::new(&config, clock.clone());
        let policy = RateLimitPolicy::from_config("auth", &config.policies["auth"])
            .with_key_generator(|req| req.header("x-account").unwrap_or("anon").to_string());
        manager.insert(RateLimiter::new(
            policy,
            AbuseDetector::disabled(),
            clock,
            &config,
        ));

        for i in 0..5 {
            let req = Request::builder()
                .uri("/login")
                .header("x-forwarded-for", format!("10.0.0.{i}"))
                .header("x-account", "alice")
                .body(Body::empty())
                .unwrap();
            assert!(manager.get("auth").unwrap().check_limit(&RequestView::from(&req)).allowed);
        }
        let req = Request::builder()
            .uri("/login")
            .header("x-forwarded-for", "10.0.0.99")
            .header("x-account", "alice")
            .body(Body::empty())
            .unwrap();
        assert!(!manager.get("auth").unwrap().check_limit(&RequestView::from(&req)).allowed);
    }

    #[test]
    fn audit_log_is_capped() {
        let (manager, _) = setup("global");
        let limiter = manager.get("global").unwrap();
        limiter.blocklist().block("6.6.6.6", u64::MAX / 2, START, "manual");

        for _ in 0..10_000 {
            check(&manager, "global", "6.6.6.6", "/");
        }
        assert_eq!(limiter.audit_log().len(), 1_000);

        let logs = manager.get_audit_logs();
        let global = logs.iter().find(|l| l.policy == "global").unwrap();
        assert_eq!(global.logs.len(), 1_000);
    }

    #[test]
    fn sweep_evicts_expired_state() {
        let (manager, clock) = setup("api");
        check(&manager, "api", "1.1.1.1", "/a");
        manager.get("api").unwrap().blocklist().block("2.2.2.2", 10, START, "manual");

        clock.advance(900_001);
        assert_eq!(manager.sweep_all(), (1, 1));
        assert!(manager.get("api").unwrap().store().is_empty());
    }

    #[test]
    fn unblock_lifts_block_in_all_policies() {
        let (manager, _) = setup("api");
        manager.get("api").unwrap().blocklist().block("3.3.3.3", 60_000, START, "manual");
        manager.get("auth").unwrap().blocklist().block("3.3.3.3", 60_000, START, "manual");

        assert!(manager.unblock("3.3.3.3"));
        assert!(check(&manager, "api", "3.3.3.3", "/").allowed);
        assert!(!manager.unblock("3.3.3.3"));
    }

    #[test]
    fn decision_serializes_camel_case() {
        let json = serde_json::to_value(SecurityDecision::deny(5, "nope")).unwrap();
        assert_eq!(json["resetTime"], 5);
        assert_eq!(json["error"], "nope");
        let json = serde_json::to_value(SecurityDecision::allow(3, 5)).unwrap();
        assert!(json.get("error").is_none());
    }
}
