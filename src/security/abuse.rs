//! Abuse heuristics that escalate a client to a temporary block.
//!
//! Rules are evaluated in order against an entry whose window was already
//! open before the current request. The first matching rule wins.
//!
//! - `rapid_fire`: a single burst far above the limit
//! - `persistent_limit_hitting`: repeated retries past the limit at a rate
//!   well above the policy rate
//!
//! Both thresholds are multiples of the policy limit or rate. Neither rule
//! looks at a client that is still within its limit, and the first request
//! over the limit is always answered with the policy's own message.

use std::fmt;
use std::sync::Arc;

use crate::config::AbuseConfig;
use crate::security::store::RateLimitEntry;

/// What to do when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbuseAction {
    /// Add the client to the block list for the rule's duration.
    Block,
    /// Record the event without blocking.
    Flag,
}

/// Inputs a rule may inspect besides the counter entry.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub ip: &'a str,
    pub now: u64,
    pub max_requests: u32,
    pub window_ms: u64,
}

type Condition = Arc<dyn Fn(&RateLimitEntry, &RuleContext<'_>) -> bool + Send + Sync>;

/// A named heuristic over a counter entry.
#[derive(Clone)]
pub struct AbuseRule {
    pub name: String,
    pub action: AbuseAction,
    pub duration_ms: u64,
    condition: Condition,
}

impl AbuseRule {
    pub fn new(
        name: impl Into<String>,
        action: AbuseAction,
        duration_ms: u64,
        condition: impl Fn(&RateLimitEntry, &RuleContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            duration_ms,
            condition: Arc::new(condition),
        }
    }

    pub fn matches(&self, entry: &RateLimitEntry, ctx: &RuleContext<'_>) -> bool {
        (self.condition)(entry, ctx)
    }
}

impl fmt::Debug for AbuseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbuseRule")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("duration_ms", &self.duration_ms)
            .finish_non_exhaustive()
    }
}

/// Outcome of a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbuseVerdict {
    pub rule: String,
    pub action: AbuseAction,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AbuseDetector {
    rules: Vec<AbuseRule>,
}

impl AbuseDetector {
    /// Detector with the built-in rules tuned by `config`.
    pub fn new(config: &AbuseConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self::with_rules(vec![
            rapid_fire(config.rapid_fire_multiplier, config.rapid_fire_block_ms),
            persistent_limit_hitting(
                config.persistent_multiplier,
                config.persistent_min_elapsed_ms,
                config.persistent_block_ms,
            ),
        ])
    }

    pub fn with_rules(rules: Vec<AbuseRule>) -> Self {
        Self { rules }
    }

    /// A detector that never escalates.
    pub fn disabled() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rules(&self) -> &[AbuseRule] {
        &self.rules
    }

    /// Return the first rule matching `entry`, if any.
    pub fn evaluate(&self, entry: &RateLimitEntry, ctx: &RuleContext<'_>) -> Option<AbuseVerdict> {
        self.rules
            .iter()
            .find(|rule| rule.matches(entry, ctx))
            .map(|rule| AbuseVerdict {
                rule: rule.name.clone(),
                action: rule.action,
                duration_ms: rule.duration_ms,
            })
    }
}

/// Burst of more than `multiplier` times the limit inside one window.
pub fn rapid_fire(multiplier: u32, block_ms: u64) -> AbuseRule {
    AbuseRule::new("rapid_fire", AbuseAction::Block, block_ms, move |entry, ctx| {
        u64::from(entry.count) > u64::from(ctx.max_requests) * u64::from(multiplier)
    })
}

/// Keeps retrying after rejection at more than `multiplier` times the
/// policy's average rate.
///
/// Only requests past the limit count toward the observed rate, and the
/// first rejected request never fires, so a client that paced itself
/// within the policy always sees the policy message first.
pub fn persistent_limit_hitting(multiplier: u32, min_elapsed_ms: u64, block_ms: u64) -> AbuseRule {
    AbuseRule::new(
        "persistent_limit_hitting",
        AbuseAction::Block,
        block_ms,
        move |entry, ctx| {
            let elapsed_ms = ctx.now.saturating_sub(entry.window_start);
            if entry.count <= ctx.max_requests.saturating_add(1)
                || elapsed_ms < min_elapsed_ms.max(1)
                || ctx.window_ms == 0
            {
                return false;
            }
            let overflow = f64::from(entry.count - ctx.max_requests);
            let observed = overflow / (elapsed_ms as f64 / 1000.0);
            let allowed = f64::from(ctx.max_requests) / (ctx.window_ms as f64 / 1000.0);
            observed > allowed * f64::from(multiplier)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(now: u64) -> RuleContext<'static> {
        RuleContext {
            ip: "1.2.3.4",
            now,
            max_requests: 5,
            window_ms: 900_000,
        }
    }

    fn entry(count: u32, window_start: u64) -> RateLimitEntry {
        RateLimitEntry {
            count,
            window_start,
            reset_time: window_start + 900_000,
        }
    }

    #[test]
    fn rapid_fire_needs_more_than_five_times_the_limit() {
        let detector = AbuseDetector::new(&AbuseConfig::default());

        assert_eq!(detector.evaluate(&entry(25, 0), &ctx(0)), None);

        let verdict = detector.evaluate(&entry(26, 0), &ctx(0)).unwrap();
        assert_eq!(verdict.rule, "rapid_fire");
        assert_eq!(verdict.action, AbuseAction::Block);
        assert_eq!(verdict.duration_ms, 15 * 60 * 1000);
    }

    #[test]
    fn persistent_rule_ignores_instant_bursts_and_in_limit_traffic() {
        let detector = AbuseDetector::new(&AbuseConfig::default());

        // Over the limit but no elapsed time to measure a rate.
        assert_eq!(detector.evaluate(&entry(6, 0), &ctx(0)), None);
        // Fast, but still within the limit.
        assert_eq!(detector.evaluate(&entry(5, 0), &ctx(10_000)), None);
    }

    #[test]
    fn persistent_rule_fires_on_sustained_excess() {
        let detector = AbuseDetector::new(&AbuseConfig::default());

        // 5 requests past the limit within 60s: 0.083/s vs 0.0167/s allowed.
        let verdict = detector.evaluate(&entry(10, 0), &ctx(60_000)).unwrap();
        assert_eq!(verdict.rule, "persistent_limit_hitting");
        assert_eq!(verdict.duration_ms, 10 * 60 * 1000);

        // 7 requests spread over 14 minutes stays below 3x the policy rate.
        assert_eq!(detector.evaluate(&entry(7, 0), &ctx(840_000)), None);
    }

    #[test]
    fn first_rejection_is_never_escalated() {
        let detector = AbuseDetector::new(&AbuseConfig::default());

        // One over the limit, however quickly it arrives.
        assert_eq!(detector.evaluate(&entry(6, 0), &ctx(1_000)), None);
        assert_eq!(detector.evaluate(&entry(6, 0), &ctx(60_000)), None);
    }

    #[test]
    fn paced_client_retrying_slowly_is_not_blocked() {
        let detector = AbuseDetector::new(&AbuseConfig::default());
        let hourly = |now| RuleContext {
            ip: "1.2.3.4",
            now,
            max_requests: 10,
            window_ms: 3_600_000,
        };

        // Ten submissions a minute apart, then retries at +10 and +11 minutes.
        assert_eq!(detector.evaluate(&entry(11, 0), &hourly(600_000)), None);
        assert_eq!(detector.evaluate(&entry(12, 0), &hourly(660_000)), None);
        // Hammering after rejection still escalates.
        let verdict = detector.evaluate(&entry(14, 0), &hourly(60_000)).unwrap();
        assert_eq!(verdict.rule, "persistent_limit_hitting");
    }

    #[test]
    fn first_matching_rule_wins() {
        let detector = AbuseDetector::with_rules(vec![
            AbuseRule::new("flag_all", AbuseAction::Flag, 0, |_, _| true),
            rapid_fire(1, 1_000),
        ]);
        let verdict = detector.evaluate(&entry(100, 0), &ctx(0)).unwrap();
        assert_eq!(verdict.rule, "flag_all");
        assert_eq!(verdict.action, AbuseAction::Flag);
    }

    #[test]
    fn disabled_detector_never_matches() {
        let config = AbuseConfig {
            enabled: false,
            ..AbuseConfig::default()
        };
        let detector = AbuseDetector::new(&config);
        assert!(detector.rules().is_empty());
        assert_eq!(detector.evaluate(&entry(1_000, 0), &ctx(0)), None);
    }
}
