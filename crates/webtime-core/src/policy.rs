//! Timers, permanent blocks and the block-rule compiler.
//!
//! [`compile_rules`] is a pure function of a [`PolicySnapshot`]: the same
//! timers, blocks and usage always produce the same [`RuleSet`], ids included.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{strip_decorations, Locator};
use crate::error::{DomainError, DomainResult};
use crate::Domain;

/// Priority of rules produced by a permanent block.
pub const BLOCK_RULE_PRIORITY: u32 = 2;

/// Priority of rules produced by an exceeded timer.
pub const TIMER_RULE_PRIORITY: u32 = 1;

// ============================================================================
// Timers
// ============================================================================

/// Daily time budget for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteTimer {
    pub domain: Domain,
    /// Seconds per day.
    pub time_limit: u64,
    pub enabled: bool,
}

impl WebsiteTimer {
    /// Validates and builds a timer. Limits must be strictly positive.
    pub fn new(domain: Domain, time_limit: i64, enabled: bool) -> DomainResult<Self> {
        let time_limit = u64::try_from(time_limit)
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or(DomainError::InvalidTimeLimit { limit: time_limit })?;
        Ok(Self {
            domain,
            time_limit,
            enabled,
        })
    }

    /// True when the budget is enforced and `spent` has reached it.
    pub fn is_exceeded(&self, spent: u64) -> bool {
        self.enabled && spent >= self.time_limit
    }
}

// ============================================================================
// Blocks
// ============================================================================

/// Permanent block entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedWebsite {
    pub id: i64,
    pub url_pattern: String,
    pub date_added: NaiveDateTime,
}

/// Substring containment in either direction: `"shop"` blocks
/// `online-shop.test`, and `"news.example/world"` blocks `news.example`.
fn pattern_matches_domain(pattern: &str, domain: &Domain) -> bool {
    let domain = domain.as_str();
    domain.contains(pattern) || pattern.contains(domain)
}

/// Normalises a block pattern entered by the user.
///
/// Keeps any path, drops scheme, `www.` and trailing slashes.
pub fn normalize_pattern(input: &str) -> DomainResult<String> {
    let pattern = strip_decorations(input);
    if pattern.is_empty() {
        return Err(DomainError::InvalidPattern {
            input: input.to_string(),
        });
    }
    Ok(pattern)
}

// ============================================================================
// Compiled Rules
// ============================================================================

/// How a rule's pattern is applied to a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// The URL contains the pattern anywhere.
    UrlContains,
    /// The URL's host is the domain or a subdomain of it.
    Domain,
}

/// Why a rule exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleReason {
    Blocked { block_id: i64, pattern: String },
    TimerExceeded { domain: Domain, time_limit: u64, time_spent: u64 },
}

/// One redirect-on-main-frame rule for the host's interception mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRule {
    pub id: u32,
    pub priority: u32,
    pub match_kind: MatchKind,
    /// Pattern in the host's filter syntax: a bare substring for
    /// [`MatchKind::UrlContains`], `||domain` for [`MatchKind::Domain`].
    pub match_pattern: String,
    pub redirect_target: String,
    pub reason: RuleReason,
}

impl BlockRule {
    /// Evaluates the rule against a navigation URL.
    pub fn matches_url(&self, url: &str) -> bool {
        match (&self.match_kind, &self.reason) {
            (MatchKind::UrlContains, RuleReason::Blocked { pattern, .. }) => {
                url.to_lowercase().contains(pattern.as_str())
            }
            (MatchKind::Domain, RuleReason::TimerExceeded { domain, .. }) => {
                match url::Url::parse(url.trim()) {
                    Ok(parsed) => parsed.host_str().is_some_and(|host| domain.covers_host(host)),
                    Err(_) => false,
                }
            }
            (MatchKind::UrlContains, RuleReason::TimerExceeded { .. })
            | (MatchKind::Domain, RuleReason::Blocked { .. }) => false,
        }
    }

    /// Evaluates the rule against an already-derived domain.
    pub fn matches_domain(&self, candidate: &Domain) -> bool {
        match &self.reason {
            RuleReason::Blocked { pattern, .. } => pattern_matches_domain(pattern, candidate),
            RuleReason::TimerExceeded { domain, .. } => domain.covers_host(candidate.as_str()),
        }
    }
}

/// Full replacement set of rules, installed as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<BlockRule>,
}

impl RuleSet {
    pub fn rules(&self) -> &[BlockRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Highest-priority rule that would redirect `url`.
    ///
    /// URLs that are not web pages fall back to substring rules only.
    pub fn first_match(&self, url: &str) -> Option<&BlockRule> {
        let domain = Locator::classify(url).domain().cloned();
        self.rules
            .iter()
            .filter(|rule| {
                rule.matches_url(url)
                    || domain.as_ref().is_some_and(|d| rule.matches_domain(d))
            })
            .max_by_key(|rule| (rule.priority, std::cmp::Reverse(rule.id)))
    }

    /// True when the set already enforces the timer of `domain`.
    pub fn has_timer_rule(&self, domain: &Domain) -> bool {
        self.rules.iter().any(|rule| {
            matches!(&rule.reason, RuleReason::TimerExceeded { domain: d, .. } if d == domain)
        })
    }
}

/// Everything rule compilation depends on.
#[derive(Debug, Clone, Copy)]
pub struct PolicySnapshot<'a> {
    pub timers: &'a [WebsiteTimer],
    pub blocked: &'a [BlockedWebsite],
    /// Today's seconds per domain.
    pub usage: &'a HashMap<Domain, u64>,
}

/// Derives the complete rule set for a snapshot.
///
/// Blocks come first (ordered by id), then exceeded timers (ordered by
/// domain). Ids are assigned 1..=n in that order.
pub fn compile_rules(snapshot: PolicySnapshot<'_>, redirect_target: &str) -> RuleSet {
    let mut blocked: Vec<&BlockedWebsite> = snapshot.blocked.iter().collect();
    blocked.sort_by_key(|block| block.id);

    let mut timers: Vec<&WebsiteTimer> = snapshot
        .timers
        .iter()
        .filter(|timer| {
            let spent = snapshot.usage.get(&timer.domain).copied().unwrap_or(0);
            timer.is_exceeded(spent)
        })
        .collect();
    timers.sort_by(|a, b| a.domain.cmp(&b.domain));

    let block_rules = blocked.into_iter().map(|block| {
        (
            BLOCK_RULE_PRIORITY,
            MatchKind::UrlContains,
            block.url_pattern.clone(),
            RuleReason::Blocked {
                block_id: block.id,
                pattern: block.url_pattern.clone(),
            },
        )
    });

    let timer_rules = timers.into_iter().map(|timer| {
        (
            TIMER_RULE_PRIORITY,
            MatchKind::Domain,
            format!("||{}", timer.domain),
            RuleReason::TimerExceeded {
                domain: timer.domain.clone(),
                time_limit: timer.time_limit,
                time_spent: snapshot.usage.get(&timer.domain).copied().unwrap_or(0),
            },
        )
    });

    let rules = block_rules
        .chain(timer_rules)
        .zip(1u32..)
        .map(|((priority, match_kind, match_pattern, reason), id)| BlockRule {
            id,
            priority,
            match_kind,
            match_pattern,
            redirect_target: redirect_target.to_string(),
            reason,
        })
        .collect();

    RuleSet { rules }
}
