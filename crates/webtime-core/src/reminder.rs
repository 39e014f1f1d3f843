//! Usage reminders at fixed thresholds.
//!
//! Each (domain, threshold) pair fires at most once per calendar day. The
//! tracker only remembers what was sent; callers reset it on day change.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::{format_day, format_duration};
use crate::Domain;

/// Thresholds used when the user has not configured any (30m, 1h, 2h).
pub const DEFAULT_THRESHOLDS: [u64; 3] = [1800, 3600, 7200];

/// Remembers which thresholds already fired today.
#[derive(Debug, Clone, Default)]
pub struct ThresholdTracker {
    sent: HashMap<Domain, BTreeSet<u64>>,
}

impl ThresholdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything; called at day change and when reminders are
    /// switched on.
    pub fn reset(&mut self) {
        self.sent.clear();
    }

    /// Thresholds reached by `spent` that have not fired yet, ascending.
    pub fn due(&self, domain: &Domain, spent: u64, thresholds: &[u64]) -> Vec<u64> {
        let sent = self.sent.get(domain);
        let mut due: Vec<u64> = thresholds
            .iter()
            .copied()
            .filter(|threshold| spent >= *threshold)
            .filter(|threshold| !sent.is_some_and(|s| s.contains(threshold)))
            .collect();
        due.sort_unstable();
        due.dedup();
        due
    }

    /// Records a delivered reminder.
    pub fn mark_sent(&mut self, domain: &Domain, threshold: u64) {
        self.sent
            .entry(domain.clone())
            .or_default()
            .insert(threshold);
    }
}

/// A notification ready for the host to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Stable per (day, domain, threshold) so the host can dedupe.
    pub id: String,
    pub title: String,
    pub body: String,
}

impl Reminder {
    pub fn for_threshold(date: NaiveDate, domain: &Domain, threshold: u64, spent: u64) -> Self {
        Self {
            id: format!("reminder:{}:{}:{}", format_day(date), domain, threshold),
            title: "Time check".to_string(),
            body: format!(
                "You've spent {} on {} today (reached {}).",
                format_duration(spent),
                domain,
                format_duration(threshold)
            ),
        }
    }
}
