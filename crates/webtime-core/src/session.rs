//! The single in-memory tracking session.
//!
//! At most one site is "active" at a time. The session never touches
//! storage itself. Each flush attempt measures the time since the
//! checkpoint into a pending balance, which is cleared only once the caller
//! confirms the write succeeded.

use chrono::{NaiveDate, NaiveDateTime};

use crate::activity::ActivityDelta;
use crate::calendar::{self, SECONDS_PER_DAY};
use crate::Domain;

/// Smallest slice worth a storage write.
pub const MIN_CREDIT_SECS: u64 = 1;

// ============================================================================
// Active Site
// ============================================================================

/// The site currently being timed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSite {
    pub domain: Domain,
    pub favicon_url: Option<String>,
    /// Checkpoint: time before this instant has already been measured.
    pub started_at: NaiveDateTime,
    /// Measured seconds of `day` whose write has not succeeded yet.
    pub pending_secs: u64,
    /// Calendar day the checkpoint belongs to.
    pub day: NaiveDate,
    /// True until the first successful credit of this visit.
    pub is_new_visit: bool,
    /// Idle-paused sessions stay armed but accrue nothing.
    pub paused: bool,
}

/// Outcome of measuring the active site against "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elapsed {
    /// Clock went backwards; nothing to credit.
    Negative,
    /// Less than [`MIN_CREDIT_SECS`].
    BelowMinimum,
    /// Longer than the sleep-gap threshold; treated as suspended time.
    SleepGap(u64),
    /// Creditable whole seconds.
    Seconds(u64),
}

impl ActiveSite {
    /// Opens a visit at `now`.
    pub fn open(domain: Domain, favicon_url: Option<String>, now: NaiveDateTime, paused: bool) -> Self {
        Self {
            domain,
            favicon_url,
            started_at: now,
            pending_secs: 0,
            day: now.date(),
            is_new_visit: true,
            paused,
        }
    }

    /// Measures time since the checkpoint.
    ///
    /// The checkpoint advances on every flush attempt, so a gap here means
    /// nobody observed the session for that long.
    pub fn elapsed(&self, now: NaiveDateTime, sleep_gap_secs: u64) -> Elapsed {
        match calendar::whole_seconds_between(self.started_at, now) {
            None => Elapsed::Negative,
            Some(secs) if secs < MIN_CREDIT_SECS => Elapsed::BelowMinimum,
            Some(secs) if secs > sleep_gap_secs => Elapsed::SleepGap(secs),
            Some(secs) => Elapsed::Seconds(secs),
        }
    }

    /// Moves `seconds` from the clock into the pending balance.
    ///
    /// The sub-second remainder stays on the clock for the next flush.
    pub fn accrue(&mut self, seconds: u64) {
        self.started_at = calendar::add_seconds(self.started_at, seconds);
        self.pending_secs += seconds;
    }

    /// Whether enough time is pending to be worth a write.
    pub fn has_pending(&self) -> bool {
        self.pending_secs >= MIN_CREDIT_SECS
    }

    /// Delta crediting the pending balance to the checkpoint's day.
    pub fn pending_delta(&self, at: NaiveDateTime) -> ActivityDelta {
        ActivityDelta {
            date: self.day,
            domain: self.domain.clone(),
            favicon_url: self.favicon_url.clone(),
            seconds: self.pending_secs,
            new_visit: self.is_new_visit,
            at,
        }
    }

    /// Clears the pending balance after a successful write.
    pub fn commit(&mut self) {
        self.pending_secs = 0;
        self.is_new_visit = false;
    }

    /// Drops unmeasured time and restarts the checkpoint at `now`.
    ///
    /// Pending seconds are kept. The day only moves forward here when
    /// nothing is pending for the old one; otherwise the next flush's
    /// rollover writes it first.
    pub fn restart_at(&mut self, now: NaiveDateTime) {
        self.started_at = now;
        if now.date() != self.day && self.pending_secs == 0 {
            self.day = now.date();
            self.is_new_visit = true;
        }
    }

    /// The part of the checkpoint's day that has not been written yet,
    /// when the session has crossed into a later day.
    ///
    /// Returns `None` when no rollover is due. A rollover with nothing to
    /// attribute (clock skew, or the checkpoint already past midnight)
    /// yields `Some(None)`.
    pub fn rollover(&self, today: NaiveDate) -> Option<Option<RolloverSlice>> {
        if self.day >= today {
            return None;
        }

        let midnight = calendar::end_of_day(self.day);
        let seconds = calendar::whole_seconds_between(self.started_at, midnight)
            .map(|secs| secs.min(SECONDS_PER_DAY))
            .unwrap_or(0);
        let slice = (self.pending_secs + seconds >= MIN_CREDIT_SECS).then_some(RolloverSlice {
            day: self.day,
            seconds,
            midnight,
        });
        Some(slice)
    }

    /// Starts the new day at `midnight` as a fresh visit of the same site.
    pub fn begin_day(&mut self, day: NaiveDate) {
        self.started_at = calendar::start_of_day(day);
        self.pending_secs = 0;
        self.day = day;
        self.is_new_visit = true;
    }
}

/// Unmeasured time belonging to the day before a rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverSlice {
    pub day: NaiveDate,
    /// Seconds between the checkpoint and midnight, on top of anything pending.
    pub seconds: u64,
    /// Midnight that ends `day`.
    pub midnight: NaiveDateTime,
}

// ============================================================================
// Session
// ============================================================================

/// Process-wide tracking session: empty, or exactly one active site.
#[derive(Debug, Clone, Default)]
pub struct Session {
    active: Option<ActiveSite>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&ActiveSite> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveSite> {
        self.active.as_mut()
    }

    /// Replaces whatever was active with a new visit.
    pub fn begin(&mut self, site: ActiveSite) {
        self.active = Some(site);
    }

    /// Clears the session and returns the site that was active.
    pub fn clear(&mut self) -> Option<ActiveSite> {
        self.active.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const GAP: u64 = 900;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn site(start: &str) -> ActiveSite {
        ActiveSite::open(Domain::parse("a.test").unwrap(), None, at(start), false)
    }

    #[test]
    fn test_elapsed_classification() {
        let s = site("2024-01-01 10:00:00");
        assert_eq!(s.elapsed(at("2024-01-01 09:59:00"), GAP), Elapsed::Negative);
        assert_eq!(
            s.elapsed(at("2024-01-01 10:00:00") + TimeDelta::milliseconds(400), GAP),
            Elapsed::BelowMinimum
        );
        assert_eq!(s.elapsed(at("2024-01-01 10:00:10"), GAP), Elapsed::Seconds(10));
        assert_eq!(s.elapsed(at("2024-01-01 11:00:00"), GAP), Elapsed::SleepGap(3600));
    }

    #[test]
    fn test_accrue_then_commit() {
        let mut s = site("2024-01-01 10:00:00");
        s.accrue(10);
        assert_eq!(s.started_at, at("2024-01-01 10:00:10"));
        assert_eq!(s.pending_delta(at("2024-01-01 10:00:10")).seconds, 10);
        assert!(s.is_new_visit);

        s.commit();
        assert!(!s.has_pending());
        assert!(!s.is_new_visit);
    }

    #[test]
    fn test_pending_survives_restart() {
        let mut s = site("2024-01-01 23:59:00");
        s.accrue(30);
        s.restart_at(at("2024-01-02 08:00:00"));
        assert_eq!(s.pending_secs, 30);
        assert_eq!(s.day, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        // Checkpoint is past midnight, but the pending balance still rolls over.
        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let slice = s.rollover(today).unwrap().unwrap();
        assert_eq!(slice.seconds, 0);
    }

    #[test]
    fn test_rollover_slice() {
        let s = site("2024-01-01 23:59:50");
        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let slice = s.rollover(today).unwrap().unwrap();
        assert_eq!(slice.seconds, 10);
        assert_eq!(slice.midnight, at("2024-01-02 00:00:00"));
    }

    #[test]
    fn test_rollover_not_due_same_day() {
        let s = site("2024-01-01 23:59:50");
        assert!(s.rollover(s.day).is_none());
    }

    #[test]
    fn test_rollover_with_skewed_checkpoint_has_no_slice() {
        let mut s = site("2024-01-01 12:00:00");
        // Checkpoint somehow ahead of the day it claims to belong to.
        s.started_at = at("2024-01-02 00:00:05");
        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(s.rollover(today), Some(None));
    }

    #[test]
    fn test_begin_day_is_new_visit() {
        let mut s = site("2024-01-01 23:59:50");
        s.accrue(5);
        s.commit();
        s.begin_day(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(s.started_at, at("2024-01-02 00:00:00"));
        assert!(s.is_new_visit);
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new();
        assert!(session.active().is_none());

        session.begin(site("2024-01-01 10:00:00"));
        assert_eq!(
            session.active().map(|site| site.domain.to_string()),
            Some("a.test".to_string())
        );

        assert!(session.clear().is_some());
        assert!(session.active().is_none());
    }
}
