//! Session tracker: turns the active session into durable activity rows.
//!
//! Every flush moves measured time into the session's pending balance and
//! writes it. A failed write keeps the balance, so the same seconds are
//! offered again on the next flush however long the outage lasts.

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, info, warn};

use webtime_core::{ActiveSite, Domain, Elapsed, Session, WebsiteActivity};

use crate::store::Store;

/// What a flush wrote.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Rows as they stand after each successful write, oldest day first.
    pub written: Vec<WebsiteActivity>,
    /// A write failed and will be retried.
    pub failed: bool,
}

pub struct SessionTracker {
    session: Session,
    sleep_gap_secs: u64,
}

impl SessionTracker {
    pub fn new(sleep_gap_secs: u64) -> Self {
        Self {
            session: Session::new(),
            sleep_gap_secs,
        }
    }

    pub fn active_domain(&self) -> Option<&Domain> {
        self.session.active().map(|site| &site.domain)
    }

    /// Ends whatever was active (flushing it) and opens a visit of `domain`.
    pub fn start(
        &mut self,
        store: &mut dyn Store,
        domain: Domain,
        favicon_url: Option<String>,
        now: NaiveDateTime,
        paused: bool,
    ) -> FlushReport {
        let report = self.flush(store, now);
        self.warn_if_dropped(&report);
        info!(domain = %domain, paused, "Tracking started");
        self.session.begin(ActiveSite::open(domain, favicon_url, now, paused));
        report
    }

    /// Flushes and clears the session.
    pub fn stop(&mut self, store: &mut dyn Store, now: NaiveDateTime) -> FlushReport {
        let report = self.flush(store, now);
        self.warn_if_dropped(&report);
        if let Some(site) = self.session.clear() {
            info!(domain = %site.domain, "Tracking stopped");
        }
        report
    }

    fn warn_if_dropped(&self, report: &FlushReport) {
        if let Some(site) = self.session.active().filter(|_| report.failed) {
            warn!(
                domain = %site.domain,
                seconds = site.pending_secs,
                "Visit ended with unsaved time"
            );
        }
    }

    /// Flushes, then keeps the site armed without accruing time.
    pub fn pause(&mut self, store: &mut dyn Store, now: NaiveDateTime) -> FlushReport {
        let report = self.flush(store, now);
        if let Some(site) = self.session.active_mut() {
            site.paused = true;
            site.restart_at(now);
            debug!(domain = %site.domain, "Tracking paused");
        }
        report
    }

    /// Restarts the checkpoint at `now`; idle time is never credited.
    pub fn resume(&mut self, now: NaiveDateTime) {
        if let Some(site) = self.session.active_mut() {
            site.paused = false;
            site.restart_at(now);
            debug!(domain = %site.domain, "Tracking resumed");
        }
    }

    /// Records a newly learned favicon for the active visit.
    pub fn update_favicon(&mut self, favicon_url: String) {
        if let Some(site) = self.session.active_mut() {
            site.favicon_url = Some(favicon_url);
        }
    }

    /// Credits the time since the checkpoint.
    ///
    /// When the session's day is behind `now`, the remainder of that day is
    /// credited to it first and the session restarts at the following
    /// midnight as a new visit.
    pub fn flush(&mut self, store: &mut dyn Store, now: NaiveDateTime) -> FlushReport {
        let mut report = FlushReport::default();
        let sleep_gap_secs = self.sleep_gap_secs;

        let Some(site) = self.session.active_mut() else {
            return report;
        };

        // Idle time is never measured; a paused site only retries its balance.
        if site.paused {
            site.restart_at(now);
        }

        if let Some(slice) = site.rollover(now.date()) {
            match slice {
                Some(slice) => {
                    site.accrue(slice.seconds);
                    let seconds = site.pending_secs;
                    let last_visit = slice
                        .midnight
                        .checked_sub_signed(TimeDelta::milliseconds(1))
                        .unwrap_or(slice.midnight);
                    match store.record_activity(&site.pending_delta(last_visit)) {
                        Ok((row, _)) => {
                            site.commit();
                            info!(
                                domain = %site.domain,
                                day = %slice.day,
                                seconds,
                                "Attributed pre-midnight time to previous day"
                            );
                            report.written.push(row);
                        }
                        Err(e) => {
                            warn!(
                                domain = %site.domain,
                                day = %slice.day,
                                seconds,
                                error = %e,
                                "Rollover write failed, will retry"
                            );
                            report.failed = true;
                            return report;
                        }
                    }
                }
                None => {
                    warn!(
                        domain = %site.domain,
                        started_at = %site.started_at,
                        "No previous-day slice to attribute (clock skew)"
                    );
                }
            }
            site.begin_day(now.date());
            if site.paused {
                site.restart_at(now);
            }
        }

        if !site.paused {
            match site.elapsed(now, sleep_gap_secs) {
                Elapsed::BelowMinimum => {}
                Elapsed::Negative => {
                    warn!(
                        domain = %site.domain,
                        started_at = %site.started_at,
                        now = %now,
                        "Clock moved backwards, restarting session"
                    );
                    site.restart_at(now);
                }
                Elapsed::SleepGap(seconds) => {
                    info!(
                        domain = %site.domain,
                        seconds,
                        "Gap longer than sleep threshold not credited"
                    );
                    site.restart_at(now);
                }
                Elapsed::Seconds(seconds) => site.accrue(seconds),
            }
        }

        if site.has_pending() {
            let seconds = site.pending_secs;
            match store.record_activity(&site.pending_delta(now)) {
                Ok((row, daily)) => {
                    site.commit();
                    debug!(
                        domain = %site.domain,
                        seconds,
                        site_total = row.time_spent,
                        day_total = daily.total_time,
                        "Flushed session"
                    );
                    report.written.push(row);
                }
                Err(e) => {
                    warn!(
                        domain = %site.domain,
                        seconds,
                        error = %e,
                        "Flush failed, time kept for retry"
                    );
                    report.failed = true;
                }
            }
        }

        report
    }

    /// Flush variant used at shutdown; identical semantics, louder logging.
    pub fn final_flush(&mut self, store: &mut dyn Store, now: NaiveDateTime) -> FlushReport {
        let report = self.flush(store, now);
        if report.failed {
            warn!("Final flush failed, unsaved time will be lost");
        }
        report
    }
}
