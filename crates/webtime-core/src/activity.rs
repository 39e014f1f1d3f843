//! Per-day and per-site activity rows.
//!
//! [`WebsiteActivity`] rows are only ever grown additively through
//! [`WebsiteActivity::absorb`]; [`DailyActivity`] is always derived from them
//! via [`DailyActivity::summarize`] and never written on its own.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::calendar::SECONDS_PER_DAY;
use crate::Domain;

/// Aggregate for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    /// Seconds across all sites.
    pub total_time: u64,
    /// Number of distinct sites with a row for this day.
    pub website_count: u32,
}

impl DailyActivity {
    /// A day with nothing recorded yet.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_time: 0,
            website_count: 0,
        }
    }

    /// Recomputes the aggregate from every site row of `date`.
    ///
    /// Rows for other dates are ignored so callers can pass a wider slice.
    pub fn summarize(date: NaiveDate, sites: &[WebsiteActivity]) -> Self {
        let rows = sites.iter().filter(|site| site.date == date);
        let (total_time, website_count) = rows.fold((0u64, 0u32), |(total, count), site| {
            (
                total.saturating_add(site.time_spent),
                count.saturating_add(1),
            )
        });
        Self {
            date,
            total_time,
            website_count,
        }
    }
}

/// Time and visits attributed to one domain on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteActivity {
    pub date: NaiveDate,
    pub domain: Domain,
    pub favicon_url: Option<String>,
    pub time_spent: u64,
    pub visit_count: u32,
    pub last_visit: NaiveDateTime,
}

impl WebsiteActivity {
    /// Merges a delta into the existing row for the same (date, domain), or
    /// creates the row when there is none.
    ///
    /// A missing favicon in the delta never erases a known one.
    pub fn absorb(existing: Option<Self>, delta: &ActivityDelta) -> Self {
        let visits = u32::from(delta.new_visit);
        let seconds = delta.seconds.min(SECONDS_PER_DAY);

        match existing {
            Some(mut row) => {
                row.time_spent = row.time_spent.saturating_add(seconds);
                row.visit_count = row.visit_count.saturating_add(visits);
                row.last_visit = row.last_visit.max(delta.at);
                if delta.favicon_url.is_some() {
                    row.favicon_url.clone_from(&delta.favicon_url);
                }
                row
            }
            None => Self {
                date: delta.date,
                domain: delta.domain.clone(),
                favicon_url: delta.favicon_url.clone(),
                time_spent: seconds,
                visit_count: visits,
                last_visit: delta.at,
            },
        }
    }
}

/// One flush worth of time for a single (date, domain) key.
///
/// The key is captured when the delta is built, so a write that completes
/// after the session has moved on still lands on the right row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDelta {
    pub date: NaiveDate,
    pub domain: Domain,
    pub favicon_url: Option<String>,
    pub seconds: u64,
    /// Whether this flush is the first one of a visit.
    pub new_visit: bool,
    /// Becomes the row's `last_visit`.
    pub at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn delta(domain: &str, seconds: u64, new_visit: bool, favicon: Option<&str>) -> ActivityDelta {
        ActivityDelta {
            date: day(1),
            domain: Domain::parse(domain).unwrap(),
            favicon_url: favicon.map(str::to_string),
            seconds,
            new_visit,
            at: day(1).and_hms_opt(12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_absorb_creates_row() {
        let row = WebsiteActivity::absorb(None, &delta("a.test", 12, true, Some("https://a.test/f.ico")));
        assert_eq!(row.time_spent, 12);
        assert_eq!(row.visit_count, 1);
        assert_eq!(row.favicon_url.as_deref(), Some("https://a.test/f.ico"));
    }

    #[test]
    fn test_absorb_is_additive() {
        let row = WebsiteActivity::absorb(None, &delta("a.test", 12, true, None));
        let row = WebsiteActivity::absorb(Some(row), &delta("a.test", 10, false, None));
        assert_eq!(row.time_spent, 22);
        assert_eq!(row.visit_count, 1);
    }

    #[test]
    fn test_absorb_keeps_known_favicon() {
        let row = WebsiteActivity::absorb(None, &delta("a.test", 5, true, Some("https://a.test/f.ico")));
        let row = WebsiteActivity::absorb(Some(row), &delta("a.test", 5, true, None));
        assert_eq!(row.favicon_url.as_deref(), Some("https://a.test/f.ico"));
        assert_eq!(row.visit_count, 2);
    }

    #[test]
    fn test_absorb_clamps_to_one_day() {
        let row = WebsiteActivity::absorb(None, &delta("a.test", SECONDS_PER_DAY * 3, false, None));
        assert_eq!(row.time_spent, SECONDS_PER_DAY);
    }

    #[test]
    fn test_summarize_filters_by_date() {
        let a = WebsiteActivity::absorb(None, &delta("a.test", 30, true, None));
        let b = WebsiteActivity::absorb(None, &delta("b.test", 45, true, None));
        let mut other_day = WebsiteActivity::absorb(None, &delta("c.test", 100, true, None));
        other_day.date = day(2);

        let daily = DailyActivity::summarize(day(1), &[a, b, other_day]);
        assert_eq!(daily.total_time, 75);
        assert_eq!(daily.website_count, 2);
    }

    #[test]
    fn test_summarize_empty() {
        assert_eq!(DailyActivity::summarize(day(1), &[]), DailyActivity::empty(day(1)));
    }
}
