//! Calendar-day arithmetic and the clock abstraction.
//!
//! All attribution happens on local wall-clock days. Instants are carried as
//! local [`NaiveDateTime`] values so that "today" and "midnight" are plain
//! arithmetic and tests can pin the clock to any moment.

use std::sync::Mutex;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

/// Seconds in one calendar day; no single slice may exceed this.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Storage format for dates (`YYYY-MM-DD`).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for the engine.
pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;

    /// Current local calendar day.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Clock backed by the operating system's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jumps to an absolute instant.
    pub fn set(&self, at: NaiveDateTime) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = at;
    }

    /// Moves the clock forward by `seconds`.
    pub fn advance_secs(&self, seconds: i64) {
        self.advance(TimeDelta::seconds(seconds));
    }

    /// Moves the clock forward by an arbitrary delta.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Day Boundaries
// ============================================================================

/// 00:00:00 at the start of `day`.
pub fn start_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

/// 00:00:00 at the start of the day after `day`.
pub fn end_of_day(day: NaiveDate) -> NaiveDateTime {
    let start = start_of_day(day);
    start
        .checked_add_signed(TimeDelta::days(1))
        .unwrap_or(start)
}

/// Whole seconds from `from` to `to`, or `None` when `to` is earlier.
pub fn whole_seconds_between(from: NaiveDateTime, to: NaiveDateTime) -> Option<u64> {
    u64::try_from((to - from).num_seconds()).ok()
}

/// `at` shifted by `seconds`, saturating at `at` on overflow.
pub fn add_seconds(at: NaiveDateTime, seconds: u64) -> NaiveDateTime {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}

/// Formats a date the way it is stored (`2024-03-09`).
pub fn format_day(day: NaiveDate) -> String {
    day.format(DATE_FORMAT).to_string()
}

/// Human-readable duration for notifications: `"1h 30m"`, `"45m"`, `"20s"`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}
