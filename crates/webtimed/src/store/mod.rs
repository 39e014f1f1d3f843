//! Persistence boundary.
//!
//! The engine only talks to storage through the [`Store`] trait. Every call
//! is transactional on its own; [`Store::record_activity`] in particular does
//! the read-merge-write of one site row and the recomputation of that day's
//! aggregate atomically.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use webtime_core::{
    ActivityDelta, BlockedWebsite, DailyActivity, Domain, Settings, WebsiteActivity, WebsiteTimer,
};
use webtime_protocol::SnapshotData;

pub mod migrations;
mod sqlite;

pub use sqlite::SqliteStore;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    /// A value does not fit SQLite's signed 64-bit integers.
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u64 },

    #[error("block pattern already exists: {0}")]
    DuplicatePattern(String),

    /// Injected or environmental failure that should be retried later.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Store Trait
// ============================================================================

/// Tables: daily activity, website activity, timers, blocked websites and
/// the settings singleton.
pub trait Store: Send {
    // --- activity ---------------------------------------------------------

    fn website_activity(&self, date: NaiveDate, domain: &Domain)
        -> StoreResult<Option<WebsiteActivity>>;

    /// Every site row of `date`, most time first.
    fn website_activities_for(&self, date: NaiveDate) -> StoreResult<Vec<WebsiteActivity>>;

    /// Merges `delta` into its (date, domain) row and recomputes that
    /// date's [`DailyActivity`], in one transaction.
    fn record_activity(
        &mut self,
        delta: &ActivityDelta,
    ) -> StoreResult<(WebsiteActivity, DailyActivity)>;

    fn daily_activity(&self, date: NaiveDate) -> StoreResult<Option<DailyActivity>>;

    /// Aggregates with `start <= date <= end`, ascending.
    fn daily_activities_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyActivity>>;

    // --- timers -----------------------------------------------------------

    fn timers(&self) -> StoreResult<Vec<WebsiteTimer>>;

    fn upsert_timer(&mut self, timer: &WebsiteTimer) -> StoreResult<()>;

    /// Returns whether a timer existed.
    fn delete_timer(&mut self, domain: &Domain) -> StoreResult<bool>;

    // --- blocks -----------------------------------------------------------

    fn blocked_websites(&self) -> StoreResult<Vec<BlockedWebsite>>;

    /// Fails with [`StoreError::DuplicatePattern`] when the pattern exists.
    fn insert_blocked_website(
        &mut self,
        url_pattern: &str,
        date_added: NaiveDateTime,
    ) -> StoreResult<BlockedWebsite>;

    /// Returns whether a block existed.
    fn delete_blocked_website(&mut self, id: i64) -> StoreResult<bool>;

    // --- settings ---------------------------------------------------------

    /// Stored settings, or defaults when none were ever saved.
    fn settings(&self) -> StoreResult<Settings>;

    fn put_settings(&mut self, settings: &Settings) -> StoreResult<()>;

    // --- export / import --------------------------------------------------

    /// Every table.
    fn export_data(&self) -> StoreResult<SnapshotData>;

    /// Replaces each table present in `data`; absent tables are kept.
    /// All-or-nothing.
    fn import_data(&mut self, data: &SnapshotData) -> StoreResult<()>;
}
