//! webtime Core - Domain types for per-site time tracking and policy
//!
//! This crate provides the pure domain model shared between the daemon
//! (webtimed) and the wire protocol: activity rows, the tracking session,
//! timers and blocks, the block-rule compiler and the reminder tracker.
//! Nothing here performs I/O.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod activity;
pub mod calendar;
pub mod domain;
pub mod error;
pub mod policy;
pub mod reminder;
pub mod session;
pub mod settings;

// Re-exports for convenience
pub use activity::{ActivityDelta, DailyActivity, WebsiteActivity};
pub use calendar::{Clock, ManualClock, SystemClock, SECONDS_PER_DAY};
pub use domain::{Domain, Locator};
pub use error::{DomainError, DomainResult};
pub use policy::{
    compile_rules, normalize_pattern, BlockRule, BlockedWebsite, MatchKind, PolicySnapshot,
    RuleReason, RuleSet, WebsiteTimer,
};
pub use reminder::{Reminder, ThresholdTracker, DEFAULT_THRESHOLDS};
pub use session::{ActiveSite, Elapsed, RolloverSlice, Session};
pub use settings::{Settings, SettingsChange, SettingsPatch};
