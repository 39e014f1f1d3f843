//! Versioned full-database export document.
//!
//! ```json
//! { "version": 1, "exported_at": "...", "data": { "daily_activity": [...], ... } }
//! ```
//!
//! Tables absent from `data` are left untouched on import.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use webtime_core::{BlockedWebsite, DailyActivity, Settings, WebsiteActivity, WebsiteTimer};

/// Export format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Reasons an import document is refused. Nothing is written when any of
/// these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Import document is not a JSON object")]
    NotAnObject,

    #[error("Import document has no '{0}' field")]
    MissingField(&'static str),

    #[error("Unsupported export version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u64, supported: u32 },

    #[error("Malformed import document: {0}")]
    Malformed(String),
}

/// Every table of the local database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_activity: Option<Vec<DailyActivity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_activity: Option<Vec<WebsiteActivity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_timers: Option<Vec<WebsiteTimer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_websites: Option<Vec<BlockedWebsite>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<NaiveDateTime>,
    pub data: SnapshotData,
}

impl Snapshot {
    pub fn new(exported_at: NaiveDateTime, data: SnapshotData) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            exported_at: Some(exported_at),
            data,
        }
    }

    /// Validates and decodes an untrusted import document.
    ///
    /// Presence of `version` and `data` is checked before anything else so
    /// a document missing either is reported as such rather than as a
    /// generic decode failure.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SnapshotError> {
        let object = value.as_object().ok_or(SnapshotError::NotAnObject)?;

        let version = object
            .get("version")
            .filter(|v| !v.is_null())
            .ok_or(SnapshotError::MissingField("version"))?;
        if !object.get("data").is_some_and(|d| !d.is_null()) {
            return Err(SnapshotError::MissingField("data"));
        }

        let found = version
            .as_u64()
            .ok_or_else(|| SnapshotError::Malformed("version must be a positive integer".to_string()))?;
        if found == 0 || found > u64::from(SNAPSHOT_VERSION) {
            return Err(SnapshotError::UnsupportedVersion {
                found,
                supported: SNAPSHOT_VERSION,
            });
        }

        serde_json::from_value(value).map_err(|e| SnapshotError::Malformed(e.to_string()))
    }
}
