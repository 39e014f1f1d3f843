//! Engine actor commands and errors.
//!
//! Requests carry a `oneshot` sender for the reply; alarms and shutdown are
//! the only commands the periodic tasks send.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use webtime_core::{
    BlockRule, BlockedWebsite, DailyActivity, DomainError, RuleSet, Settings, SettingsPatch,
    WebsiteActivity, WebsiteTimer,
};
use webtime_protocol::{ErrorCode, Snapshot, SnapshotError, TrackingView};

use super::focus::HostEvent;
use crate::store::StoreError;

/// Reply channel for fallible requests.
pub type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

// ============================================================================
// Alarms
// ============================================================================

/// Periodic triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    Flush,
    CompileRules,
    CheckReminders,
    DayCheck,
}

// ============================================================================
// Engine Commands
// ============================================================================

#[derive(Debug)]
pub enum EngineCommand {
    Alarm(Alarm),

    HostEvent {
        event: HostEvent,
        respond_to: oneshot::Sender<()>,
    },

    GetTodayStats {
        respond_to: Reply<TodayStats>,
    },
    GetWeeklyStats {
        start: NaiveDate,
        end: NaiveDate,
        respond_to: Reply<Vec<DailyActivity>>,
    },
    GetWebsiteList {
        date: NaiveDate,
        respond_to: Reply<Vec<WebsiteActivity>>,
    },
    UpdateTimer {
        domain: String,
        time_limit: i64,
        enabled: bool,
        respond_to: Reply<WebsiteTimer>,
    },
    DeleteTimer {
        domain: String,
        respond_to: Reply<bool>,
    },
    AddBlockedUrl {
        url_pattern: String,
        respond_to: Reply<BlockedWebsite>,
    },
    RemoveBlockedUrl {
        id: i64,
        respond_to: Reply<bool>,
    },
    GetSettings {
        respond_to: oneshot::Sender<Settings>,
    },
    UpdateSettings {
        patch: SettingsPatch,
        respond_to: Reply<Settings>,
    },
    GetAllTimers {
        respond_to: oneshot::Sender<Vec<WebsiteTimer>>,
    },
    GetBlockedWebsites {
        respond_to: oneshot::Sender<Vec<BlockedWebsite>>,
    },
    ExportData {
        respond_to: Reply<Snapshot>,
    },
    ImportData {
        document: serde_json::Value,
        respond_to: Reply<()>,
    },
    CheckUrl {
        url: String,
        respond_to: oneshot::Sender<Option<BlockRule>>,
    },
    GetRules {
        respond_to: oneshot::Sender<RuleSet>,
    },
    GetTrackingState {
        respond_to: oneshot::Sender<TrackingView>,
    },

    /// Final flush, then the actor exits.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Today's aggregate and its per-site rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodayStats {
    pub daily: DailyActivity,
    pub websites: Vec<WebsiteActivity>,
}

// ============================================================================
// Engine Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidInput(#[from] DomainError),

    #[error("invalid import document: {0}")]
    InvalidImport(#[from] SnapshotError),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("engine is not running")]
    ChannelClosed,
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicatePattern(pattern) => Self::Duplicate(pattern),
            other => Self::Storage(other),
        }
    }
}

impl EngineError {
    /// Wire error category.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) | Self::InvalidImport(_) | Self::Duplicate(_) => {
                ErrorCode::InvalidInput
            }
            Self::Storage(_) => ErrorCode::Storage,
            Self::ChannelClosed => ErrorCode::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_pattern_maps_to_duplicate() {
        let err: EngineError = StoreError::DuplicatePattern("shop".to_string()).into();
        assert!(matches!(err, EngineError::Duplicate(ref p) if p == "shop"));
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_error_codes() {
        let err = EngineError::InvalidInput(DomainError::InvalidTimeLimit { limit: -1 });
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert!(err.to_string().contains("-1"));

        let err: EngineError = StoreError::Unavailable("disk".to_string()).into();
        assert_eq!(err.code(), ErrorCode::Storage);

        assert_eq!(EngineError::ChannelClosed.code(), ErrorCode::Unavailable);
    }

    #[test]
    fn test_missing_version_import_error() {
        let err: EngineError = SnapshotError::MissingField("version").into();
        assert!(err.to_string().contains("version"));
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }
}
