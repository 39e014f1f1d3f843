//! Protocol message types for daemon communication.
//!
//! Every line on the socket is one JSON object tagged by `"type"`. Browser
//! hosts send tab/focus/idle events and receive directives; the presentation
//! layer sends control requests and receives exactly one response each.

use crate::snapshot::Snapshot;
use crate::version::ProtocolVersion;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use webtime_core::{
    BlockRule, BlockedWebsite, DailyActivity, Domain, Reminder, RuleReason, RuleSet, Settings,
    SettingsPatch, WebsiteActivity, WebsiteTimer,
};

/// Host idle-detector states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

/// Coarse state of the focus coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusState {
    Tracking,
    Idle,
    NoFocus,
}

/// What the engine is currently timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingView {
    pub state: FocusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    pub today_seconds: u64,
}

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Start receiving host directives (rules, notifications, reloads).
    Subscribe,

    Unsubscribe,

    Ping {
        seq: u64,
    },

    Disconnect,

    // ------------------------------------------------------------------
    // Host events
    // ------------------------------------------------------------------
    TabActivated {
        tab_id: i64,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        favicon_url: Option<String>,
    },

    /// Navigation or favicon change in a tab. Only matters for the
    /// focused tab.
    TabUpdated {
        tab_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        favicon_url: Option<String>,
    },

    TabRemoved {
        tab_id: i64,
    },

    /// Browser window gained or lost OS focus. When gained, the host
    /// reports the active tab of the focused window.
    WindowFocusChanged {
        focused: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        favicon_url: Option<String>,
    },

    IdleStateChanged {
        state: IdleState,
    },

    // ------------------------------------------------------------------
    // Control requests
    // ------------------------------------------------------------------
    GetTodayStats,

    GetWeeklyStats {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },

    GetWebsiteList {
        date: NaiveDate,
    },

    UpdateTimer {
        domain: String,
        time_limit: i64,
        enabled: bool,
    },

    DeleteTimer {
        domain: String,
    },

    AddBlockedUrl {
        url_pattern: String,
    },

    RemoveBlockedUrl {
        id: i64,
    },

    GetSettings,

    UpdateSettings {
        settings: SettingsPatch,
    },

    GetAllTimers,

    GetBlockedWebsites,

    ExportData,

    /// The document is kept raw so validation can report exactly which
    /// field is missing.
    ImportData {
        snapshot: serde_json::Value,
    },

    CheckUrl {
        url: String,
    },

    GetTrackingState,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn subscribe() -> Self {
        Self::new(MessageType::Subscribe)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }

    /// True for messages that only a browser host sends.
    pub fn is_host_event(&self) -> bool {
        matches!(
            self.message,
            MessageType::TabActivated { .. }
                | MessageType::TabUpdated { .. }
                | MessageType::TabRemoved { .. }
                | MessageType::WindowFocusChanged { .. }
                | MessageType::IdleStateChanged { .. }
        )
    }
}

/// Machine-readable error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Storage,
    Unavailable,
    Protocol,
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DaemonMessage {
    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
        /// Seconds of no input after which the host should report idle.
        idle_threshold_secs: u64,
    },

    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    Pong {
        seq: u64,
    },

    /// Acknowledges a host event or a mutating request.
    Ack {
        success: bool,
    },

    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },

    // ------------------------------------------------------------------
    // Control responses
    // ------------------------------------------------------------------
    TodayStats {
        daily: DailyActivity,
        websites: Vec<WebsiteActivity>,
    },

    WeeklyStats {
        activities: Vec<DailyActivity>,
    },

    WebsiteList {
        websites: Vec<WebsiteActivity>,
    },

    Settings {
        settings: Settings,
    },

    Timers {
        timers: Vec<WebsiteTimer>,
    },

    Blocked {
        blocked: Vec<BlockedWebsite>,
    },

    ExportedData {
        snapshot: Snapshot,
    },

    UrlVerdict {
        url: String,
        blocked: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<RuleReason>,
    },

    TrackingState {
        tracking: TrackingView,
    },

    // ------------------------------------------------------------------
    // Host directives
    // ------------------------------------------------------------------
    /// Full replacement of the host's redirect rules.
    InstallRules {
        rules: RuleSet,
    },

    ShowNotification {
        id: String,
        title: String,
        body: String,
    },

    ReloadTab {
        tab_id: i64,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String, idle_threshold_secs: u64) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
            idle_threshold_secs,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn ack(success: bool) -> Self {
        Self::Ack { success }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: ErrorCode) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code),
        }
    }

    pub fn url_verdict(url: String, rule: Option<&BlockRule>) -> Self {
        Self::UrlVerdict {
            url,
            blocked: rule.is_some(),
            reason: rule.map(|r| r.reason.clone()),
        }
    }

    pub fn notification(reminder: Reminder) -> Self {
        Self::ShowNotification {
            id: reminder.id,
            title: reminder.title,
            body: reminder.body,
        }
    }
}
