//! Client interface for the engine actor.
//!
//! `EngineHandle` is cheap to clone and shared by the socket server, the
//! alarm tasks and the daemon lifecycle. Every method is one round trip over
//! the command queue.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `EngineError::ChannelClosed`

use chrono::NaiveDate;
use tokio::sync::{broadcast, mpsc, oneshot};

use webtime_core::{
    BlockRule, BlockedWebsite, DailyActivity, RuleSet, Settings, SettingsPatch, WebsiteActivity,
    WebsiteTimer,
};
use webtime_protocol::{Snapshot, TrackingView};

use super::commands::{Alarm, EngineCommand, EngineError, Reply, TodayStats};
use super::focus::HostEvent;
use crate::host::{HostDirective, HostPresence};

#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
    directive_sender: broadcast::Sender<HostDirective>,
    presence: HostPresence,
}

impl EngineHandle {
    pub fn new(
        sender: mpsc::Sender<EngineCommand>,
        directive_sender: broadcast::Sender<HostDirective>,
        presence: HostPresence,
    ) -> Self {
        Self {
            sender,
            directive_sender,
            presence,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn query<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    // ========================================================================
    // Host Events and Alarms
    // ========================================================================

    /// Queues a host event and waits until the engine has applied it.
    pub async fn host_event(&self, event: HostEvent) -> Result<(), EngineError> {
        self.query(|respond_to| EngineCommand::HostEvent { event, respond_to })
            .await
    }

    /// Fire-and-forget; a closed queue means the engine is stopping.
    pub async fn alarm(&self, alarm: Alarm) -> Result<(), EngineError> {
        self.sender
            .send(EngineCommand::Alarm(alarm))
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub async fn today_stats(&self) -> Result<TodayStats, EngineError> {
        self.request(|respond_to| EngineCommand::GetTodayStats { respond_to })
            .await
    }

    /// Daily aggregates for `start..=end`.
    pub async fn weekly_stats(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyActivity>, EngineError> {
        self.request(|respond_to| EngineCommand::GetWeeklyStats {
            start,
            end,
            respond_to,
        })
        .await
    }

    pub async fn website_list(&self, date: NaiveDate) -> Result<Vec<WebsiteActivity>, EngineError> {
        self.request(|respond_to| EngineCommand::GetWebsiteList { date, respond_to })
            .await
    }

    pub async fn tracking_state(&self) -> Result<TrackingView, EngineError> {
        self.query(|respond_to| EngineCommand::GetTrackingState { respond_to })
            .await
    }

    // ========================================================================
    // Policy
    // ========================================================================

    pub async fn update_timer(
        &self,
        domain: String,
        time_limit: i64,
        enabled: bool,
    ) -> Result<WebsiteTimer, EngineError> {
        self.request(|respond_to| EngineCommand::UpdateTimer {
            domain,
            time_limit,
            enabled,
            respond_to,
        })
        .await
    }

    /// Returns whether a timer existed.
    pub async fn delete_timer(&self, domain: String) -> Result<bool, EngineError> {
        self.request(|respond_to| EngineCommand::DeleteTimer { domain, respond_to })
            .await
    }

    pub async fn add_blocked_url(&self, url_pattern: String) -> Result<BlockedWebsite, EngineError> {
        self.request(|respond_to| EngineCommand::AddBlockedUrl {
            url_pattern,
            respond_to,
        })
        .await
    }

    /// Returns whether a block existed.
    pub async fn remove_blocked_url(&self, id: i64) -> Result<bool, EngineError> {
        self.request(|respond_to| EngineCommand::RemoveBlockedUrl { id, respond_to })
            .await
    }

    pub async fn all_timers(&self) -> Result<Vec<WebsiteTimer>, EngineError> {
        self.query(|respond_to| EngineCommand::GetAllTimers { respond_to })
            .await
    }

    pub async fn blocked_websites(&self) -> Result<Vec<BlockedWebsite>, EngineError> {
        self.query(|respond_to| EngineCommand::GetBlockedWebsites { respond_to })
            .await
    }

    /// Highest-priority rule that would redirect `url`.
    pub async fn check_url(&self, url: String) -> Result<Option<BlockRule>, EngineError> {
        self.query(|respond_to| EngineCommand::CheckUrl { url, respond_to })
            .await
    }

    /// The rule set most recently compiled.
    pub async fn rules(&self) -> Result<RuleSet, EngineError> {
        self.query(|respond_to| EngineCommand::GetRules { respond_to })
            .await
    }

    // ========================================================================
    // Settings and Data
    // ========================================================================

    pub async fn settings(&self) -> Result<Settings, EngineError> {
        self.query(|respond_to| EngineCommand::GetSettings { respond_to })
            .await
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings, EngineError> {
        self.request(|respond_to| EngineCommand::UpdateSettings { patch, respond_to })
            .await
    }

    pub async fn export_data(&self) -> Result<Snapshot, EngineError> {
        self.request(|respond_to| EngineCommand::ExportData { respond_to })
            .await
    }

    /// Validates and imports a snapshot document; nothing changes on error.
    pub async fn import_data(&self, document: serde_json::Value) -> Result<(), EngineError> {
        self.request(|respond_to| EngineCommand::ImportData {
            document,
            respond_to,
        })
        .await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Asks the actor to flush and stop. Returns once it has done so.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.query(|respond_to| EngineCommand::Shutdown { respond_to })
            .await
    }

    /// Receiver for rule installs, notifications and reloads.
    pub fn subscribe_directives(&self) -> broadcast::Receiver<HostDirective> {
        self.directive_sender.subscribe()
    }

    /// Subscribed-host count the engine checks before publishing.
    ///
    /// Whoever consumes [`subscribe_directives`](Self::subscribe_directives)
    /// on behalf of hosts keeps it current.
    pub fn host_presence(&self) -> &HostPresence {
        &self.presence
    }
}
