//! Engine actor - owns the session, caches and reminder state.
//!
//! Every host event, control request and alarm is a message on one queue,
//! handled to completion before the next one. Nothing here needs a lock.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored (the requester went away)
//! - Storage and host failures on background paths are logged and retried on
//!   the next natural trigger

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webtime_core::{
    normalize_pattern, BlockRule, Clock, DailyActivity, Domain, DomainError, Reminder, Settings,
    SettingsPatch, ThresholdTracker, WebsiteTimer,
};
use webtime_protocol::{Snapshot, SnapshotData, TrackingView};

use super::commands::{Alarm, EngineCommand, EngineError, TodayStats};
use super::focus::{FocusAction, FocusCoordinator, HostEvent};
use super::policy::PolicyCache;
use super::tracker::{FlushReport, SessionTracker};
use super::EngineConfig;
use crate::host::{HostActions, HostError};
use crate::store::{Store, StoreResult};

pub struct EngineActor {
    receiver: mpsc::Receiver<EngineCommand>,
    store: Box<dyn Store>,
    host: Box<dyn HostActions>,
    clock: Arc<dyn Clock>,
    tracker: SessionTracker,
    focus: FocusCoordinator,
    policy: PolicyCache,
    reminders: ThresholdTracker,
    settings: Settings,
    /// Day the per-day state (reminders, compiled rules) belongs to.
    current_day: NaiveDate,
}

impl EngineActor {
    /// Builds the actor and repopulates its caches from storage.
    pub fn new(
        receiver: mpsc::Receiver<EngineCommand>,
        store: Box<dyn Store>,
        host: Box<dyn HostActions>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> StoreResult<Self> {
        let policy = PolicyCache::load(store.as_ref(), config.block_page_url.clone())?;
        let settings = store.settings()?;
        let current_day = clock.today();

        let mut actor = Self {
            receiver,
            store,
            host,
            clock,
            tracker: SessionTracker::new(config.sleep_gap_secs),
            focus: FocusCoordinator::new(),
            policy,
            reminders: ThresholdTracker::new(),
            settings,
            current_day,
        };
        actor.recompile_rules();
        Ok(actor)
    }

    /// Processes commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!(day = %self.current_day, "Engine actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            if let EngineCommand::Shutdown { respond_to } = cmd {
                self.shutdown();
                let _ = respond_to.send(());
                return;
            }
            self.handle_command(cmd);
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        let now = self.clock.now();
        self.tracker.final_flush(self.store.as_mut(), now);
        info!("Engine actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    pub(crate) fn handle_command(&mut self, cmd: EngineCommand) {
        self.observe_day();

        match cmd {
            EngineCommand::Alarm(alarm) => self.handle_alarm(alarm),
            EngineCommand::HostEvent { event, respond_to } => {
                self.handle_host_event(event);
                let _ = respond_to.send(());
            }
            EngineCommand::GetTodayStats { respond_to } => {
                let _ = respond_to.send(self.handle_today_stats());
            }
            EngineCommand::GetWeeklyStats {
                start,
                end,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_weekly_stats(start, end));
            }
            EngineCommand::GetWebsiteList { date, respond_to } => {
                let result = self.store.website_activities_for(date).map_err(EngineError::from);
                let _ = respond_to.send(result);
            }
            EngineCommand::UpdateTimer {
                domain,
                time_limit,
                enabled,
                respond_to,
            } => {
                let result = self
                    .policy
                    .upsert_timer(self.store.as_mut(), &domain, time_limit, enabled);
                self.after_policy_mutation();
                let _ = respond_to.send(result);
            }
            EngineCommand::DeleteTimer { domain, respond_to } => {
                let result = self.policy.delete_timer(self.store.as_mut(), &domain);
                self.after_policy_mutation();
                let _ = respond_to.send(result);
            }
            EngineCommand::AddBlockedUrl {
                url_pattern,
                respond_to,
            } => {
                let now = self.clock.now();
                let result = self.policy.add_block(self.store.as_mut(), &url_pattern, now);
                self.after_policy_mutation();
                let _ = respond_to.send(result);
            }
            EngineCommand::RemoveBlockedUrl { id, respond_to } => {
                let result = self.policy.remove_block(self.store.as_mut(), id);
                self.after_policy_mutation();
                let _ = respond_to.send(result);
            }
            EngineCommand::GetSettings { respond_to } => {
                let _ = respond_to.send(self.settings.clone());
            }
            EngineCommand::UpdateSettings { patch, respond_to } => {
                let _ = respond_to.send(self.handle_update_settings(&patch));
            }
            EngineCommand::GetAllTimers { respond_to } => {
                let _ = respond_to.send(self.policy.timers().to_vec());
            }
            EngineCommand::GetBlockedWebsites { respond_to } => {
                let _ = respond_to.send(self.policy.blocked().to_vec());
            }
            EngineCommand::ExportData { respond_to } => {
                let result = self
                    .store
                    .export_data()
                    .map(|data| Snapshot::new(self.clock.now(), data))
                    .map_err(EngineError::from);
                let _ = respond_to.send(result);
            }
            EngineCommand::ImportData {
                document,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_import(document));
            }
            EngineCommand::CheckUrl { url, respond_to } => {
                let _ = respond_to.send(self.handle_check_url(&url));
            }
            EngineCommand::GetRules { respond_to } => {
                let _ = respond_to.send(self.policy.rules().clone());
            }
            EngineCommand::GetTrackingState { respond_to } => {
                let _ = respond_to.send(self.handle_tracking_state());
            }
            EngineCommand::Shutdown { respond_to } => {
                // Normally intercepted by `run`; treat a direct call the same.
                self.shutdown();
                let _ = respond_to.send(());
            }
        }
    }

    // ========================================================================
    // Day Boundary
    // ========================================================================

    /// Detects a calendar day change and resets per-day state.
    ///
    /// The session itself is split lazily by the tracker on its next flush;
    /// flushing here makes sure the previous day's tail is written before
    /// the new day's rules are compiled.
    fn observe_day(&mut self) {
        let today = self.clock.today();
        if today == self.current_day {
            return;
        }

        info!(from = %self.current_day, to = %today, "Day changed");
        let now = self.clock.now();
        let report = self.tracker.flush(self.store.as_mut(), now);
        self.current_day = today;
        self.reminders.reset();

        // Yesterday's timer rules must not mask a limit the new day's rows
        // already reach.
        self.policy.recompile(&[]);
        if !self.after_flush(report) {
            self.recompile_rules();
        }
    }

    // ========================================================================
    // Alarms
    // ========================================================================

    fn handle_alarm(&mut self, alarm: Alarm) {
        match alarm {
            Alarm::Flush => self.flush(),
            Alarm::CompileRules => self.recompile_rules(),
            Alarm::CheckReminders => self.check_reminders(),
            // `observe_day` already ran for this command.
            Alarm::DayCheck => {}
        }
    }

    fn flush(&mut self) {
        let now = self.clock.now();
        let report = self.tracker.flush(self.store.as_mut(), now);
        self.after_flush(report);
    }

    /// Enforces timers that the written rows just pushed over their limit.
    ///
    /// Returns whether rules were recompiled.
    fn after_flush(&mut self, report: FlushReport) -> bool {
        let tripped: Vec<Domain> = report
            .written
            .iter()
            .filter(|row| row.date == self.current_day)
            .filter(|row| {
                self.policy
                    .timer_for(&row.domain)
                    .is_some_and(|timer| timer.is_exceeded(row.time_spent))
            })
            .filter(|row| !self.policy.rules().has_timer_rule(&row.domain))
            .map(|row| row.domain.clone())
            .collect();

        if tripped.is_empty() {
            return false;
        }

        self.recompile_rules();
        for domain in tripped {
            info!(domain = %domain, "Daily limit reached");
            let Some(tab_id) = self.focus.tab_showing(&domain) else {
                continue;
            };
            if let Err(e) = self.host.reload_tab(tab_id) {
                warn!(tab_id, domain = %domain, error = %e, "Forced reload failed");
            }
        }
        true
    }

    /// Compiles against today's usage and installs the full set.
    ///
    /// On a storage failure the previously installed rules stay in place.
    fn recompile_rules(&mut self) {
        let today = match self.store.website_activities_for(self.current_day) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Could not read usage, keeping previous rules");
                return;
            }
        };

        let rules = self.policy.recompile(&today).clone();
        match self.host.install_rules(&rules) {
            Ok(()) => debug!(rules = rules.len(), "Installed rules"),
            Err(HostError::NotConnected) => {
                debug!(rules = rules.len(), "No host connected, rules kept for next subscriber");
            }
        }
    }

    fn check_reminders(&mut self) {
        if !self.settings.reminder_enabled {
            return;
        }

        let rows = match self.store.website_activities_for(self.current_day) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Could not read usage for reminders");
                return;
            }
        };

        let thresholds = self.settings.effective_thresholds();
        for row in &rows {
            for threshold in self.reminders.due(&row.domain, row.time_spent, &thresholds) {
                let reminder =
                    Reminder::for_threshold(self.current_day, &row.domain, threshold, row.time_spent);
                match self.host.notify(&reminder) {
                    Ok(()) => {
                        info!(domain = %row.domain, threshold, "Reminder sent");
                        self.reminders.mark_sent(&row.domain, threshold);
                    }
                    Err(e) => {
                        debug!(domain = %row.domain, threshold, error = %e, "Reminder not delivered");
                    }
                }
            }
        }
    }

    // ========================================================================
    // Host Events
    // ========================================================================

    fn handle_host_event(&mut self, event: HostEvent) {
        let now = self.clock.now();
        let store = self.store.as_mut();

        let report = match self.focus.on_event(event) {
            FocusAction::Start {
                domain,
                favicon_url,
                paused,
            } => self.tracker.start(store, domain, favicon_url, now, paused),
            FocusAction::Continue { favicon_url } => {
                if let Some(favicon_url) = favicon_url {
                    self.tracker.update_favicon(favicon_url);
                }
                self.tracker.flush(store, now)
            }
            FocusAction::Stop => self.tracker.stop(store, now),
            FocusAction::Pause => self.tracker.pause(store, now),
            FocusAction::Resume => {
                self.tracker.resume(now);
                FlushReport::default()
            }
            FocusAction::Ignore => FlushReport::default(),
        };

        self.after_flush(report);
    }

    // ========================================================================
    // Control Requests
    // ========================================================================

    fn handle_today_stats(&mut self) -> Result<TodayStats, EngineError> {
        self.flush();
        let websites = self.store.website_activities_for(self.current_day)?;
        let daily = self
            .store
            .daily_activity(self.current_day)?
            .unwrap_or_else(|| DailyActivity::empty(self.current_day));
        Ok(TodayStats { daily, websites })
    }

    fn handle_weekly_stats(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyActivity>, EngineError> {
        if start > end {
            return Err(DomainError::InvalidFieldValue {
                field: "date range".to_string(),
                value: format!("{start}..{end}"),
                expected: "start_date on or before end_date".to_string(),
            }
            .into());
        }
        Ok(self.store.daily_activities_between(start, end)?)
    }

    fn after_policy_mutation(&mut self) {
        if let Err(e) = self.policy.refresh(self.store.as_ref()) {
            warn!(error = %e, "Policy cache refresh failed");
        }
        self.recompile_rules();
    }

    fn handle_update_settings(&mut self, patch: &SettingsPatch) -> Result<Settings, EngineError> {
        let (next, change) = patch.apply(&self.settings)?;
        self.store.put_settings(&next)?;
        self.settings = next;

        if change.reminders_enabled {
            info!("Reminders enabled, re-evaluating thresholds");
            self.reminders.reset();
            self.check_reminders();
        }
        self.after_policy_mutation();
        Ok(self.settings.clone())
    }

    fn handle_import(&mut self, document: serde_json::Value) -> Result<(), EngineError> {
        let snapshot = Snapshot::from_value(document)?;
        validate_import(&snapshot.data)?;

        self.store.import_data(&snapshot.data)?;
        info!(version = snapshot.version, "Snapshot imported");

        self.policy.refresh(self.store.as_ref())?;
        self.settings = self.store.settings()?;
        self.reminders.reset();
        self.recompile_rules();
        Ok(())
    }

    fn handle_check_url(&self, url: &str) -> Option<BlockRule> {
        self.policy.rules().first_match(url).cloned()
    }

    fn handle_tracking_state(&self) -> TrackingView {
        let domain = self.tracker.active_domain().cloned();
        let today_seconds = domain
            .as_ref()
            .and_then(|d| self.store.website_activity(self.current_day, d).ok().flatten())
            .map(|row| row.time_spent)
            .unwrap_or(0);

        TrackingView {
            state: self.focus.state(),
            domain,
            tab_id: self.focus.tab_id(),
            today_seconds,
        }
    }

    // ========================================================================
    // Test Helpers
    // ========================================================================

    #[cfg(test)]
    pub(crate) fn current_day(&self) -> NaiveDate {
        self.current_day
    }
}

/// Rejects imported rows that the control surface would never have accepted.
fn validate_import(data: &SnapshotData) -> Result<(), EngineError> {
    if let Some(timers) = &data.website_timers {
        for timer in timers {
            let domain = Domain::parse(timer.domain.as_str())?;
            let limit = i64::try_from(timer.time_limit).unwrap_or(i64::MAX);
            WebsiteTimer::new(domain, limit, timer.enabled)?;
        }
    }

    if let Some(blocked) = &data.blocked_websites {
        for block in blocked {
            normalize_pattern(&block.url_pattern)?;
        }
    }

    if let Some(rows) = &data.website_activity {
        for row in rows {
            Domain::parse(row.domain.as_str())?;
        }
    }

    if let Some(settings) = &data.settings {
        let thresholds = settings.reminder_thresholds.as_deref().unwrap_or_default();
        if thresholds.contains(&0) {
            return Err(DomainError::InvalidFieldValue {
                field: "reminder_thresholds".to_string(),
                value: "0".to_string(),
                expected: "positive number of seconds".to_string(),
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::store::SqliteStore;
    use chrono::NaiveDateTime;
    use std::sync::Mutex;
    use tokio::sync::oneshot;
    use webtime_core::{ManualClock, RuleSet};

    #[derive(Clone, Default)]
    struct RecordingHost {
        reloads: Arc<Mutex<Vec<i64>>>,
        notifications: Arc<Mutex<Vec<Reminder>>>,
        installs: Arc<Mutex<Vec<RuleSet>>>,
    }

    impl HostActions for RecordingHost {
        fn install_rules(&mut self, rules: &RuleSet) -> Result<(), HostError> {
            self.installs.lock().unwrap().push(rules.clone());
            Ok(())
        }

        fn notify(&mut self, reminder: &Reminder) -> Result<(), HostError> {
            self.notifications.lock().unwrap().push(reminder.clone());
            Ok(())
        }

        fn reload_tab(&mut self, tab_id: i64) -> Result<(), HostError> {
            self.reloads.lock().unwrap().push(tab_id);
            Ok(())
        }
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn create_actor(start: &str) -> (EngineActor, Arc<ManualClock>, RecordingHost) {
        let (_tx, rx) = mpsc::channel(8);
        let clock = Arc::new(ManualClock::new(at(start)));
        let host = RecordingHost::default();
        let actor = EngineActor::new(
            rx,
            Box::new(SqliteStore::open_in_memory().unwrap()),
            Box::new(host.clone()),
            clock.clone(),
            &EngineConfig::default(),
        )
        .unwrap();
        (actor, clock, host)
    }

    fn visit(actor: &mut EngineActor, tab_id: i64, url: &str) {
        let (tx, _rx) = oneshot::channel();
        actor.handle_command(EngineCommand::HostEvent {
            event: HostEvent::TabActivated {
                tab_id,
                url: url.to_string(),
                favicon_url: None,
            },
            respond_to: tx,
        });
    }

    #[test]
    fn test_timer_trip_reloads_tab_once() {
        let (mut actor, clock, host) = create_actor("2024-01-01 10:00:00");

        let (tx, _rx) = oneshot::channel();
        actor.handle_command(EngineCommand::UpdateTimer {
            domain: "news.example".to_string(),
            time_limit: 60,
            enabled: true,
            respond_to: tx,
        });

        visit(&mut actor, 5, "https://news.example/");
        clock.advance_secs(30);
        actor.handle_command(EngineCommand::Alarm(Alarm::Flush));
        assert!(host.reloads.lock().unwrap().is_empty());

        clock.advance_secs(30);
        actor.handle_command(EngineCommand::Alarm(Alarm::Flush));
        assert_eq!(*host.reloads.lock().unwrap(), vec![5]);
        assert!(actor
            .policy
            .rules()
            .has_timer_rule(&Domain::parse("news.example").unwrap()));

        clock.advance_secs(10);
        actor.handle_command(EngineCommand::Alarm(Alarm::Flush));
        assert_eq!(host.reloads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_day_change_resets_rules() {
        let (mut actor, clock, _host) = create_actor("2024-01-01 23:00:00");

        let (tx, _rx) = oneshot::channel();
        actor.handle_command(EngineCommand::UpdateTimer {
            domain: "news.example".to_string(),
            time_limit: 60,
            enabled: true,
            respond_to: tx,
        });
        visit(&mut actor, 1, "https://news.example/");
        clock.advance_secs(120);
        actor.handle_command(EngineCommand::Alarm(Alarm::Flush));
        assert_eq!(actor.policy.rules().len(), 1);

        clock.set(at("2024-01-02 08:00:00"));
        actor.handle_command(EngineCommand::Alarm(Alarm::DayCheck));
        assert_eq!(actor.current_day(), clock.today());
        assert!(actor.policy.rules().is_empty());
    }

    #[test]
    fn test_limit_reached_at_day_change_reloads_tab() {
        let (mut actor, clock, host) = create_actor("2024-01-01 23:59:00");

        let (tx, _rx) = oneshot::channel();
        actor.handle_command(EngineCommand::UpdateTimer {
            domain: "news.example".to_string(),
            time_limit: 60,
            enabled: true,
            respond_to: tx,
        });
        visit(&mut actor, 4, "https://news.example/");
        clock.advance_secs(50);
        actor.handle_command(EngineCommand::Alarm(Alarm::Flush));
        assert!(host.reloads.lock().unwrap().is_empty());

        // The first command after midnight writes 10s to yesterday and 90s
        // to today, which is over the limit.
        clock.advance_secs(100);
        actor.handle_command(EngineCommand::Alarm(Alarm::DayCheck));
        assert_eq!(*host.reloads.lock().unwrap(), vec![4]);
        assert!(actor
            .policy
            .rules()
            .has_timer_rule(&Domain::parse("news.example").unwrap()));
    }

    #[test]
    fn test_validate_import_rejects_bad_timer() {
        let data = SnapshotData {
            website_timers: Some(vec![WebsiteTimer {
                domain: Domain::parse("news.example").unwrap(),
                time_limit: 0,
                enabled: true,
            }]),
            ..SnapshotData::default()
        };
        assert!(matches!(
            validate_import(&data),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
