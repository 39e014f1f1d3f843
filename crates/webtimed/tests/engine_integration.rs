//! End-to-end tests of the engine against in-memory SQLite and a manual
//! clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use tokio::sync::broadcast;

use webtime_core::{
    ActivityDelta, BlockedWebsite, Clock, DailyActivity, Domain, ManualClock, RuleReason,
    Settings, SettingsPatch, WebsiteActivity, WebsiteTimer,
};
use webtime_protocol::{IdleState, SnapshotData};
use webtimed::engine::{spawn_engine, Alarm, EngineConfig, EngineError, EngineHandle, HostEvent};
use webtimed::host::HostDirective;
use webtimed::store::{SqliteStore, Store, StoreError, StoreResult};

// ============================================================================
// Fixtures
// ============================================================================

/// Delegates to SQLite; activity writes fail while `failing` is set.
struct FlakyStore {
    inner: SqliteStore,
    failing: Arc<AtomicBool>,
}

impl Store for FlakyStore {
    fn website_activity(
        &self,
        date: NaiveDate,
        domain: &Domain,
    ) -> StoreResult<Option<WebsiteActivity>> {
        self.inner.website_activity(date, domain)
    }

    fn website_activities_for(&self, date: NaiveDate) -> StoreResult<Vec<WebsiteActivity>> {
        self.inner.website_activities_for(date)
    }

    fn record_activity(
        &mut self,
        delta: &ActivityDelta,
    ) -> StoreResult<(WebsiteActivity, DailyActivity)> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.record_activity(delta)
    }

    fn daily_activity(&self, date: NaiveDate) -> StoreResult<Option<DailyActivity>> {
        self.inner.daily_activity(date)
    }

    fn daily_activities_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyActivity>> {
        self.inner.daily_activities_between(start, end)
    }

    fn timers(&self) -> StoreResult<Vec<WebsiteTimer>> {
        self.inner.timers()
    }

    fn upsert_timer(&mut self, timer: &WebsiteTimer) -> StoreResult<()> {
        self.inner.upsert_timer(timer)
    }

    fn delete_timer(&mut self, domain: &Domain) -> StoreResult<bool> {
        self.inner.delete_timer(domain)
    }

    fn blocked_websites(&self) -> StoreResult<Vec<BlockedWebsite>> {
        self.inner.blocked_websites()
    }

    fn insert_blocked_website(
        &mut self,
        url_pattern: &str,
        date_added: NaiveDateTime,
    ) -> StoreResult<BlockedWebsite> {
        self.inner.insert_blocked_website(url_pattern, date_added)
    }

    fn delete_blocked_website(&mut self, id: i64) -> StoreResult<bool> {
        self.inner.delete_blocked_website(id)
    }

    fn settings(&self) -> StoreResult<Settings> {
        self.inner.settings()
    }

    fn put_settings(&mut self, settings: &Settings) -> StoreResult<()> {
        self.inner.put_settings(settings)
    }

    fn export_data(&self) -> StoreResult<SnapshotData> {
        self.inner.export_data()
    }

    fn import_data(&mut self, data: &SnapshotData) -> StoreResult<()> {
        self.inner.import_data(data)
    }
}

struct Harness {
    engine: EngineHandle,
    clock: Arc<ManualClock>,
    directives: broadcast::Receiver<HostDirective>,
    failing: Arc<AtomicBool>,
}

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn start(now: &str) -> Harness {
    let failing = Arc::new(AtomicBool::new(false));
    let store = FlakyStore {
        inner: SqliteStore::open_in_memory().unwrap(),
        failing: Arc::clone(&failing),
    };
    let clock = Arc::new(ManualClock::new(at(now)));
    let engine = spawn_engine(Box::new(store), clock.clone(), &EngineConfig::default()).unwrap();
    let directives = engine.subscribe_directives();
    // The harness receiver plays the subscribed host.
    engine.host_presence().set(1);
    Harness {
        engine,
        clock,
        directives,
        failing,
    }
}

impl Harness {
    async fn visit(&self, tab_id: i64, url: &str) {
        self.engine
            .host_event(HostEvent::TabActivated {
                tab_id,
                url: url.to_string(),
                favicon_url: None,
            })
            .await
            .unwrap();
    }

    async fn idle(&self, state: IdleState) {
        self.engine
            .host_event(HostEvent::IdleStateChanged(state))
            .await
            .unwrap();
    }

    async fn lose_focus(&self) {
        self.engine
            .host_event(HostEvent::WindowFocusChanged {
                focused: false,
                tab_id: None,
                url: None,
                favicon_url: None,
            })
            .await
            .unwrap();
    }

    /// Sends an alarm and waits until the engine has processed it.
    async fn alarm(&self, alarm: Alarm) {
        self.engine.alarm(alarm).await.unwrap();
        self.engine.settings().await.unwrap();
    }

    async fn advance_and_flush(&self, seconds: i64) {
        self.clock.advance_secs(seconds);
        self.alarm(Alarm::Flush).await;
    }

    async fn spent(&self, date: &str, domain: &str) -> (u64, u32) {
        self.engine
            .website_list(day(date))
            .await
            .unwrap()
            .into_iter()
            .find(|row| row.domain.as_str() == domain)
            .map(|row| (row.time_spent, row.visit_count))
            .unwrap_or((0, 0))
    }

    fn drain_notifications(&mut self) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(directive) = self.directives.try_recv() {
            if let HostDirective::ShowNotification(reminder) = directive {
                ids.push(reminder.id);
            }
        }
        ids
    }

    fn drain_reloads(&mut self) -> Vec<i64> {
        let mut tabs = Vec::new();
        while let Ok(directive) = self.directives.try_recv() {
            if let HostDirective::ReloadTab { tab_id } = directive {
                tabs.push(tab_id);
            }
        }
        tabs
    }
}

// ============================================================================
// Session Tracking
// ============================================================================

#[tokio::test]
async fn test_daily_total_equals_sum_of_sites() {
    let h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    h.advance_and_flush(40).await;
    h.clock.advance_secs(20);
    h.visit(2, "https://docs.example/guide").await;
    h.advance_and_flush(75).await;
    h.clock.advance_secs(5);
    h.visit(1, "https://news.example/world").await;
    h.clock.advance_secs(12);
    h.lose_focus().await;

    let stats = h.engine.today_stats().await.unwrap();
    let sum: u64 = stats.websites.iter().map(|row| row.time_spent).sum();
    assert_eq!(sum, 40 + 20 + 75 + 5 + 12);
    assert_eq!(stats.daily.total_time, sum);
    assert_eq!(stats.daily.website_count, 2);
    assert_eq!(h.spent("2024-03-04", "news.example").await, (72, 2));
    assert_eq!(h.spent("2024-03-04", "docs.example").await, (80, 1));
}

#[tokio::test]
async fn test_immediate_second_flush_changes_nothing() {
    let h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    h.advance_and_flush(15).await;
    let before = h.spent("2024-03-04", "news.example").await;
    h.alarm(Alarm::Flush).await;

    assert_eq!(before, (15, 1));
    assert_eq!(h.spent("2024-03-04", "news.example").await, before);
}

#[tokio::test]
async fn test_session_across_midnight_is_split() {
    let h = start("2024-03-04 23:59:50");

    h.visit(1, "https://news.example/").await;
    h.advance_and_flush(20).await;

    assert_eq!(h.spent("2024-03-04", "news.example").await, (10, 1));
    assert_eq!(h.spent("2024-03-05", "news.example").await, (10, 1));

    let week = h
        .engine
        .weekly_stats(day("2024-03-04"), day("2024-03-10"))
        .await
        .unwrap();
    assert_eq!(week.len(), 2);
    assert!(week.iter().all(|d| d.total_time == 10));
}

#[tokio::test]
async fn test_idle_time_is_discarded() {
    let h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    h.clock.advance_secs(30);
    h.idle(IdleState::Idle).await;
    h.advance_and_flush(300).await;
    h.clock.advance_secs(300);
    h.idle(IdleState::Active).await;
    h.advance_and_flush(10).await;

    assert_eq!(h.spent("2024-03-04", "news.example").await.0, 40);
}

#[tokio::test]
async fn test_failed_write_is_retried() {
    let h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    h.failing.store(true, Ordering::SeqCst);
    h.advance_and_flush(20).await;
    assert_eq!(h.spent("2024-03-04", "news.example").await.0, 0);

    h.failing.store(false, Ordering::SeqCst);
    h.advance_and_flush(10).await;
    assert_eq!(h.spent("2024-03-04", "news.example").await, (30, 1));
}

#[tokio::test]
async fn test_storage_outage_longer_than_sleep_gap_is_kept() {
    let h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    h.failing.store(true, Ordering::SeqCst);
    for _ in 0..96 {
        h.advance_and_flush(10).await;
    }
    assert_eq!(h.spent("2024-03-04", "news.example").await.0, 0);

    h.failing.store(false, Ordering::SeqCst);
    h.advance_and_flush(10).await;
    assert_eq!(h.spent("2024-03-04", "news.example").await, (970, 1));
}

#[tokio::test]
async fn test_tracking_state() {
    let h = start("2024-03-04 09:00:00");

    h.visit(3, "https://www.news.example/").await;
    h.advance_and_flush(25).await;

    let view = h.engine.tracking_state().await.unwrap();
    assert_eq!(view.domain.map(|d| d.to_string()), Some("news.example".to_string()));
    assert_eq!(view.tab_id, Some(3));
    assert_eq!(view.today_seconds, 25);
}

// ============================================================================
// Policy
// ============================================================================

#[tokio::test]
async fn test_timer_over_budget_compiles_rule() {
    let mut h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    h.advance_and_flush(90).await;
    h.visit(2, "https://docs.example/").await;
    h.advance_and_flush(5).await;

    h.engine
        .update_timer("news.example".to_string(), 60, true)
        .await
        .unwrap();

    let rules = h.engine.rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    let rule = h
        .engine
        .check_url("https://news.example/today".to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(rule.reason, RuleReason::TimerExceeded { time_spent: 90, .. }));
    assert!(h
        .engine
        .check_url("https://docs.example/".to_string())
        .await
        .unwrap()
        .is_none());

    // docs.example is in front, so nothing needs reloading.
    assert!(h.drain_reloads().is_empty());
}

#[tokio::test]
async fn test_reaching_limit_reloads_front_tab() {
    let mut h = start("2024-03-04 09:00:00");

    h.engine
        .update_timer("news.example".to_string(), 30, true)
        .await
        .unwrap();
    h.visit(7, "https://news.example/").await;
    h.advance_and_flush(20).await;
    assert!(h.drain_reloads().is_empty());

    h.advance_and_flush(10).await;
    assert_eq!(h.drain_reloads(), vec![7]);
}

#[tokio::test]
async fn test_block_substring_and_removal() {
    let h = start("2024-03-04 09:00:00");

    let block = h.engine.add_blocked_url("shop".to_string()).await.unwrap();
    let rule = h
        .engine
        .check_url("https://online-shop.test/cart".to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(rule.reason, RuleReason::Blocked { block_id, .. } if block_id == block.id));
    assert_eq!(rule.redirect_target, "webtime://blocked");

    assert!(h.engine.remove_blocked_url(block.id).await.unwrap());
    assert!(h.engine.rules().await.unwrap().is_empty());
    assert!(!h.engine.remove_blocked_url(block.id).await.unwrap());
}

#[tokio::test]
async fn test_invalid_policy_input_is_rejected() {
    let h = start("2024-03-04 09:00:00");

    let err = h
        .engine
        .update_timer("news.example".to_string(), 0, true)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    h.engine.add_blocked_url("shop".to_string()).await.unwrap();
    let err = h
        .engine
        .add_blocked_url("https://www.SHOP/".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Duplicate(_)));

    assert!(h.engine.all_timers().await.unwrap().is_empty());
    assert_eq!(h.engine.blocked_websites().await.unwrap().len(), 1);
}

// ============================================================================
// Reminders
// ============================================================================

#[tokio::test]
async fn test_thresholds_fire_once_each() {
    let mut h = start("2024-03-04 09:00:00");

    h.engine
        .update_settings(SettingsPatch {
            reminder_enabled: Some(true),
            reminder_thresholds: Some(vec![1800, 3600]),
            ..SettingsPatch::default()
        })
        .await
        .unwrap();

    h.visit(1, "https://news.example/").await;

    // 30 minutes in 10-minute steps (below the sleep gap).
    for _ in 0..3 {
        h.advance_and_flush(600).await;
    }
    h.alarm(Alarm::CheckReminders).await;
    assert_eq!(
        h.drain_notifications(),
        vec!["reminder:2024-03-04:news.example:1800".to_string()]
    );

    for _ in 0..2 {
        h.advance_and_flush(600).await;
        h.alarm(Alarm::CheckReminders).await;
    }
    assert!(h.drain_notifications().is_empty());

    h.advance_and_flush(600).await;
    h.alarm(Alarm::CheckReminders).await;
    h.alarm(Alarm::CheckReminders).await;
    assert_eq!(
        h.drain_notifications(),
        vec!["reminder:2024-03-04:news.example:3600".to_string()]
    );
}

#[tokio::test]
async fn test_thresholds_fire_again_after_day_change() {
    let mut h = start("2024-03-04 23:50:00");

    h.engine
        .update_settings(SettingsPatch {
            reminder_enabled: Some(true),
            reminder_thresholds: Some(vec![60]),
            ..SettingsPatch::default()
        })
        .await
        .unwrap();

    h.visit(1, "https://news.example/").await;
    h.advance_and_flush(120).await;
    h.alarm(Alarm::CheckReminders).await;
    assert_eq!(
        h.drain_notifications(),
        vec!["reminder:2024-03-04:news.example:60".to_string()]
    );

    // 23:52 -> midnight, then two minutes into the new day.
    h.advance_and_flush(480).await;
    h.advance_and_flush(120).await;
    h.alarm(Alarm::CheckReminders).await;
    assert_eq!(
        h.drain_notifications(),
        vec!["reminder:2024-03-05:news.example:60".to_string()]
    );
}

#[tokio::test]
async fn test_enabling_reminders_fires_reached_thresholds() {
    let mut h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    h.advance_and_flush(120).await;
    assert!(h.drain_notifications().is_empty());

    h.engine
        .update_settings(SettingsPatch {
            reminder_enabled: Some(true),
            reminder_thresholds: Some(vec![60, 600]),
            ..SettingsPatch::default()
        })
        .await
        .unwrap();
    assert_eq!(
        h.drain_notifications(),
        vec!["reminder:2024-03-04:news.example:60".to_string()]
    );
}

#[tokio::test]
async fn test_reminders_disabled_by_default() {
    let mut h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    for _ in 0..4 {
        h.advance_and_flush(600).await;
    }
    h.alarm(Alarm::CheckReminders).await;
    assert!(h.drain_notifications().is_empty());
}

// ============================================================================
// Export / Import
// ============================================================================

#[tokio::test]
async fn test_import_without_version_changes_nothing() {
    let h = start("2024-03-04 09:00:00");

    h.engine
        .update_timer("news.example".to_string(), 600, true)
        .await
        .unwrap();
    let before = h.engine.export_data().await.unwrap();

    let err = h
        .engine
        .import_data(json!({ "data": { "website_timers": [] } }))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidImport(_)));

    let after = h.engine.export_data().await.unwrap();
    assert_eq!(before.data, after.data);
    assert_eq!(h.engine.all_timers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_export_import_round_trip_replaces_state() {
    let h = start("2024-03-04 09:00:00");

    h.visit(1, "https://news.example/").await;
    h.advance_and_flush(45).await;
    h.engine.add_blocked_url("shop".to_string()).await.unwrap();
    let exported = serde_json::to_value(h.engine.export_data().await.unwrap()).unwrap();

    let other = start("2024-03-04 10:00:00");
    other.engine.import_data(exported).await.unwrap();

    assert_eq!(other.spent("2024-03-04", "news.example").await.0, 45);
    assert!(other
        .engine
        .check_url("https://shop.test/".to_string())
        .await
        .unwrap()
        .is_some());
    let daily = other.engine.today_stats().await.unwrap().daily;
    assert_eq!(daily.total_time, 45);
}

#[tokio::test]
async fn test_import_rejects_invalid_timer() {
    let h = start("2024-03-04 09:00:00");

    let document = json!({
        "version": 1,
        "data": {
            "website_timers": [{ "domain": "news.example", "time_limit": 0, "enabled": true }]
        }
    });
    let err = h.engine.import_data(document).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert!(h.engine.all_timers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_flushes_open_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("webtime.db");
    let clock = Arc::new(ManualClock::new(at("2024-03-04 09:00:00")));

    let store = SqliteStore::open(&path).unwrap();
    let engine = spawn_engine(Box::new(store), clock.clone(), &EngineConfig::default()).unwrap();
    engine
        .host_event(HostEvent::TabActivated {
            tab_id: 1,
            url: "https://news.example/".to_string(),
            favicon_url: None,
        })
        .await
        .unwrap();
    clock.advance_secs(7);

    engine.shutdown().await.unwrap();
    assert!(matches!(
        engine.website_list(clock.today()).await,
        Err(EngineError::ChannelClosed)
    ));

    let reopened = SqliteStore::open(&path).unwrap();
    let row = reopened
        .website_activity(clock.today(), &Domain::parse("news.example").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(row.time_spent, 7);
}
