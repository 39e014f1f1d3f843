//! Tracking and policy engine using the actor pattern.
//!
//! ```text
//! host events ─┐
//! control ─────┼──▶ mpsc ──▶ EngineActor ──▶ Store (SQLite)
//! alarms ──────┘                 │
//!                                └──▶ HostActions ──▶ broadcast<HostDirective>
//! ```
//!
//! The actor is the only owner of the session, the policy cache and the
//! reminder state, so every event is applied against a consistent view.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use webtime_core::Clock;

mod actor;
mod commands;
mod focus;
mod handle;
mod policy;
mod tracker;

pub use actor::EngineActor;
pub use commands::{Alarm, EngineCommand, EngineError, Reply, TodayStats};
pub use focus::{FocusAction, FocusCoordinator, HostEvent};
pub use handle::EngineHandle;
pub use policy::PolicyCache;
pub use tracker::{FlushReport, SessionTracker};

use crate::host::{BroadcastHost, HostPresence};
use crate::store::{Store, StoreResult};

const COMMAND_BUFFER: usize = 256;
const DIRECTIVE_BUFFER: usize = 64;

/// Defaults for the sleep-gap heuristic and the redirect target.
pub const DEFAULT_SLEEP_GAP_SECS: u64 = 900;
pub const DEFAULT_BLOCK_PAGE_URL: &str = "webtime://blocked";

/// Engine parameters that do not change while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Elapsed time above this is treated as sleep and not credited.
    pub sleep_gap_secs: u64,
    pub block_page_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sleep_gap_secs: DEFAULT_SLEEP_GAP_SECS,
            block_page_url: DEFAULT_BLOCK_PAGE_URL.to_string(),
        }
    }
}

/// Periods of the four alarms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmSchedule {
    pub flush: Duration,
    pub rules: Duration,
    pub reminders: Duration,
    pub day_check: Duration,
}

impl Default for AlarmSchedule {
    fn default() -> Self {
        Self {
            flush: Duration::from_secs(10),
            rules: Duration::from_secs(60),
            reminders: Duration::from_secs(30),
            day_check: Duration::from_secs(30),
        }
    }
}

/// Spawns the engine actor and returns a handle to it.
///
/// Caches are loaded from `store` before the actor starts, so a storage
/// failure here is reported to the caller instead of inside the task.
/// Alarms are not started; see [`spawn_alarms`].
pub fn spawn_engine(
    store: Box<dyn Store>,
    clock: Arc<dyn Clock>,
    config: &EngineConfig,
) -> StoreResult<EngineHandle> {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (directive_tx, _) = broadcast::channel(DIRECTIVE_BUFFER);

    let presence = HostPresence::new();

    let host = BroadcastHost::new(directive_tx.clone(), presence.clone());
    let actor = EngineActor::new(cmd_rx, store, Box::new(host), clock, config)?;
    tokio::spawn(actor.run());

    Ok(EngineHandle::new(cmd_tx, directive_tx, presence))
}

/// Spawns one periodic task per alarm. Tasks stop when `cancel` fires or
/// the engine stops accepting commands.
pub fn spawn_alarms(handle: &EngineHandle, schedule: AlarmSchedule, cancel: CancellationToken) {
    for (alarm, period) in [
        (Alarm::Flush, schedule.flush),
        (Alarm::CompileRules, schedule.rules),
        (Alarm::CheckReminders, schedule.reminders),
        (Alarm::DayCheck, schedule.day_check),
    ] {
        let handle = handle.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if handle.alarm(alarm).await.is_err() {
                            debug!(alarm = ?alarm, "Alarm task stopping: engine channel closed");
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::NaiveDate;
    use webtime_core::ManualClock;

    fn clock() -> Arc<ManualClock> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Arc::new(ManualClock::new(start))
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let store = SqliteStore::open_in_memory().unwrap();
        let handle = spawn_engine(Box::new(store), clock(), &EngineConfig::default()).unwrap();

        assert!(handle.rules().await.unwrap().is_empty());
        handle.shutdown().await.unwrap();

        // The actor has exited; further requests fail.
        assert!(matches!(
            handle.settings().await,
            Err(EngineError::ChannelClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarms_drive_flush() {
        let store = SqliteStore::open_in_memory().unwrap();
        let clock = clock();
        let handle = spawn_engine(Box::new(store), clock.clone(), &EngineConfig::default()).unwrap();

        handle
            .host_event(HostEvent::TabActivated {
                tab_id: 1,
                url: "https://news.example/".to_string(),
                favicon_url: None,
            })
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        spawn_alarms(&handle, AlarmSchedule::default(), cancel.clone());

        clock.advance_secs(10);
        tokio::time::sleep(Duration::from_secs(11)).await;

        let list = handle.website_list(clock.today()).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].time_spent, 10);

        cancel.cancel();
        handle.shutdown().await.unwrap();
    }
}
