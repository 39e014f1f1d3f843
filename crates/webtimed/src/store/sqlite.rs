//! SQLite-backed [`Store`].

use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use webtime_core::{
    ActivityDelta, BlockedWebsite, DailyActivity, Domain, Settings, WebsiteActivity, WebsiteTimer,
};
use webtime_protocol::SnapshotData;

use super::{migrations, Store, StoreError, StoreResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_WEBSITE: &str = "SELECT date, domain, favicon_url, time_spent, visit_count, last_visit
    FROM website_activity WHERE date = ?1 AND domain = ?2";
const SELECT_WEBSITES_FOR_DATE: &str = "SELECT date, domain, favicon_url, time_spent, visit_count, last_visit
    FROM website_activity WHERE date = ?1 ORDER BY time_spent DESC, domain ASC";
const SELECT_ALL_WEBSITES: &str = "SELECT date, domain, favicon_url, time_spent, visit_count, last_visit
    FROM website_activity ORDER BY date, domain";
const UPSERT_WEBSITE: &str = "INSERT INTO website_activity
    (date, domain, favicon_url, time_spent, visit_count, last_visit)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(date, domain) DO UPDATE SET
        favicon_url = excluded.favicon_url,
        time_spent = excluded.time_spent,
        visit_count = excluded.visit_count,
        last_visit = excluded.last_visit";

const SELECT_DAILY: &str = "SELECT date, total_time, website_count FROM daily_activity WHERE date = ?1";
const SELECT_DAILY_RANGE: &str = "SELECT date, total_time, website_count FROM daily_activity
    WHERE date BETWEEN ?1 AND ?2 ORDER BY date";
const SELECT_ALL_DAILY: &str = "SELECT date, total_time, website_count FROM daily_activity ORDER BY date";
const UPSERT_DAILY: &str = "INSERT INTO daily_activity (date, total_time, website_count)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(date) DO UPDATE SET
        total_time = excluded.total_time,
        website_count = excluded.website_count";
const REBUILD_DAILY: &str = "INSERT INTO daily_activity (date, total_time, website_count)
    SELECT date, SUM(time_spent), COUNT(*) FROM website_activity WHERE true GROUP BY date
    ON CONFLICT(date) DO UPDATE SET
        total_time = excluded.total_time,
        website_count = excluded.website_count";

const SELECT_TIMERS: &str = "SELECT domain, time_limit, enabled FROM website_timers ORDER BY domain";
const UPSERT_TIMER: &str = "INSERT INTO website_timers (domain, time_limit, enabled)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(domain) DO UPDATE SET
        time_limit = excluded.time_limit,
        enabled = excluded.enabled";
const DELETE_TIMER: &str = "DELETE FROM website_timers WHERE domain = ?1";

const SELECT_BLOCKED: &str = "SELECT id, url_pattern, date_added FROM blocked_websites ORDER BY id";
const SELECT_BLOCKED_BY_PATTERN: &str = "SELECT id FROM blocked_websites WHERE url_pattern = ?1";
const INSERT_BLOCKED: &str = "INSERT INTO blocked_websites (url_pattern, date_added) VALUES (?1, ?2)";
const INSERT_BLOCKED_WITH_ID: &str =
    "INSERT INTO blocked_websites (id, url_pattern, date_added) VALUES (?1, ?2, ?3)";
const DELETE_BLOCKED: &str = "DELETE FROM blocked_websites WHERE id = ?1";

const SELECT_SETTINGS: &str = "SELECT data FROM settings WHERE id = 1";
const UPSERT_SETTINGS: &str = "INSERT INTO settings (id, data) VALUES (1, ?1)
    ON CONFLICT(id) DO UPDATE SET data = excluded.data";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and migrates it.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Opened activity database");
        Ok(store)
    }

    /// Private database that disappears with the store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run(&mut conn)?;
        Ok(Self { conn })
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

fn conversion_error<E>(idx: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn domain_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Domain> {
    let raw: String = row.get(idx)?;
    Domain::parse(&raw).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn seconds_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| conversion_error(idx, Type::Integer, e))
}

fn to_sql_seconds(field: &'static str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange { field, value })
}

fn website_from_row(row: &Row<'_>) -> rusqlite::Result<WebsiteActivity> {
    Ok(WebsiteActivity {
        date: row.get(0)?,
        domain: domain_column(row, 1)?,
        favicon_url: row.get(2)?,
        time_spent: seconds_column(row, 3)?,
        visit_count: row.get(4)?,
        last_visit: row.get(5)?,
    })
}

fn daily_from_row(row: &Row<'_>) -> rusqlite::Result<DailyActivity> {
    Ok(DailyActivity {
        date: row.get(0)?,
        total_time: seconds_column(row, 1)?,
        website_count: row.get(2)?,
    })
}

fn timer_from_row(row: &Row<'_>) -> rusqlite::Result<WebsiteTimer> {
    Ok(WebsiteTimer {
        domain: domain_column(row, 0)?,
        time_limit: seconds_column(row, 1)?,
        enabled: row.get(2)?,
    })
}

fn blocked_from_row(row: &Row<'_>) -> rusqlite::Result<BlockedWebsite> {
    Ok(BlockedWebsite {
        id: row.get(0)?,
        url_pattern: row.get(1)?,
        date_added: row.get(2)?,
    })
}

fn query_website(
    conn: &Connection,
    date: NaiveDate,
    domain: &Domain,
) -> StoreResult<Option<WebsiteActivity>> {
    let row = conn
        .query_row(SELECT_WEBSITE, params![date, domain.as_str()], website_from_row)
        .optional()?;
    Ok(row)
}

fn query_websites_for(conn: &Connection, date: NaiveDate) -> StoreResult<Vec<WebsiteActivity>> {
    let mut stmt = conn.prepare(SELECT_WEBSITES_FOR_DATE)?;
    let rows = stmt
        .query_map(params![date], website_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn write_website(conn: &Connection, row: &WebsiteActivity) -> StoreResult<()> {
    conn.execute(
        UPSERT_WEBSITE,
        params![
            row.date,
            row.domain.as_str(),
            row.favicon_url,
            to_sql_seconds("time_spent", row.time_spent)?,
            row.visit_count,
            row.last_visit,
        ],
    )?;
    Ok(())
}

fn write_daily(conn: &Connection, daily: &DailyActivity) -> StoreResult<()> {
    conn.execute(
        UPSERT_DAILY,
        params![
            daily.date,
            to_sql_seconds("total_time", daily.total_time)?,
            daily.website_count,
        ],
    )?;
    Ok(())
}

fn write_timer(conn: &Connection, timer: &WebsiteTimer) -> StoreResult<()> {
    conn.execute(
        UPSERT_TIMER,
        params![
            timer.domain.as_str(),
            to_sql_seconds("time_limit", timer.time_limit)?,
            timer.enabled,
        ],
    )?;
    Ok(())
}

fn write_settings(conn: &Connection, settings: &Settings) -> StoreResult<()> {
    let data = serde_json::to_string(settings)?;
    conn.execute(UPSERT_SETTINGS, params![data])?;
    Ok(())
}

// ============================================================================
// Store Implementation
// ============================================================================

impl Store for SqliteStore {
    fn website_activity(
        &self,
        date: NaiveDate,
        domain: &Domain,
    ) -> StoreResult<Option<WebsiteActivity>> {
        query_website(&self.conn, date, domain)
    }

    fn website_activities_for(&self, date: NaiveDate) -> StoreResult<Vec<WebsiteActivity>> {
        query_websites_for(&self.conn, date)
    }

    fn record_activity(
        &mut self,
        delta: &ActivityDelta,
    ) -> StoreResult<(WebsiteActivity, DailyActivity)> {
        let tx = self.conn.transaction()?;

        let existing = query_website(&tx, delta.date, &delta.domain)?;
        let row = WebsiteActivity::absorb(existing, delta);
        write_website(&tx, &row)?;

        let day_rows = query_websites_for(&tx, delta.date)?;
        let daily = DailyActivity::summarize(delta.date, &day_rows);
        write_daily(&tx, &daily)?;

        tx.commit()?;

        debug!(
            date = %delta.date,
            domain = %delta.domain,
            seconds = delta.seconds,
            total = row.time_spent,
            "Recorded activity"
        );
        Ok((row, daily))
    }

    fn daily_activity(&self, date: NaiveDate) -> StoreResult<Option<DailyActivity>> {
        let row = self
            .conn
            .query_row(SELECT_DAILY, params![date], daily_from_row)
            .optional()?;
        Ok(row)
    }

    fn daily_activities_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DailyActivity>> {
        let mut stmt = self.conn.prepare(SELECT_DAILY_RANGE)?;
        let rows = stmt
            .query_map(params![start, end], daily_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn timers(&self) -> StoreResult<Vec<WebsiteTimer>> {
        let mut stmt = self.conn.prepare(SELECT_TIMERS)?;
        let rows = stmt
            .query_map([], timer_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn upsert_timer(&mut self, timer: &WebsiteTimer) -> StoreResult<()> {
        write_timer(&self.conn, timer)
    }

    fn delete_timer(&mut self, domain: &Domain) -> StoreResult<bool> {
        let removed = self.conn.execute(DELETE_TIMER, params![domain.as_str()])?;
        Ok(removed > 0)
    }

    fn blocked_websites(&self) -> StoreResult<Vec<BlockedWebsite>> {
        let mut stmt = self.conn.prepare(SELECT_BLOCKED)?;
        let rows = stmt
            .query_map([], blocked_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert_blocked_website(
        &mut self,
        url_pattern: &str,
        date_added: NaiveDateTime,
    ) -> StoreResult<BlockedWebsite> {
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(SELECT_BLOCKED_BY_PATTERN, params![url_pattern], |row| row.get(0))
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::DuplicatePattern(url_pattern.to_string()));
        }

        tx.execute(INSERT_BLOCKED, params![url_pattern, date_added])?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(BlockedWebsite {
            id,
            url_pattern: url_pattern.to_string(),
            date_added,
        })
    }

    fn delete_blocked_website(&mut self, id: i64) -> StoreResult<bool> {
        let removed = self.conn.execute(DELETE_BLOCKED, params![id])?;
        Ok(removed > 0)
    }

    fn settings(&self) -> StoreResult<Settings> {
        let data: Option<String> = self
            .conn
            .query_row(SELECT_SETTINGS, [], |row| row.get(0))
            .optional()?;
        match data {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Settings::default()),
        }
    }

    fn put_settings(&mut self, settings: &Settings) -> StoreResult<()> {
        write_settings(&self.conn, settings)
    }

    fn export_data(&self) -> StoreResult<SnapshotData> {
        let daily_activity = {
            let mut stmt = self.conn.prepare(SELECT_ALL_DAILY)?;
            let rows = stmt
                .query_map([], daily_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let website_activity = {
            let mut stmt = self.conn.prepare(SELECT_ALL_WEBSITES)?;
            let rows = stmt
                .query_map([], website_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        Ok(SnapshotData {
            daily_activity: Some(daily_activity),
            website_activity: Some(website_activity),
            website_timers: Some(self.timers()?),
            blocked_websites: Some(self.blocked_websites()?),
            settings: Some(self.settings()?),
        })
    }

    fn import_data(&mut self, data: &SnapshotData) -> StoreResult<()> {
        let tx = self.conn.transaction()?;

        if let Some(rows) = &data.website_activity {
            tx.execute("DELETE FROM website_activity", [])?;
            for row in rows {
                write_website(&tx, row)?;
            }
        }

        // Daily rows are derived from the site rows; imported ones are ignored.
        if data.daily_activity.is_some() || data.website_activity.is_some() {
            tx.execute("DELETE FROM daily_activity", [])?;
            tx.execute(REBUILD_DAILY, [])?;
        }

        if let Some(timers) = &data.website_timers {
            tx.execute("DELETE FROM website_timers", [])?;
            for timer in timers {
                write_timer(&tx, timer)?;
            }
        }

        if let Some(blocked) = &data.blocked_websites {
            tx.execute("DELETE FROM blocked_websites", [])?;
            for block in blocked {
                tx.execute(
                    INSERT_BLOCKED_WITH_ID,
                    params![block.id, block.url_pattern, block.date_added],
                )?;
            }
        }

        if let Some(settings) = &data.settings {
            write_settings(&tx, settings)?;
        }

        tx.commit()?;
        info!("Imported snapshot data");
        Ok(())
    }
}
