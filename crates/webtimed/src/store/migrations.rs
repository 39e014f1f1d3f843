//! Schema versioning.
//!
//! Applied migrations are recorded in a `migrations` table; on open every
//! migration with a higher version than the recorded maximum runs in its own
//! transaction.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::StoreResult;

const MIGRATIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

const SELECT_VERSION: &str = "SELECT MAX(version) FROM migrations";
const INSERT_VERSION: &str = "INSERT INTO migrations (version, name) VALUES (?1, ?2)";

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_activity_tables",
        sql: "
CREATE TABLE IF NOT EXISTS daily_activity (
    date DATE NOT NULL PRIMARY KEY,
    total_time INTEGER NOT NULL DEFAULT 0 CHECK (total_time >= 0),
    website_count INTEGER NOT NULL DEFAULT 0 CHECK (website_count >= 0)
);
CREATE TABLE IF NOT EXISTS website_activity (
    date DATE NOT NULL,
    domain TEXT NOT NULL,
    favicon_url TEXT,
    time_spent INTEGER NOT NULL DEFAULT 0 CHECK (time_spent >= 0),
    visit_count INTEGER NOT NULL DEFAULT 0 CHECK (visit_count >= 0),
    last_visit TIMESTAMP NOT NULL,
    PRIMARY KEY (date, domain)
);
CREATE INDEX IF NOT EXISTS idx_website_activity_domain ON website_activity(domain);",
    },
    Migration {
        version: 2,
        name: "create_policy_tables",
        sql: "
CREATE TABLE IF NOT EXISTS website_timers (
    domain TEXT NOT NULL PRIMARY KEY,
    time_limit INTEGER NOT NULL CHECK (time_limit > 0),
    enabled BOOLEAN NOT NULL DEFAULT TRUE
);
CREATE TABLE IF NOT EXISTS blocked_websites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_pattern TEXT NOT NULL UNIQUE,
    date_added TIMESTAMP NOT NULL
);",
    },
    Migration {
        version: 3,
        name: "create_settings",
        sql: "
CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    data TEXT NOT NULL
);",
    },
];

/// Latest schema version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Version recorded in the database, 0 for a fresh file.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: Option<u32> = conn
        .query_row(SELECT_VERSION, [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Brings the schema up to [`latest_version`].
pub fn run(conn: &mut Connection) -> StoreResult<()> {
    conn.execute(MIGRATIONS_TABLE, [])?;
    let current = current_version(conn)?;

    let pending = MIGRATIONS.iter().filter(|m| m.version > current);
    for migration in pending {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(INSERT_VERSION, params![migration.version, migration.name])?;
        tx.commit()?;
        info!(
            version = migration.version,
            name = migration.name,
            "Applied database migration"
        );
    }

    debug!(version = latest_version(), "Database schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), latest_version());

        run(&mut conn).unwrap();
        let applied: u32 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
    }

    #[test]
    fn test_fresh_database_is_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(MIGRATIONS_TABLE, []).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }
}
