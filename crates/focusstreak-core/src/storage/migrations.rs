//! Database schema migrations for focusstreak.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: streak records, save-pass balances and the kv table.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS streaks (
            user_id           TEXT PRIMARY KEY,
            current_streak    INTEGER NOT NULL DEFAULT 0,
            longest_streak    INTEGER NOT NULL DEFAULT 0,
            last_session_date TEXT,
            total_sessions    INTEGER NOT NULL DEFAULT 0,
            updated_at        TEXT NOT NULL,
            CHECK (longest_streak >= current_streak)
        );

        CREATE TABLE IF NOT EXISTS save_pass_balances (
            user_id          TEXT PRIMARY KEY,
            passes_remaining INTEGER NOT NULL DEFAULT 0 CHECK (passes_remaining >= 0),
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: subscription entitlement written by the billing collaborator.
///
/// Adds:
/// - entitled: 1 while the subscription is active
/// - plan: monthly | yearly (last plan paid for)
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE save_pass_balances ADD COLUMN entitled INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE save_pass_balances ADD COLUMN plan TEXT;",
    )?;

    // Balances created before entitlement tracking came from paid plans.
    tx.execute(
        "UPDATE save_pass_balances SET entitled = 1 WHERE passes_remaining > 0",
        [],
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: deferred completions get one row each.
///
/// Earlier versions kept the whole queue as one JSON document under the
/// `pending_completions` kv key. Its entries are moved into the table; a
/// document that does not parse aborts the migration instead of being dropped.
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS pending_completions (
            user_id         TEXT NOT NULL,
            completion_date TEXT NOT NULL,
            queued_at       TEXT NOT NULL,
            last_error      TEXT NOT NULL,
            attempts        INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (user_id, completion_date)
        );

        INSERT OR IGNORE INTO pending_completions
            (user_id, completion_date, queued_at, last_error, attempts)
        SELECT json_extract(e.value, '$.user_id'),
               json_extract(e.value, '$.completion_date'),
               json_extract(e.value, '$.queued_at'),
               json_extract(e.value, '$.last_error'),
               COALESCE(json_extract(e.value, '$.attempts'), 1)
        FROM kv, json_each(kv.value, '$.entries') AS e
        WHERE kv.key = 'pending_completions';

        DELETE FROM kv WHERE key = 'pending_completions';",
    )?;

    set_schema_version(&tx, 3)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_migrate_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
        let cols = columns(&conn, "save_pass_balances");
        assert!(cols.contains(&"entitled".to_string()));
        assert!(cols.contains(&"plan".to_string()));
        assert!(columns(&conn, "streaks").contains(&"total_sessions".to_string()));
        assert!(columns(&conn, "pending_completions").contains(&"attempts".to_string()));
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_incremental_migration() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        conn.execute(
            "INSERT INTO save_pass_balances (user_id, passes_remaining, updated_at)
             VALUES ('paid', 2, ''), ('free', 0, '')",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();

        let entitled = |user: &str| -> bool {
            conn.query_row(
                "SELECT entitled FROM save_pass_balances WHERE user_id = ?1",
                [user],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert!(entitled("paid"));
        assert!(!entitled("free"));
    }

    #[test]
    fn test_v3_moves_queued_completions_into_rows() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        migrate_v2(&conn).unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES ('pending_completions', ?1)",
            [r#"{"entries":[
                {"user_id":"u1","completion_date":"2024-01-02","queued_at":"2024-01-02T10:00:00Z","last_error":"locked","attempts":2},
                {"user_id":"u1","completion_date":"2024-01-03","queued_at":"2024-01-03T10:00:00Z","last_error":"locked"}
            ]}"#],
        )
        .unwrap();

        migrate(&conn).unwrap();

        let attempts: Vec<i64> = conn
            .prepare("SELECT attempts FROM pending_completions ORDER BY completion_date")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(attempts, vec![2, 1]);
        let leftover: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv WHERE key = 'pending_completions'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_v3_refuses_unreadable_queue() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        migrate_v2(&conn).unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES ('pending_completions', 'not json')",
            [],
        )
        .unwrap();

        assert!(migrate(&conn).is_err());
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        let kept: String = conn
            .query_row("SELECT value FROM kv WHERE key = 'pending_completions'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, "not json");
    }
}
