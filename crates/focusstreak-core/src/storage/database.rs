//! SQLite-based streak storage.
//!
//! Provides persistent storage for:
//! - Per-user streak records
//! - Save-pass balances and subscription entitlement
//! - Completions waiting for a retry, one row per user and date
//! - Key-value store for application state (persisted timer)

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::data_dir;
use super::migrations;
use crate::billing::Plan;
use crate::error::{DatabaseError, StoreError};
use crate::identity::UserId;
use crate::store::{check_update, SavePassBalance, StreakRecord, StreakUpdate};
use crate::streak::PendingCompletion;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite database for streak storage.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `<data dir>/focusstreak.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("focusstreak.db"))
    }

    /// Open (or create) a database file at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(std::time::Duration::from_millis(250))?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn get_streak(&self, user_id: &UserId) -> Result<Option<StreakRecord>, DatabaseError> {
        Ok(query_streak(&self.conn, user_id)?)
    }

    pub fn get_save_pass_balance(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SavePassBalance>, DatabaseError> {
        Ok(query_balance(&self.conn, user_id)?)
    }

    /// Apply a reconciliation result in one IMMEDIATE transaction.
    ///
    /// The write lock is taken before the version check, so a concurrent
    /// writer in another process either commits first (and we see a
    /// conflict) or waits for us.
    pub fn apply_streak_update(&mut self, update: &StreakUpdate) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let user_id = update.user_id();

        let stored = query_streak(&tx, user_id)?;
        let balance = query_balance(&tx, user_id)?;
        let passes = check_update(update, stored.as_ref(), balance.as_ref())?;

        let now = Utc::now().to_rfc3339();
        let record = &update.record;
        tx.execute(
            "INSERT INTO streaks
                (user_id, current_streak, longest_streak, last_session_date, total_sessions, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                current_streak = excluded.current_streak,
                longest_streak = excluded.longest_streak,
                last_session_date = excluded.last_session_date,
                total_sessions = excluded.total_sessions,
                updated_at = excluded.updated_at",
            params![
                user_id.as_str(),
                record.current_streak,
                record.longest_streak,
                record.last_session_date.map(|d| d.format(DATE_FORMAT).to_string()),
                record.total_sessions as i64,
                now,
            ],
        )?;

        if let Some(passes) = passes {
            tx.execute(
                "UPDATE save_pass_balances
                 SET passes_remaining = ?2, updated_at = ?3
                 WHERE user_id = ?1",
                params![user_id.as_str(), passes, now],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Credit passes and mark the user entitled on `plan`.
    pub fn record_payment(
        &mut self,
        user_id: &UserId,
        plan: Plan,
        passes: u32,
    ) -> Result<SavePassBalance, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO save_pass_balances (user_id, passes_remaining, entitled, plan, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                passes_remaining = passes_remaining + excluded.passes_remaining,
                entitled = 1,
                plan = excluded.plan,
                updated_at = excluded.updated_at",
            params![user_id.as_str(), passes, plan.as_str(), Utc::now().to_rfc3339()],
        )?;
        let balance = query_balance(&tx, user_id)?
            .ok_or_else(|| StoreError::Fatal(format!("balance for {user_id} vanished")))?;
        tx.commit()?;
        Ok(balance)
    }

    pub fn revoke_entitlement(
        &mut self,
        user_id: &UserId,
    ) -> Result<Option<SavePassBalance>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE save_pass_balances SET entitled = 0, updated_at = ?2 WHERE user_id = ?1",
            params![user_id.as_str(), Utc::now().to_rfc3339()],
        )?;
        let balance = query_balance(&tx, user_id)?;
        tx.commit()?;
        Ok(balance)
    }

    /// Park a completion, or bump the attempt count of the row already
    /// parked for the same user and date. Other rows are never touched.
    pub fn enqueue_pending(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
        last_error: &str,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO pending_completions
                (user_id, completion_date, queued_at, last_error, attempts)
             VALUES (?1, ?2, ?3, ?4, 1)
             ON CONFLICT(user_id, completion_date) DO UPDATE SET
                last_error = excluded.last_error,
                attempts = attempts + 1",
            params![
                user_id.as_str(),
                completion_date.format(DATE_FORMAT).to_string(),
                Utc::now().to_rfc3339(),
                last_error,
            ],
        )?;
        Ok(())
    }

    /// Parked completions, oldest completion date first.
    ///
    /// A row that cannot be decoded is an error; it stays in the table.
    pub fn pending_completions(&self) -> Result<Vec<PendingCompletion>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, completion_date, queued_at, last_error, attempts
             FROM pending_completions
             ORDER BY completion_date, queued_at",
        )?;
        let rows = stmt.query_map([], |row| {
            let raw_user: String = row.get(0)?;
            let user_id = UserId::new(raw_user).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?;
            let completion_date = parse_date(row, 1)?.ok_or(rusqlite::Error::InvalidColumnType(
                1,
                "completion_date".into(),
                rusqlite::types::Type::Null,
            ))?;
            let raw_queued: String = row.get(2)?;
            let queued_at = DateTime::parse_from_rfc3339(&raw_queued)
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
                })?
                .with_timezone(&Utc);
            Ok(PendingCompletion {
                user_id,
                completion_date,
                queued_at,
                last_error: row.get(3)?,
                attempts: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record another failed replay of a parked completion. A row removed in
    /// the meantime is left removed.
    pub fn note_pending_failure(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
        last_error: &str,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE pending_completions
             SET last_error = ?3, attempts = attempts + 1
             WHERE user_id = ?1 AND completion_date = ?2",
            params![
                user_id.as_str(),
                completion_date.format(DATE_FORMAT).to_string(),
                last_error,
            ],
        )?;
        Ok(())
    }

    pub fn remove_pending(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "DELETE FROM pending_completions WHERE user_id = ?1 AND completion_date = ?2",
            params![user_id.as_str(), completion_date.format(DATE_FORMAT).to_string()],
        )?;
        Ok(())
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

fn query_streak(conn: &Connection, user_id: &UserId) -> rusqlite::Result<Option<StreakRecord>> {
    conn.query_row(
        "SELECT current_streak, longest_streak, last_session_date, total_sessions
         FROM streaks WHERE user_id = ?1",
        params![user_id.as_str()],
        |row| {
            Ok(StreakRecord {
                user_id: user_id.clone(),
                current_streak: row.get(0)?,
                longest_streak: row.get(1)?,
                last_session_date: parse_date(row, 2)?,
                total_sessions: row.get::<_, i64>(3)?.max(0) as u64,
            })
        },
    )
    .optional()
}

fn query_balance(
    conn: &Connection,
    user_id: &UserId,
) -> rusqlite::Result<Option<SavePassBalance>> {
    conn.query_row(
        "SELECT passes_remaining, entitled, plan FROM save_pass_balances WHERE user_id = ?1",
        params![user_id.as_str()],
        |row| {
            let plan: Option<String> = row.get(2)?;
            Ok(SavePassBalance {
                user_id: user_id.clone(),
                passes_remaining: row.get(0)?,
                entitled: row.get(1)?,
                plan: plan.as_deref().and_then(|p| p.parse().ok()),
            })
        },
    )
    .optional()
}

fn parse_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let Some(raw) = row.get::<_, Option<String>>(idx)? else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map(Some)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
