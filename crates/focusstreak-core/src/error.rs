//! Core error types for focusstreak-core.
//!
//! The streak path has its own taxonomy: [`StoreError`] classifies what the
//! durable store reported, and [`ReconcileError`] is what callers of
//! [`crate::StreakService::reconcile`] see after the retry policy has run.

use std::path::PathBuf;
use thiserror::Error;

use crate::identity::UserId;

/// Core error type for focusstreak-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Streak reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Validation errors. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("User id must not be empty")]
    EmptyUserId,

    #[error("Invalid calendar date '{input}': expected YYYY-MM-DD")]
    InvalidDate { input: String },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors reported by a [`crate::store::StreakStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Recoverable condition (lock contention, timeout, I/O hiccup).
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// Compare-and-swap failed: the stored record moved since it was read.
    #[error("Concurrent update detected for user {user_id}")]
    Conflict { user_id: UserId },

    /// A save pass was planned but the balance was empty at apply time.
    #[error("No save passes remaining for user {user_id}")]
    InsufficientSavePasses { user_id: UserId },

    /// Non-recoverable store failure.
    #[error("Store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    /// Whether the retry policy should try the persistence step again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Conflict { .. })
    }
}

/// Failure of a whole reconciliation call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Every attempt allowed by the retry policy failed.
    #[error("Gave up after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// The overall timeout budget elapsed before an attempt succeeded.
    #[error("Reconciliation timed out after {budget_ms} ms")]
    TimedOut { budget_ms: u64 },

    /// The store reported a failure that retrying cannot fix.
    #[error(transparent)]
    Store(StoreError),
}

impl ReconcileError {
    /// Whether the completion should be queued and retried later.
    ///
    /// Validation failures will never succeed, so they are not queued.
    pub fn is_deferrable(&self) -> bool {
        !matches!(self, ReconcileError::Validation(_))
    }
}

/// Billing collaborator failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("Gave up applying billing event after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg)
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                DatabaseError::Locked
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Locked => StoreError::Transient("database is locked".into()),
            other => StoreError::Fatal(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        DatabaseError::from(err).into()
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Fatal(format!("store task failed: {err}"))
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
