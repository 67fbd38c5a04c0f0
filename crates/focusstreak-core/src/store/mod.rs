//! Durable store collaborator.
//!
//! The streak service only talks to storage through [`StreakStore`]. The one
//! hard requirement on implementations is that [`StreakStore::apply_streak_update`]
//! is a single atomic read-modify-write: the compare-and-swap on
//! `expected_total_sessions`, the record write and the save-pass delta either
//! all happen or none do.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::billing::Plan;
use crate::error::StoreError;
use crate::identity::UserId;

/// Durable per-user streak state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub user_id: UserId,
    pub current_streak: u32,
    /// Always `>= current_streak`.
    pub longest_streak: u32,
    pub last_session_date: Option<NaiveDate>,
    /// Monotonically non-decreasing. Doubles as the record version for CAS.
    pub total_sessions: u64,
}

impl StreakRecord {
    /// State of a user who has never completed a work session.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            current_streak: 0,
            longest_streak: 0,
            last_session_date: None,
            total_sessions: 0,
        }
    }
}

/// Durable per-user save-pass credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePassBalance {
    pub user_id: UserId,
    pub passes_remaining: u32,
    #[serde(default)]
    pub entitled: bool,
    #[serde(default)]
    pub plan: Option<Plan>,
}

impl SavePassBalance {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            passes_remaining: 0,
            entitled: false,
            plan: None,
        }
    }
}

/// One atomic write produced by a reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakUpdate {
    /// `total_sessions` observed when the plan was computed (0 when no record
    /// existed). The write is rejected with [`StoreError::Conflict`] if the
    /// stored value differs.
    pub expected_total_sessions: u64,
    pub record: StreakRecord,
    /// 0 or -1. A negative delta against an empty balance is rejected with
    /// [`StoreError::InsufficientSavePasses`].
    pub save_pass_delta: i32,
}

impl StreakUpdate {
    pub fn user_id(&self) -> &UserId {
        &self.record.user_id
    }
}

#[async_trait]
pub trait StreakStore: Send + Sync {
    async fn get_streak(&self, user_id: &UserId) -> Result<Option<StreakRecord>, StoreError>;

    async fn get_save_pass_balance(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SavePassBalance>, StoreError>;

    /// Atomically check the expected version, write the record and apply the
    /// save-pass delta.
    async fn apply_streak_update(&self, update: &StreakUpdate) -> Result<(), StoreError>;

    /// Credit `passes` and mark the user entitled on `plan`. Creates the
    /// balance if missing.
    async fn record_payment(
        &self,
        user_id: &UserId,
        plan: Plan,
        passes: u32,
    ) -> Result<SavePassBalance, StoreError>;

    /// Clear entitlement. Remaining passes are kept. Returns `None` if the
    /// user never had a balance.
    async fn revoke_entitlement(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SavePassBalance>, StoreError>;
}

/// Check the CAS precondition and compute the new pass count. Shared by the
/// store implementations so they reject exactly the same updates.
pub(crate) fn check_update(
    update: &StreakUpdate,
    stored: Option<&StreakRecord>,
    balance: Option<&SavePassBalance>,
) -> Result<Option<u32>, StoreError> {
    let stored_total = stored.map_or(0, |r| r.total_sessions);
    if stored_total != update.expected_total_sessions {
        return Err(StoreError::Conflict {
            user_id: update.user_id().clone(),
        });
    }
    if update.save_pass_delta == 0 {
        return Ok(None);
    }
    let current = i64::from(balance.map_or(0, |b| b.passes_remaining));
    let next = current + i64::from(update.save_pass_delta);
    if next < 0 {
        return Err(StoreError::InsufficientSavePasses {
            user_id: update.user_id().clone(),
        });
    }
    u32::try_from(next)
        .map(Some)
        .map_err(|_| StoreError::Fatal(format!("save pass balance overflow: {next}")))
}
