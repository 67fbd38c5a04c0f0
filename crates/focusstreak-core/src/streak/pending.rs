//! Completions whose reconciliation failed, kept for a later retry.
//!
//! A failed reconciliation never drops the session: the caller parks it here
//! and [`PendingQueue::flush`] replays it once the store is healthy again.
//! Replays are safe because reconciling an already-recorded date is a no-op.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::plan::StreakResult;
use super::service::StreakService;
use crate::error::{DatabaseError, ReconcileError};
use crate::identity::UserId;
use crate::storage::Database;
use crate::store::StreakStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCompletion {
    pub user_id: UserId,
    pub completion_date: NaiveDate,
    pub queued_at: DateTime<Utc>,
    pub last_error: String,
    pub attempts: u32,
}

/// Outcome of one flush.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub reconciled: Vec<(PendingCompletion, StreakResult)>,
    /// Entries that cannot ever succeed and were dropped.
    pub discarded: Vec<(PendingCompletion, ReconcileError)>,
    pub remaining: usize,
}

/// Handle on the `pending_completions` table.
///
/// Every operation touches only the rows it names, so a completion parked by
/// another process while a flush is running survives the flush.
#[derive(Clone)]
pub struct PendingQueue {
    db: Arc<Mutex<Database>>,
}

impl PendingQueue {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    fn with_db<T>(
        &self,
        op: impl FnOnce(&Database) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let guard = self
            .db
            .lock()
            .map_err(|_| DatabaseError::QueryFailed("database handle poisoned".into()))?;
        op(&guard)
    }

    /// Park a completion. An entry for the same user and date is updated
    /// in place rather than duplicated.
    pub fn enqueue(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
        error: &ReconcileError,
    ) -> Result<(), DatabaseError> {
        let last_error = error.to_string();
        self.with_db(|db| db.enqueue_pending(user_id, completion_date, &last_error))
    }

    pub fn entries(&self) -> Result<Vec<PendingCompletion>, DatabaseError> {
        self.with_db(Database::pending_completions)
    }

    pub fn len(&self) -> Result<usize, DatabaseError> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DatabaseError> {
        Ok(self.len()? == 0)
    }

    /// Replay queued completions oldest date first. Successes and
    /// non-deferrable failures leave the queue; everything else stays.
    ///
    /// Works from a snapshot of the table and deletes rows one at a time, so
    /// completions parked after the snapshot wait for the next flush.
    pub async fn flush<S: StreakStore>(
        &self,
        service: &StreakService<S>,
    ) -> Result<FlushReport, DatabaseError> {
        let snapshot = self.entries()?;

        let mut report = FlushReport::default();
        for entry in snapshot {
            match service.reconcile(&entry.user_id, entry.completion_date).await {
                Ok(result) => {
                    self.with_db(|db| db.remove_pending(&entry.user_id, entry.completion_date))?;
                    info!(user = %entry.user_id, date = %entry.completion_date, "pending completion reconciled");
                    report.reconciled.push((entry, result));
                }
                Err(err) if err.is_deferrable() => {
                    let last_error = err.to_string();
                    self.with_db(|db| {
                        db.note_pending_failure(&entry.user_id, entry.completion_date, &last_error)
                    })?;
                }
                Err(err) => {
                    self.with_db(|db| db.remove_pending(&entry.user_id, entry.completion_date))?;
                    warn!(user = %entry.user_id, date = %entry.completion_date, "dropping pending completion: {err}");
                    report.discarded.push((entry, err));
                }
            }
        }
        report.remaining = self.len()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;

    fn user() -> UserId {
        UserId::new("queued").unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn exhausted() -> ReconcileError {
        ReconcileError::TimedOut { budget_ms: 5 }
    }

    fn queue() -> PendingQueue {
        PendingQueue::new(Arc::new(Mutex::new(Database::open_memory().unwrap())))
    }

    #[test]
    fn enqueue_deduplicates() {
        let queue = queue();
        assert!(queue.is_empty().unwrap());
        queue.enqueue(&user(), date(1), &exhausted()).unwrap();
        queue.enqueue(&user(), date(1), &exhausted()).unwrap();
        queue.enqueue(&user(), date(2), &exhausted()).unwrap();

        let entries = queue.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempts, 2);
        assert_eq!(entries[0].last_error, exhausted().to_string());
    }

    #[tokio::test]
    async fn flush_replays_in_date_order() {
        let store = Arc::new(MemoryStore::new());
        let service = StreakService::new(store).with_retry_policy(RetryPolicy::immediate(1));

        let queue = queue();
        queue.enqueue(&user(), date(2), &exhausted()).unwrap();
        queue.enqueue(&user(), date(1), &exhausted()).unwrap();

        let report = queue.flush(&service).await.unwrap();
        assert!(queue.is_empty().unwrap());
        assert_eq!(report.remaining, 0);
        let streaks: Vec<u32> = report
            .reconciled
            .iter()
            .map(|(_, r)| r.current_streak)
            .collect();
        assert_eq!(streaks, vec![1, 2]);
    }

    #[tokio::test]
    async fn flush_drops_completions_that_can_never_succeed() {
        let store = Arc::new(MemoryStore::new());
        let service = StreakService::new(store).with_retry_policy(RetryPolicy::immediate(1));

        let queue = queue();
        let far_future = Utc::now().date_naive() + chrono::Duration::days(30);
        queue.enqueue(&user(), far_future, &exhausted()).unwrap();

        let report = queue.flush(&service).await.unwrap();
        assert_eq!(report.discarded.len(), 1);
        assert!(queue.is_empty().unwrap());
    }
}
