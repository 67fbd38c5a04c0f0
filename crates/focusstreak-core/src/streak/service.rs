//! Streak reconciliation service.
//!
//! ```text
//! Idle -> GapEvaluated -> {Contiguous | SavePassAttempted{Consumed|Denied} | Reset}
//!      -> Persisted | Failed
//! ```
//!
//! Calls for the same user are serialized behind a per-user async mutex; the
//! store's compare-and-swap covers writers in other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::plan::{plan_reconciliation, ReconcileOutcome, StreakPlan, StreakResult};
use crate::error::{ReconcileError, StoreError, ValidationError};
use crate::identity::UserId;
use crate::metrics::{FailureReason, Metric, MetricsSink, NoopMetrics};
use crate::retry::RetryPolicy;
use crate::store::{StreakRecord, StreakStore};

/// Default budget covering every attempt of one call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct StreakService<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    timeout: Duration,
    metrics: Arc<dyn MetricsSink>,
    user_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: StreakStore> StreakService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            metrics: Arc::new(NoopMetrics),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current streak state without modifying anything.
    pub async fn current(&self, user_id: &UserId) -> Result<StreakRecord, StoreError> {
        Ok(self
            .store
            .get_streak(user_id)
            .await?
            .unwrap_or_else(|| StreakRecord::empty(user_id.clone())))
    }

    /// Record a completed work session on `completion_date`.
    ///
    /// Calling this twice with the same date is a no-op the second time.
    ///
    /// # Errors
    /// - [`ReconcileError::Validation`] for dates after tomorrow (UTC).
    /// - [`ReconcileError::ExhaustedRetries`] / [`ReconcileError::TimedOut`]
    ///   when persistence keeps failing; nothing was written in that case.
    /// - [`ReconcileError::Store`] for non-recoverable store failures.
    pub async fn reconcile(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
    ) -> Result<StreakResult, ReconcileError> {
        if let Err(e) = validate_date(completion_date) {
            self.metrics.record(Metric::ReconcileFailed {
                reason: FailureReason::Validation,
            });
            return Err(e.into());
        }

        let deadline = Instant::now() + self.timeout;
        let outcome = self.reconcile_before(user_id, completion_date, deadline).await;

        match outcome {
            Ok((plan, attempts)) => {
                debug!(
                    user = %user_id,
                    date = %completion_date,
                    outcome = ?plan.outcome,
                    attempts,
                    "streak reconciled"
                );
                self.metrics.record(Metric::ReconcileSucceeded {
                    outcome: plan.outcome,
                    attempts,
                });
                Ok(plan.result)
            }
            Err(err) => {
                error!(user = %user_id, date = %completion_date, "streak reconciliation failed: {err}");
                let reason = match err {
                    ReconcileError::ExhaustedRetries { .. } => FailureReason::ExhaustedRetries,
                    ReconcileError::Validation(_) => FailureReason::Validation,
                    ReconcileError::TimedOut { .. } => FailureReason::TimedOut,
                    ReconcileError::Store(_) => FailureReason::Store,
                };
                self.metrics.record(Metric::ReconcileFailed { reason });
                Err(err)
            }
        }
    }

    /// Wait for the user's lock, then run the retry loop. The lease is
    /// released on every exit path, including cancellation.
    async fn reconcile_before(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
        deadline: Instant,
    ) -> Result<(StreakPlan, u32), ReconcileError> {
        let lease = self.user_lock(user_id);
        let _guard = tokio::time::timeout_at(deadline, lease.lock.lock())
            .await
            .map_err(|_| self.timed_out())?;
        self.reconcile_serialized(user_id, completion_date, deadline)
            .await
    }

    fn timed_out(&self) -> ReconcileError {
        ReconcileError::TimedOut {
            budget_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn user_lock(&self, user_id: &UserId) -> UserLease<'_> {
        let mut locks = self
            .user_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks.entry(user_id.clone()).or_default().clone();
        UserLease {
            locks: &self.user_locks,
            user_id: user_id.clone(),
            lock,
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.user_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Retry loop. The plan is computed once per snapshot of the store;
    /// transient write failures retry the same plan, a conflict discards it.
    ///
    /// The deadline bounds lock waits, reads and pauses. A write that has
    /// been handed to the store is always awaited: its outcome decides what
    /// the caller is told.
    async fn reconcile_serialized(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
        deadline: Instant,
    ) -> Result<(StreakPlan, u32), ReconcileError> {
        let mut plan: Option<StreakPlan> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self
                .attempt(user_id, completion_date, &mut plan, deadline)
                .await
            {
                Ok(done) => {
                    if Instant::now() > deadline {
                        warn!(user = %user_id, attempt, "streak write finished after the timeout budget");
                    }
                    return Ok((done, attempt));
                }
                Err(AttemptError::OutOfTime) => return Err(self.timed_out()),
                Err(AttemptError::Store(err)) => err,
            };

            if !err.is_transient() {
                return Err(ReconcileError::Store(err));
            }
            if !self.policy.allows_retry_after(attempt) {
                return Err(ReconcileError::ExhaustedRetries {
                    attempts: attempt,
                    source: err,
                });
            }
            if Instant::now() + self.policy.delay >= deadline {
                return Err(self.timed_out());
            }

            let conflict = matches!(err, StoreError::Conflict { .. });
            if conflict {
                plan = None;
            }
            warn!(user = %user_id, attempt, conflict, "streak write failed, retrying: {err}");
            self.metrics
                .record(Metric::ReconcileRetried { attempt, conflict });
            self.policy.pause().await;
        }
    }

    async fn attempt(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
        cached: &mut Option<StreakPlan>,
        deadline: Instant,
    ) -> Result<StreakPlan, AttemptError> {
        let plan = match cached {
            Some(plan) => plan.clone(),
            None => {
                let fresh = tokio::time::timeout_at(deadline, self.evaluate(user_id, completion_date))
                    .await
                    .map_err(|_| AttemptError::OutOfTime)??;
                *cached = Some(fresh.clone());
                fresh
            }
        };

        let Some(update) = &plan.update else {
            return Ok(plan);
        };

        match self.store.apply_streak_update(update).await {
            Ok(()) => Ok(plan),
            Err(StoreError::InsufficientSavePasses { .. }) => {
                // The balance was positive when read but empty at write time.
                error!(
                    user = %user_id,
                    date = %completion_date,
                    "save pass vanished between read and write; applying reset instead"
                );
                self.metrics.record(Metric::SavePassInvariantViolated);

                let previous = tokio::time::timeout_at(deadline, self.store.get_streak(user_id))
                    .await
                    .map_err(|_| AttemptError::OutOfTime)??;
                let fallback = plan_reconciliation(user_id, previous.as_ref(), 0, completion_date);
                *cached = Some(fallback.clone());
                if let Some(update) = &fallback.update {
                    self.store.apply_streak_update(update).await?;
                }
                Ok(fallback)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn evaluate(
        &self,
        user_id: &UserId,
        completion_date: NaiveDate,
    ) -> Result<StreakPlan, StoreError> {
        let stored = self.store.get_streak(user_id).await?;
        let plan = plan_reconciliation(user_id, stored.as_ref(), 0, completion_date);

        // Only a bridgeable gap needs the balance.
        if plan.outcome != ReconcileOutcome::SavePassDenied {
            return Ok(plan);
        }
        let passes = self
            .store
            .get_save_pass_balance(user_id)
            .await?
            .map_or(0, |b| b.passes_remaining);
        Ok(plan_reconciliation(
            user_id,
            stored.as_ref(),
            passes,
            completion_date,
        ))
    }
}

/// Why an attempt stopped short of a result.
enum AttemptError {
    Store(StoreError),
    /// The deadline passed while waiting on a read.
    OutOfTime,
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        AttemptError::Store(err)
    }
}

/// Holds one user's lock entry for the length of a call. Dropping it prunes
/// the entry once no other call for the user holds a clone.
struct UserLease<'a> {
    locks: &'a Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
    user_id: UserId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for UserLease<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map's copy plus ours.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.user_id);
        }
    }
}

/// Reject completion dates beyond tomorrow (UTC). One day of slack covers
/// clients ahead of UTC.
fn validate_date(completion_date: NaiveDate) -> Result<(), ValidationError> {
    let latest = Utc::now().date_naive() + chrono::Duration::days(1);
    if completion_date > latest {
        return Err(ValidationError::InvalidValue {
            field: "completion_date".into(),
            message: format!("{completion_date} is in the future"),
        });
    }
    Ok(())
}
