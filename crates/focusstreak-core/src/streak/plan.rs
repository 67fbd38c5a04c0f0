//! Pure gap evaluation.
//!
//! Given what the store holds and the completion date, decide the new
//! record and whether a save pass is spent. No I/O happens here, so the
//! service can retry persistence without re-deciding anything.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::store::{StreakRecord, StreakUpdate};

/// Gap (in days) that a single save pass can bridge.
pub const BRIDGEABLE_GAP_DAYS: i64 = 2;

/// Which branch a reconciliation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Same date as the last recorded session; nothing written.
    AlreadyRecorded,
    /// Date precedes the last recorded session (e.g. a late queued retry or
    /// a concurrent call for an earlier day). The session is counted; streak
    /// and last date are left alone.
    OutOfOrder,
    /// First session ever or the day after the previous one.
    Contiguous,
    /// One missed day forgiven by a save pass.
    SavePassConsumed,
    /// One missed day and no pass left; streak restarted.
    SavePassDenied,
    /// More than one missed day; streak restarted.
    Reset,
}

/// What `reconcile` returns to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakResult {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub save_pass_used: bool,
    pub total_sessions: u64,
}

impl StreakResult {
    fn from_record(record: &StreakRecord, save_pass_used: bool) -> Self {
        Self {
            current_streak: record.current_streak,
            longest_streak: record.longest_streak,
            save_pass_used,
            total_sessions: record.total_sessions,
        }
    }
}

/// Decision for one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakPlan {
    pub outcome: ReconcileOutcome,
    /// `None` when nothing needs to be written.
    pub update: Option<StreakUpdate>,
    pub result: StreakResult,
}

/// Whole days between the last session and `completion_date`; 0 for a first
/// session.
pub fn gap_days(last_session_date: Option<NaiveDate>, completion_date: NaiveDate) -> i64 {
    last_session_date.map_or(0, |last| (completion_date - last).num_days())
}

/// Decide the new streak state.
///
/// `stored` is the current record (if any) and `passes_remaining` the
/// current save-pass balance.
pub fn plan_reconciliation(
    user_id: &UserId,
    stored: Option<&StreakRecord>,
    passes_remaining: u32,
    completion_date: NaiveDate,
) -> StreakPlan {
    let previous = stored
        .cloned()
        .unwrap_or_else(|| StreakRecord::empty(user_id.clone()));
    let gap = gap_days(previous.last_session_date, completion_date);

    if previous.last_session_date.is_some() && gap == 0 {
        return StreakPlan {
            outcome: ReconcileOutcome::AlreadyRecorded,
            update: None,
            result: StreakResult::from_record(&previous, false),
        };
    }
    if gap < 0 {
        let record = StreakRecord {
            total_sessions: previous.total_sessions.saturating_add(1),
            ..previous.clone()
        };
        return StreakPlan {
            outcome: ReconcileOutcome::OutOfOrder,
            result: StreakResult::from_record(&record, false),
            update: Some(StreakUpdate {
                expected_total_sessions: previous.total_sessions,
                record,
                save_pass_delta: 0,
            }),
        };
    }

    let (outcome, current_streak) = if gap <= 1 {
        (
            ReconcileOutcome::Contiguous,
            previous.current_streak.saturating_add(1),
        )
    } else if gap == BRIDGEABLE_GAP_DAYS {
        if passes_remaining > 0 {
            (
                ReconcileOutcome::SavePassConsumed,
                previous.current_streak.saturating_add(1),
            )
        } else {
            (ReconcileOutcome::SavePassDenied, 1)
        }
    } else {
        (ReconcileOutcome::Reset, 1)
    };

    let save_pass_used = outcome == ReconcileOutcome::SavePassConsumed;
    let record = StreakRecord {
        user_id: user_id.clone(),
        current_streak,
        longest_streak: previous.longest_streak.max(current_streak),
        last_session_date: Some(completion_date),
        total_sessions: previous.total_sessions.saturating_add(1),
    };

    StreakPlan {
        outcome,
        result: StreakResult::from_record(&record, save_pass_used),
        update: Some(StreakUpdate {
            expected_total_sessions: previous.total_sessions,
            record,
            save_pass_delta: if save_pass_used { -1 } else { 0 },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user() -> UserId {
        UserId::new("planner").unwrap()
    }

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn stored(streak: u32, longest: u32, last: NaiveDate, total: u64) -> StreakRecord {
        StreakRecord {
            user_id: user(),
            current_streak: streak,
            longest_streak: longest,
            last_session_date: Some(last),
            total_sessions: total,
        }
    }

    #[test]
    fn first_session_starts_streak() {
        let plan = plan_reconciliation(&user(), None, 0, date(1, 1));
        assert_eq!(plan.outcome, ReconcileOutcome::Contiguous);
        assert_eq!(
            plan.result,
            StreakResult {
                current_streak: 1,
                longest_streak: 1,
                save_pass_used: false,
                total_sessions: 1,
            }
        );
        let update = plan.update.unwrap();
        assert_eq!(update.expected_total_sessions, 0);
        assert_eq!(update.save_pass_delta, 0);
    }

    #[test]
    fn next_day_extends_streak() {
        let record = stored(5, 5, date(1, 1), 9);
        let plan = plan_reconciliation(&user(), Some(&record), 0, date(1, 2));
        assert_eq!(plan.outcome, ReconcileOutcome::Contiguous);
        assert_eq!(plan.result.current_streak, 6);
        assert_eq!(plan.result.total_sessions, 10);
    }

    #[test]
    fn same_day_is_a_no_op() {
        let record = stored(5, 7, date(1, 1), 9);
        let plan = plan_reconciliation(&user(), Some(&record), 3, date(1, 1));
        assert_eq!(plan.outcome, ReconcileOutcome::AlreadyRecorded);
        assert!(plan.update.is_none());
        assert_eq!(plan.result.total_sessions, 9);
        assert_eq!(plan.result.current_streak, 5);
    }

    #[test]
    fn earlier_date_only_counts_the_session() {
        let record = stored(5, 7, date(1, 10), 9);
        let plan = plan_reconciliation(&user(), Some(&record), 3, date(1, 8));
        assert_eq!(plan.outcome, ReconcileOutcome::OutOfOrder);
        let update = plan.update.unwrap();
        assert_eq!(update.save_pass_delta, 0);
        assert_eq!(update.record.total_sessions, 10);
        assert_eq!(update.record.current_streak, 5);
        assert_eq!(update.record.last_session_date, Some(date(1, 10)));
    }

    #[test]
    fn one_missed_day_uses_pass() {
        let record = stored(5, 5, date(1, 1), 5);
        let plan = plan_reconciliation(&user(), Some(&record), 1, date(1, 3));
        assert_eq!(plan.outcome, ReconcileOutcome::SavePassConsumed);
        assert_eq!(plan.result.current_streak, 6);
        assert!(plan.result.save_pass_used);
        assert_eq!(plan.update.unwrap().save_pass_delta, -1);
    }

    #[test]
    fn one_missed_day_without_pass_resets() {
        let record = stored(5, 5, date(1, 1), 5);
        let plan = plan_reconciliation(&user(), Some(&record), 0, date(1, 3));
        assert_eq!(plan.outcome, ReconcileOutcome::SavePassDenied);
        assert_eq!(plan.result.current_streak, 1);
        assert_eq!(plan.result.longest_streak, 5);
        assert!(!plan.result.save_pass_used);
    }

    #[test]
    fn long_gap_resets_regardless_of_passes() {
        let record = stored(5, 5, date(1, 1), 5);
        let plan = plan_reconciliation(&user(), Some(&record), 12, date(1, 5));
        assert_eq!(plan.outcome, ReconcileOutcome::Reset);
        assert_eq!(plan.result.current_streak, 1);
        assert_eq!(plan.update.unwrap().save_pass_delta, 0);
    }

    #[test]
    fn gap_spans_month_boundary() {
        assert_eq!(gap_days(Some(date(1, 31)), date(2, 1)), 1);
        assert_eq!(gap_days(Some(date(2, 28)), date(3, 1)), 2);
        assert_eq!(gap_days(None, date(3, 1)), 0);
    }

    proptest! {
        #[test]
        fn longest_streak_never_decreases(
            steps in proptest::collection::vec((0i64..5, 0u32..3), 1..40)
        ) {
            let mut record: Option<StreakRecord> = None;
            let mut day = date(1, 1);
            let mut longest = 0;
            for (advance, passes) in steps {
                day += chrono::Duration::days(advance);
                let plan = plan_reconciliation(&user(), record.as_ref(), passes, day);
                prop_assert!(plan.result.longest_streak >= longest);
                prop_assert!(plan.result.longest_streak >= plan.result.current_streak);
                longest = plan.result.longest_streak;
                if let Some(update) = plan.update {
                    record = Some(update.record);
                }
            }
        }
    }
}
