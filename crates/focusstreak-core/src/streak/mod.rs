//! Streak reconciliation: pure gap evaluation, the retrying service around
//! it, and the queue for completions that could not be recorded yet.

mod pending;
mod plan;
mod service;

pub use pending::{FlushReport, PendingCompletion, PendingQueue};
pub use plan::{
    gap_days, plan_reconciliation, ReconcileOutcome, StreakPlan, StreakResult,
    BRIDGEABLE_GAP_DAYS,
};
pub use service::{StreakService, DEFAULT_TIMEOUT};

use chrono::NaiveDate;

use crate::error::ValidationError;

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_completion_date(input: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate {
        input: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_calendar_dates_only() {
        assert_eq!(
            parse_completion_date("2024-01-03").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
        );
        assert!(parse_completion_date("2024-02-30").is_err());
        assert!(parse_completion_date("2024-01-03T10:00:00Z").is_err());
        assert!(parse_completion_date("yesterday").is_err());
    }
}
