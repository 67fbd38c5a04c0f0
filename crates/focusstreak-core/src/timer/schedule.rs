use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Work,
    ShortBreak,
    LongBreak,
}

/// Per-kind durations and the long-break cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerDurations {
    pub work_min: u64,
    pub short_break_min: u64,
    pub long_break_min: u64,
    /// Every n-th completed work session is followed by a long break.
    pub pomodoros_before_long_break: u32,
}

impl TimerDurations {
    /// Build and validate a set of durations.
    pub fn new(
        work_min: u64,
        short_break_min: u64,
        long_break_min: u64,
        pomodoros_before_long_break: u32,
    ) -> Result<Self, ValidationError> {
        let durations = Self {
            work_min,
            short_break_min,
            long_break_min,
            pomodoros_before_long_break,
        };
        durations.validate()?;
        Ok(durations)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let checks = [
            ("work_min", self.work_min),
            ("short_break_min", self.short_break_min),
            ("long_break_min", self.long_break_min),
            (
                "pomodoros_before_long_break",
                u64::from(self.pomodoros_before_long_break),
            ),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    message: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    /// Duration of `kind` in seconds.
    ///
    /// Uses saturating arithmetic to prevent overflow with large values.
    pub fn duration_secs(&self, kind: SessionKind) -> u64 {
        let minutes = match kind {
            SessionKind::Work => self.work_min,
            SessionKind::ShortBreak => self.short_break_min,
            SessionKind::LongBreak => self.long_break_min,
        };
        minutes.saturating_mul(60)
    }

    /// The kind that follows `finished`, given the work count *after*
    /// counting `finished`.
    pub fn next_kind(&self, finished: SessionKind, completed_work_sessions: u32) -> SessionKind {
        match finished {
            SessionKind::Work => {
                let cadence = self.pomodoros_before_long_break.max(1);
                if completed_work_sessions > 0 && completed_work_sessions % cadence == 0 {
                    SessionKind::LongBreak
                } else {
                    SessionKind::ShortBreak
                }
            }
            SessionKind::ShortBreak | SessionKind::LongBreak => SessionKind::Work,
        }
    }
}

impl Default for TimerDurations {
    fn default() -> Self {
        Self {
            work_min: 25,
            short_break_min: 5,
            long_break_min: 15,
            pomodoros_before_long_break: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_durations() {
        let d = TimerDurations::default();
        assert_eq!(d.duration_secs(SessionKind::Work), 25 * 60);
        assert_eq!(d.duration_secs(SessionKind::ShortBreak), 5 * 60);
        assert_eq!(d.duration_secs(SessionKind::LongBreak), 15 * 60);
    }

    #[test]
    fn every_fourth_work_session_earns_long_break() {
        let d = TimerDurations::default();
        assert_eq!(d.next_kind(SessionKind::Work, 1), SessionKind::ShortBreak);
        assert_eq!(d.next_kind(SessionKind::Work, 3), SessionKind::ShortBreak);
        assert_eq!(d.next_kind(SessionKind::Work, 4), SessionKind::LongBreak);
        assert_eq!(d.next_kind(SessionKind::Work, 8), SessionKind::LongBreak);
        assert_eq!(d.next_kind(SessionKind::LongBreak, 4), SessionKind::Work);
    }

    #[test]
    fn zero_durations_are_rejected() {
        assert!(TimerDurations::new(0, 5, 15, 4).is_err());
        assert!(TimerDurations::new(25, 5, 15, 0).is_err());
        assert!(TimerDurations::new(1, 1, 1, 1).is_ok());
    }
}
