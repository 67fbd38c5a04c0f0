//! Timer engine implementation.
//!
//! The timer engine is a tick-driven state machine. It does not use
//! internal threads - the caller is responsible for calling `tick()` once
//! per wall-clock second while the timer runs.
//!
//! ## Session cycle
//!
//! ```text
//! Work -> ShortBreak -> Work -> ShortBreak -> Work -> ShortBreak -> Work -> LongBreak -> Work ...
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = TimerEngine::new(TimerDurations::default(), Some(user_id));
//! engine.start();
//! // Once per second:
//! for event in engine.tick() { bus.publish(&event); }
//! ```

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{SessionKind, TimerDurations};
use crate::events::Event;
use crate::identity::{Identity, UserId};

/// Read-only view of the timer for display collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub remaining_secs: u64,
    pub session_kind: SessionKind,
    pub is_running: bool,
    pub completed_work_sessions: u32,
}

/// Core timer engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerEngine {
    durations: TimerDurations,
    /// User credited with completed work sessions. Anonymous timers never
    /// request streak reconciliation.
    #[serde(default)]
    owner: Option<UserId>,
    session_kind: SessionKind,
    remaining_secs: u64,
    is_running: bool,
    completed_work_sessions: u32,
}

impl TimerEngine {
    /// Create a paused engine at the start of a work session.
    pub fn new(durations: TimerDurations, owner: Option<UserId>) -> Self {
        let remaining_secs = durations.duration_secs(SessionKind::Work);
        Self {
            durations,
            owner,
            session_kind: SessionKind::Work,
            remaining_secs,
            is_running: false,
            completed_work_sessions: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        TimerState {
            remaining_secs: self.remaining_secs,
            session_kind: self.session_kind,
            is_running: self.is_running,
            completed_work_sessions: self.completed_work_sessions,
        }
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn session_kind(&self) -> SessionKind {
        self.session_kind
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn completed_work_sessions(&self) -> u32 {
        self.completed_work_sessions
    }

    pub fn owner(&self) -> Option<&UserId> {
        self.owner.as_ref()
    }

    pub fn durations(&self) -> &TimerDurations {
        &self.durations
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        Event::StateSnapshot {
            state: self.state(),
            at: Utc::now(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self) -> Option<Event> {
        if self.is_running {
            return None;
        }
        self.is_running = true;
        Some(Event::TimerStarted {
            kind: self.session_kind,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    pub fn pause(&mut self) -> Option<Event> {
        if !self.is_running {
            return None;
        }
        self.is_running = false;
        Some(Event::TimerPaused {
            kind: self.session_kind,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Rewind the current session. The work-session count is kept.
    pub fn reset(&mut self) -> Option<Event> {
        self.is_running = false;
        self.remaining_secs = self.durations.duration_secs(self.session_kind);
        Some(Event::TimerReset {
            kind: self.session_kind,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Credit future work sessions to a verified user.
    pub fn sign_in(&mut self, identity: &Identity) {
        self.owner = Some(identity.id.clone());
    }

    /// Back to an anonymous timer; completions stop reaching the streak.
    pub fn sign_out(&mut self) {
        self.owner = None;
    }

    /// Apply new durations and rewind the current session.
    pub fn set_durations(&mut self, durations: TimerDurations) {
        self.durations = durations;
        self.reset();
    }

    /// One second elapsed, completion dated today (UTC).
    pub fn tick(&mut self) -> Vec<Event> {
        self.tick_on(Utc::now().date_naive())
    }

    /// One second elapsed. A work session finishing on this tick is credited
    /// to `completion_date`.
    pub fn tick_on(&mut self, completion_date: NaiveDate) -> Vec<Event> {
        if !self.is_running {
            return Vec::new();
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs > 0 {
            return Vec::new();
        }

        let finished = self.session_kind;
        let at = Utc::now();
        let mut events = Vec::with_capacity(3);

        if finished == SessionKind::Work {
            self.completed_work_sessions = self.completed_work_sessions.saturating_add(1);
        }
        events.push(Event::SessionCompleted {
            kind: finished,
            completed_work_sessions: self.completed_work_sessions,
            at,
        });
        if finished == SessionKind::Work {
            if let Some(user_id) = &self.owner {
                events.push(Event::StreakCompletion {
                    user_id: user_id.clone(),
                    completion_date,
                    at,
                });
            }
        }

        self.session_kind = self
            .durations
            .next_kind(finished, self.completed_work_sessions);
        self.remaining_secs = self.durations.duration_secs(self.session_kind);
        events.push(Event::SessionAdvanced {
            kind: self.session_kind,
            duration_secs: self.remaining_secs,
            at,
        });
        events
    }
}
