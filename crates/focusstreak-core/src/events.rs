use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::streak::StreakResult;
use crate::timer::{SessionKind, TimerState};

/// Every state change in the system produces an Event.
/// Display collaborators subscribe through [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TimerStarted {
        kind: SessionKind,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        kind: SessionKind,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        kind: SessionKind,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    /// A countdown reached zero. Fires exactly once per session.
    SessionCompleted {
        kind: SessionKind,
        completed_work_sessions: u32,
        at: DateTime<Utc>,
    },
    /// A work session finished for a signed-in user; destined for the
    /// streak service.
    StreakCompletion {
        user_id: UserId,
        completion_date: NaiveDate,
        at: DateTime<Utc>,
    },
    SessionAdvanced {
        kind: SessionKind,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        state: TimerState,
        at: DateTime<Utc>,
    },
    StreakReconciled {
        user_id: UserId,
        completion_date: NaiveDate,
        result: StreakResult,
        at: DateTime<Utc>,
    },
    /// Reconciliation failed and the completion was queued for later.
    StreakDeferred {
        user_id: UserId,
        completion_date: NaiveDate,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Whether the event changes what a timer display shows.
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            Event::TimerStarted { .. }
                | Event::TimerPaused { .. }
                | Event::TimerReset { .. }
                | Event::SessionAdvanced { .. }
                | Event::StateSnapshot { .. }
        )
    }
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Fan-out of events to in-process subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every published event.
    pub fn subscribe(&mut self, subscriber: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// Register a callback for timer state changes only.
    pub fn on_state_change(&mut self, subscriber: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscribe(move |event| {
            if event.is_state_change() {
                subscriber(event);
            }
        });
    }

    pub fn publish(&self, event: &Event) {
        for subscriber in &self.subscribers {
            subscriber(event);
        }
    }

    pub fn publish_all<'a>(&self, events: impl IntoIterator<Item = &'a Event>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn started() -> Event {
        Event::TimerStarted {
            kind: SessionKind::Work,
            remaining_secs: 10,
            at: Utc::now(),
        }
    }

    fn completed() -> Event {
        Event::SessionCompleted {
            kind: SessionKind::Work,
            completed_work_sessions: 1,
            at: Utc::now(),
        }
    }

    #[test]
    fn state_change_subscribers_skip_completions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let all = Arc::new(Mutex::new(0usize));

        let mut bus = EventBus::new();
        let seen_clone = seen.clone();
        bus.on_state_change(move |e| seen_clone.lock().unwrap().push(e.clone()));
        let all_clone = all.clone();
        bus.subscribe(move |_| *all_clone.lock().unwrap() += 1);

        bus.publish_all(&[started(), completed()]);

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(*all.lock().unwrap(), 2);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(completed()).unwrap();
        assert_eq!(json["type"], "session_completed");
        assert_eq!(json["kind"], "work");
    }
}
