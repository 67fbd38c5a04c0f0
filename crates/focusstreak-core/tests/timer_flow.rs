//! End-to-end flow: timer ticks produce completions, completions feed the
//! streak service, failures land in the pending queue.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use focusstreak_core::{
    Database, Event, EventBus, MemoryStore, PendingQueue, ReconcileError, RetryPolicy,
    SessionKind, SqliteStore, StreakService, StreakStore, TimerDurations, TimerEngine, UserId,
};
use proptest::prelude::*;

fn user() -> UserId {
    UserId::new("flow-user").unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
}

/// One-minute work, one-minute short break, two-minute long break.
fn short_engine(owner: Option<UserId>) -> TimerEngine {
    TimerEngine::new(TimerDurations::new(1, 1, 2, 4).unwrap(), owner)
}

/// Run the engine through one full work session and the following break,
/// crediting completions to `day`.
fn run_work_and_break(engine: &mut TimerEngine, day: NaiveDate) -> Vec<Event> {
    let mut events = Vec::new();
    let mut advanced = 0;
    while advanced < 2 {
        for event in engine.tick_on(day) {
            if matches!(event, Event::SessionAdvanced { .. }) {
                advanced += 1;
            }
            events.push(event);
        }
    }
    events
}

fn completions(events: &[Event]) -> Vec<(UserId, NaiveDate)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StreakCompletion {
                user_id,
                completion_date,
                ..
            } => Some((user_id.clone(), *completion_date)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn consecutive_days_of_sessions_build_a_streak() {
    let store = Arc::new(MemoryStore::new());
    let service = StreakService::new(store.clone()).with_retry_policy(RetryPolicy::immediate(3));
    let mut engine = short_engine(Some(user()));
    engine.start();

    for day in 1..=3 {
        // Two sessions per day: only the first one moves the streak.
        for _ in 0..2 {
            let events = run_work_and_break(&mut engine, date(day));
            for (user_id, completion_date) in completions(&events) {
                service.reconcile(&user_id, completion_date).await.unwrap();
            }
        }
    }

    let record = store.get_streak(&user()).await.unwrap().unwrap();
    assert_eq!(record.current_streak, 3);
    assert_eq!(record.longest_streak, 3);
    assert_eq!(record.total_sessions, 3);
    assert_eq!(engine.completed_work_sessions(), 6);
}

#[test]
fn anonymous_timer_emits_no_streak_completions() {
    let mut engine = short_engine(None);
    engine.start();
    let events = run_work_and_break(&mut engine, date(1));
    assert!(completions(&events).is_empty());
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::SessionCompleted { kind: SessionKind::Work, .. })));
}

#[test]
fn bus_subscribers_see_every_event() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state_changes = Arc::new(Mutex::new(0usize));
    let mut bus = EventBus::new();
    {
        let seen = seen.clone();
        bus.subscribe(move |e| seen.lock().unwrap().push(e.clone()));
    }
    {
        let state_changes = state_changes.clone();
        bus.on_state_change(move |_| *state_changes.lock().unwrap() += 1);
    }

    let mut engine = short_engine(Some(user()));
    if let Some(started) = engine.start() {
        bus.publish(&started);
    }
    let events = run_work_and_break(&mut engine, date(1));
    bus.publish_all(&events);

    assert_eq!(seen.lock().unwrap().len(), events.len() + 1);
    assert!(*state_changes.lock().unwrap() > 0);
}

#[tokio::test]
async fn deferred_completion_is_replayed_from_sqlite_queue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flow.db");
    let db = Database::open_at(&path).unwrap();

    let outage = ReconcileError::TimedOut { budget_ms: 10_000 };
    let queue = PendingQueue::new(Arc::new(Mutex::new(db)));
    queue.enqueue(&user(), date(4), &outage).unwrap();
    queue.enqueue(&user(), date(3), &outage).unwrap();
    queue.enqueue(&user(), date(4), &outage).unwrap();
    drop(queue);

    let store = Arc::new(SqliteStore::new(Database::open_at(&path).unwrap()));
    let service = StreakService::new(store.clone()).with_retry_policy(RetryPolicy::immediate(3));
    let queue = PendingQueue::new(store.database());
    assert_eq!(queue.len().unwrap(), 2);

    let report = queue.flush(&service).await.unwrap();
    assert_eq!(report.reconciled.len(), 2);
    assert_eq!(report.remaining, 0);
    assert!(queue.is_empty().unwrap());

    let record = service.current(&user()).await.unwrap();
    assert_eq!(record.current_streak, 2);
    assert_eq!(record.last_session_date, Some(date(4)));
}

proptest! {
    #[test]
    fn remaining_never_exceeds_session_length(ticks in 0usize..2000, pause_at in 0usize..2000) {
        let mut engine = short_engine(Some(user()));
        engine.start();
        for i in 0..ticks {
            if i == pause_at {
                engine.pause();
                engine.start();
            }
            let events = engine.tick_on(date(1));
            let completed = events
                .iter()
                .filter(|e| matches!(e, Event::SessionCompleted { .. }))
                .count();
            prop_assert!(completed <= 1);
            let kind = engine.session_kind();
            prop_assert!(engine.remaining_secs() <= engine.durations().duration_secs(kind));
            prop_assert!(engine.remaining_secs() > 0);
        }
    }
}
