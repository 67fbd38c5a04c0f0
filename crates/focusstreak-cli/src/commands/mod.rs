pub mod billing;
pub mod config;
pub mod streak;
pub mod timer;

use std::error::Error;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use focusstreak_core::{
    Config, Database, Event, PendingQueue, SqliteStore, StreakService, TracingMetrics, UserId,
};

pub type CliResult = Result<(), Box<dyn Error>>;

/// SQLite store in the data directory.
pub fn open_store() -> Result<Arc<SqliteStore>, Box<dyn Error>> {
    Ok(Arc::new(SqliteStore::new(Database::open()?)))
}

pub fn streak_service(store: Arc<SqliteStore>, config: &Config) -> StreakService<SqliteStore> {
    StreakService::new(store)
        .with_retry_policy(config.retry_policy())
        .with_timeout(config.reconcile_timeout())
        .with_metrics(Arc::new(TracingMetrics))
}

/// Run `f` against the store's database handle.
pub fn with_database<T>(
    store: &SqliteStore,
    f: impl FnOnce(&Database) -> Result<T, Box<dyn Error>>,
) -> Result<T, Box<dyn Error>> {
    let db = store.database();
    let guard = db.lock().map_err(|_| "database handle poisoned")?;
    f(&guard)
}

pub fn pending_queue(store: &SqliteStore) -> PendingQueue {
    PendingQueue::new(store.database())
}

pub fn print_line(event: &Event) -> CliResult {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

/// Record one completed work session.
///
/// A deferrable failure parks the completion in the pending queue and yields
/// a `StreakDeferred` event; the session itself is never lost.
pub async fn settle_completion(
    service: &StreakService<SqliteStore>,
    user_id: &UserId,
    completion_date: NaiveDate,
) -> Result<Event, Box<dyn Error>> {
    match service.reconcile(user_id, completion_date).await {
        Ok(result) => Ok(Event::StreakReconciled {
            user_id: user_id.clone(),
            completion_date,
            result,
            at: Utc::now(),
        }),
        Err(err) if err.is_deferrable() => {
            pending_queue(service.store()).enqueue(user_id, completion_date, &err)?;
            eprintln!("session recorded; streak update may be delayed ({err})");
            Ok(Event::StreakDeferred {
                user_id: user_id.clone(),
                completion_date,
                reason: err.to_string(),
                at: Utc::now(),
            })
        }
        Err(err) => Err(err.into()),
    }
}
