use std::time::Duration;

use clap::Subcommand;
use focusstreak_core::streak::parse_completion_date;
use focusstreak_core::{Config, Database, Event, Identity, SqliteStore, StreakService, TimerEngine};
use tracing::info;

use super::{open_store, print_line, settle_completion, streak_service, with_database, CliResult};

const ENGINE_KEY: &str = "timer_engine";

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start or resume the countdown
    Start,
    /// Pause the countdown
    Pause,
    /// Rewind the current session (durations are re-read from config)
    Reset,
    /// Print current timer state as JSON
    Status,
    /// Stop crediting completed work sessions to anyone
    SignOut,
    /// Advance the countdown as if time had passed
    Tick {
        /// Seconds to advance
        #[arg(long, default_value = "1")]
        seconds: u64,
        /// Credit completions to this date (YYYY-MM-DD) instead of today
        #[arg(long)]
        date: Option<String>,
    },
    /// Run the timer live, one tick per second, printing events as JSON lines
    Run {
        /// Stop after this many completed work sessions
        #[arg(long)]
        sessions: Option<u32>,
    },
}

fn load_engine(db: &Database, config: &Config) -> TimerEngine {
    if let Ok(Some(json)) = db.kv_get(ENGINE_KEY) {
        match serde_json::from_str::<TimerEngine>(&json) {
            Ok(engine) => return engine,
            Err(e) => tracing::warn!("discarding unreadable timer state: {e}"),
        }
    }
    TimerEngine::new(config.timer_durations(), None)
}

fn save_engine(db: &Database, engine: &TimerEngine) -> CliResult {
    let json = serde_json::to_string(engine)?;
    db.kv_set(ENGINE_KEY, &json)?;
    Ok(())
}

pub async fn run(action: TimerAction, identity: Option<Identity>) -> CliResult {
    let config = Config::load()?;
    let store = open_store()?;
    let service = streak_service(store.clone(), &config);

    let mut engine = with_database(&store, |db| Ok(load_engine(db, &config)))?;
    if let Some(identity) = &identity {
        info!(user = %identity.id, email = %identity.email, "timer signed in");
        engine.sign_in(identity);
    }

    let events: Vec<Event> = match action {
        TimerAction::Start => engine.start().into_iter().collect(),
        TimerAction::Pause => engine.pause().into_iter().collect(),
        TimerAction::Reset => {
            engine.set_durations(config.timer_durations());
            vec![engine.snapshot()]
        }
        TimerAction::Status => vec![engine.snapshot()],
        TimerAction::SignOut => {
            engine.sign_out();
            vec![engine.snapshot()]
        }
        TimerAction::Tick { seconds, date } => {
            let completion_date = date.as_deref().map(parse_completion_date).transpose()?;
            let mut events = Vec::new();
            for _ in 0..seconds {
                events.extend(match completion_date {
                    Some(day) => engine.tick_on(day),
                    None => engine.tick(),
                });
            }
            events.push(engine.snapshot());
            events
        }
        TimerAction::Run { sessions } => {
            return run_live(&mut engine, &store, &service, sessions).await;
        }
    };

    // Persist first; a failed streak update must not undo a completion.
    with_database(&store, |db| save_engine(db, &engine))?;
    emit(&events, &service).await
}

/// Print events, reconciling streaks for each work completion.
async fn emit(events: &[Event], service: &StreakService<SqliteStore>) -> CliResult {
    for event in events {
        print_line(event)?;
        if let Event::StreakCompletion {
            user_id,
            completion_date,
            ..
        } = event
        {
            let settled = settle_completion(service, user_id, *completion_date).await?;
            print_line(&settled)?;
        }
    }
    Ok(())
}

async fn run_live(
    engine: &mut TimerEngine,
    store: &SqliteStore,
    service: &StreakService<SqliteStore>,
    sessions: Option<u32>,
) -> CliResult {
    let target = sessions.map(|n| engine.completed_work_sessions().saturating_add(n));
    if let Some(started) = engine.start() {
        print_line(&started)?;
    }

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.tick().await;
    loop {
        interval.tick().await;
        let events = engine.tick();
        if events.is_empty() {
            continue;
        }
        with_database(store, |db| save_engine(db, engine))?;
        emit(&events, service).await?;

        if target.is_some_and(|t| engine.completed_work_sessions() >= t) {
            break;
        }
    }

    engine.pause();
    with_database(store, |db| save_engine(db, engine))
}
