use chrono::Utc;
use clap::Subcommand;
use focusstreak_core::streak::parse_completion_date;
use focusstreak_core::{Config, StreakStore, UserId};
use serde_json::json;

use super::{open_store, pending_queue, print_line, settle_completion, streak_service, CliResult};

#[derive(Subcommand)]
pub enum StreakAction {
    /// Show streak and save-pass balance
    Show {
        #[arg(long)]
        user: UserId,
    },
    /// Record a completed work session
    Reconcile {
        #[arg(long)]
        user: UserId,
        /// Completion date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long)]
        date: Option<String>,
    },
    /// List completions waiting for a retry
    Pending,
    /// Retry queued completions
    Flush,
}

pub async fn run(action: StreakAction) -> CliResult {
    let config = Config::load()?;
    let store = open_store()?;
    let service = streak_service(store.clone(), &config);

    match action {
        StreakAction::Show { user } => {
            let streak = service.current(&user).await?;
            let balance = store.get_save_pass_balance(&user).await?;
            let json = json!({
                "streak": streak,
                "save_passes": balance,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        StreakAction::Reconcile { user, date } => {
            let completion_date = match date {
                Some(d) => parse_completion_date(&d)?,
                None => Utc::now().date_naive(),
            };
            let event = settle_completion(&service, &user, completion_date).await?;
            print_line(&event)?;
        }
        StreakAction::Pending => {
            let entries = pending_queue(&store).entries()?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        StreakAction::Flush => {
            let report = pending_queue(&store).flush(&service).await?;

            for (entry, err) in &report.discarded {
                eprintln!(
                    "dropped {} on {}: {err}",
                    entry.user_id, entry.completion_date
                );
            }
            let json = json!({
                "reconciled": report.reconciled.len(),
                "discarded": report.discarded.len(),
                "remaining": report.remaining,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}
