mod config;
pub mod database;
pub mod migrations;

pub use config::{BillingConfig, Config, StreakConfig, TimerConfig};
pub use database::Database;

use std::path::PathBuf;

/// Returns the data directory, creating it if needed.
///
/// `FOCUSSTREAK_DATA_DIR` overrides the location outright. Otherwise this is
/// `~/.config/focusstreak[-dev]/`, with the `-dev` suffix when
/// `FOCUSSTREAK_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("FOCUSSTREAK_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("FOCUSSTREAK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("focusstreak-dev")
            } else {
                base_dir.join("focusstreak")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
