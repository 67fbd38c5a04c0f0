use clap::Subcommand;
use focusstreak_core::{Config, ConfigError};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one value, e.g. "timer.work_minutes" or "streak.timeout_ms"
    Get { key: String },
    /// Change one value and write config.toml
    Set { key: String, value: String },
    /// Print the whole configuration as JSON
    List,
    /// Print where config.toml lives
    Path,
    /// Restore defaults for one section (timer, streak, billing) or everything
    Reset { section: Option<String> },
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let value = Config::load()?
                .get(&key)
                .ok_or(ConfigError::UnknownKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            // Echo what was stored; numbers come back normalized.
            println!("{key} = {}", config.get(&key).unwrap_or(value));
        }
        ConfigAction::List => {
            println!("{}", serde_json::to_string_pretty(&Config::load()?)?);
        }
        ConfigAction::Path => {
            println!("{}", Config::path()?.display());
        }
        ConfigAction::Reset { section: None } => {
            // A full reset also recovers from a file that no longer parses.
            Config::default().save()?;
            println!("all sections reset to defaults");
        }
        ConfigAction::Reset {
            section: Some(section),
        } => {
            let mut config = Config::load()?;
            config.reset_section(&section)?;
            config.save()?;
            println!("{section} reset to defaults");
        }
    }
    Ok(())
}
