//! TOML-based application configuration.
//!
//! Stores:
//! - Timer durations and long-break cadence
//! - Streak reconciliation retry policy and timeout budget
//! - Save passes granted per billing plan
//!
//! Configuration is stored at `<data dir>/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::billing::Plan;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::timer::TimerDurations;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_work_minutes")]
    pub work_minutes: u64,
    #[serde(default = "default_short_break")]
    pub short_break_minutes: u64,
    #[serde(default = "default_long_break")]
    pub long_break_minutes: u64,
    #[serde(default = "default_pomodoros_before_long_break")]
    pub pomodoros_before_long_break: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between persistence attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Budget covering all attempts of one reconciliation.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_monthly_passes")]
    pub monthly_passes: u32,
    #[serde(default = "default_yearly_passes")]
    pub yearly_passes: u32,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub streak: StreakConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

fn default_work_minutes() -> u64 {
    25
}
fn default_short_break() -> u64 {
    5
}
fn default_long_break() -> u64 {
    15
}
fn default_pomodoros_before_long_break() -> u32 {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_monthly_passes() -> u32 {
    3
}
fn default_yearly_passes() -> u32 {
    12
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_minutes: default_work_minutes(),
            short_break_minutes: default_short_break(),
            long_break_minutes: default_long_break(),
            pomodoros_before_long_break: default_pomodoros_before_long_break(),
        }
    }
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            monthly_passes: default_monthly_passes(),
            yearly_passes: default_yearly_passes(),
        }
    }
}

impl BillingConfig {
    pub fn passes_for(&self, plan: Plan) -> u32 {
        match plan {
            Plan::Monthly => self.monthly_passes,
            Plan::Yearly => self.yearly_passes,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;
            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => value
                    .parse::<u64>()
                    .map(|n| serde_json::Value::Number(n.into()))
                    .map_err(|_| invalid(format!("cannot parse '{value}' as a whole number")))?,
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    return Err(invalid("cannot overwrite a whole section".into()));
                }
                _ => serde_json::Value::String(value.into()),
            };
            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    /// Location of `config.toml` in the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from the data directory, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation, or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if !path.exists() {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            return Ok(cfg);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let load_failed = |message: String| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_failed(e.to_string()))?;
        let cfg: Config = toml::from_str(&content).map_err(|e| load_failed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without persisting. The result must pass
    /// [`Config::validate`].
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Restore one top-level section (`timer`, `streak` or `billing`) to
    /// its defaults, leaving the others as they are.
    pub fn reset_section(&mut self, section: &str) -> Result<(), ConfigError> {
        match section {
            "timer" => self.timer = TimerConfig::default(),
            "streak" => self.streak = StreakConfig::default(),
            "billing" => self.billing = BillingConfig::default(),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timer_durations().validate().map_err(|e| ConfigError::InvalidValue {
            key: "timer".into(),
            message: e.to_string(),
        })?;
        if self.streak.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "streak.max_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.streak.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "streak.timeout_ms".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn timer_durations(&self) -> TimerDurations {
        TimerDurations {
            work_min: self.timer.work_minutes,
            short_break_min: self.timer.short_break_minutes,
            long_break_min: self.timer.long_break_minutes,
            pomodoros_before_long_break: self.timer.pomodoros_before_long_break,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.streak.max_attempts,
            Duration::from_millis(self.streak.retry_delay_ms),
        )
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.streak.timeout_ms)
    }
}
