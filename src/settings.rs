//! Process settings
//!
//! Settings that are not part of the task config: where state lives, the
//! default log filter and scheduler tuning. Read from an optional
//! `flexget.toml` in the working directory, overridden by `FLEXGET_*`
//! environment variables (`FLEXGET_SCHEDULER__POLL_MS=250`).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use flexget_core::{SchedulerConfig, ShutdownMode};

/// Top-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Directory holding the scheduler database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Scheduler tuning
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Scheduler tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Queue poll interval in milliseconds
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    /// Run queued jobs before stopping on Ctrl-C
    #[serde(default = "default_finish_queue")]
    pub finish_queue: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
            finish_queue: default_finish_queue(),
        }
    }
}

impl SchedulerSettings {
    /// Engine config for these settings
    pub fn engine_config(&self) -> SchedulerConfig {
        let mode = if self.finish_queue {
            ShutdownMode::Drain
        } else {
            ShutdownMode::Immediate
        };
        SchedulerConfig::new()
            .with_poll_interval(Duration::from_millis(self.poll_ms.max(1)))
            .with_shutdown_mode(mode)
    }
}

impl Settings {
    /// Path of the trigger last-run database
    pub fn scheduler_db(&self) -> PathBuf {
        self.data_dir.join("scheduler.db")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".flexget"))
        .unwrap_or_else(|| PathBuf::from(".flexget"))
}

fn default_log_filter() -> String {
    "flexget=info,flexget_core=info".to_string()
}

fn default_poll_ms() -> u64 {
    500
}

fn default_finish_queue() -> bool {
    true
}

/// Load settings from `flexget.toml` and the environment
pub fn load_settings() -> Result<Settings> {
    let config = Config::builder()
        .add_source(File::with_name("flexget").required(false))
        // FLEXGET_DATA_DIR, FLEXGET_SCHEDULER__POLL_MS
        .add_source(
            Environment::with_prefix("FLEXGET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build settings")?;

    config
        .try_deserialize()
        .context("Failed to deserialize settings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings: Settings = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.scheduler.poll_ms, 500);
        assert!(settings.scheduler.finish_queue);
        assert!(settings.scheduler_db().ends_with("scheduler.db"));
    }

    #[test]
    fn test_overrides() {
        let settings: Settings = Config::builder()
            .set_override("data_dir", "/tmp/fg")
            .unwrap()
            .set_override("scheduler.poll_ms", 50)
            .unwrap()
            .set_override("scheduler.finish_queue", false)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.scheduler_db(), PathBuf::from("/tmp/fg/scheduler.db"));
        assert_eq!(settings.scheduler.poll_ms, 50);
        assert!(!settings.scheduler.finish_queue);
    }
}
