//! Scheduler - runs tasks on intervals and cron schedules
//!
//! ```text
//! ┌─────────────────┐
//! │    Scheduler    │  Main loop: queue due triggers, run one job at a time
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    JobQueue     │  Priority queue (lower first, FIFO among equal)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │     Trigger     │  Interval / cron schedule, next run computation
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  TriggerStore   │  Last run per trigger uid (SQLite or memory)
//! └─────────────────┘
//! ```
//!
//! # Config
//!
//! ```yaml
//! schedules:
//!   - tasks: [tv, "movies*"]
//!     interval:
//!       hours: 2
//!   - tasks: backlog
//!     schedule:
//!       hour: 3
//!       day_of_week: sat
//! ```
//!
//! Without a `schedules` key every task runs hourly; `schedules: false`
//! turns periodic runs off.

mod cron;
mod engine;
mod queue;
mod store;
mod trigger;

pub use cron::{CronSchedule, CronSpec};
pub use engine::{ExecuteOptions, Scheduler, SchedulerConfig, ShutdownMode};
pub use queue::{FinishedHandle, Job, JobQueue};
pub use store::{MemoryTriggerStore, SqliteTriggerStore, TriggerStore};
pub use trigger::{IntervalSpec, IntervalUnit, Schedule, Trigger};

use serde_json::{json, Value};
use std::sync::Arc;

use flexget_schema::SchemaRegistry;

/// Result type alias
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Scheduler error types
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Invalid schedule configuration
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    /// Store setup failure
    #[error("store error: {0}")]
    Store(String),
}

/// Queue priority of scheduled runs
pub const TRIGGER_PRIORITY: i32 = 5;

/// Queue priority of runs requested by a user
pub const DEFAULT_PRIORITY: i32 = 1;

/// Schema of the root `schedules` key
#[must_use]
pub fn schedules_schema() -> Value {
    let units = IntervalUnit::ALL.map(IntervalUnit::as_str);
    let mut interval_properties = serde_json::Map::new();
    for unit in units {
        interval_properties.insert(unit.to_string(), json!({"type": "number", "exclusiveMinimum": 0}));
    }
    interval_properties.insert("at_time".to_string(), json!({"type": "string", "format": "time"}));
    interval_properties.insert(
        "on_day".to_string(),
        json!({"type": "string", "enum": ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"]}),
    );
    interval_properties.insert("jitter".to_string(), json!({"type": "integer", "minimum": 0}));

    let interval = json!({
        "type": "object",
        "title": "Simple Interval",
        "format": "interval_units",
        "properties": interval_properties,
        "oneOf": units.iter().map(|u| json!({"required": [u]})).collect::<Vec<_>>(),
        "error_oneOf": format!("Interval must be specified as exactly one of {}", units.join(", ")),
        "additionalProperties": false
    });

    let field = json!({"type": ["integer", "string"]});
    let schedule = json!({
        "type": "object",
        "title": "Advanced Interval",
        "format": "cron_schedule",
        "properties": {
            "year": field, "month": field, "day": field, "week": field,
            "day_of_week": field, "hour": field, "minute": field
        },
        "minProperties": 1,
        "additionalProperties": false
    });

    json!({
        "oneOf": [
            {
                "type": "array",
                "title": "Schedules",
                "items": {
                    "type": "object",
                    "properties": {
                        "tasks": {"type": ["array", "string"], "items": {"type": "string"}},
                        "interval": interval,
                        "schedule": schedule
                    },
                    "required": ["tasks"],
                    "minProperties": 2,
                    "maxProperties": 2,
                    "error_minProperties": "Either `schedule` or `interval` must be defined.",
                    "error_maxProperties": "Either `schedule` or `interval` must be defined.",
                    "additionalProperties": false
                }
            },
            {"type": "boolean", "enum": [false]}
        ]
    })
}

/// Register the `schedules` root key and the `cron_schedule` and
/// `interval_units` formats
pub fn register_config(schemas: &SchemaRegistry) {
    schemas.register_config_key("schedules", schedules_schema(), false);
    schemas.formats().register(
        "interval_units",
        Arc::new(|value: &Value| match value.as_object() {
            Some(spec) => trigger::check_interval_config(spec),
            None => Ok(()),
        }),
    );
    schemas.formats().register(
        "cron_schedule",
        Arc::new(|value: &Value| match value.as_object() {
            Some(spec) => CronSpec::from_config(spec)
                .and_then(|cron| cron.to_schedule().map(|_| ()))
                .map_err(|e| e.to_string()),
            None => Ok(()),
        }),
    );
}
