//! `flexget check` and `flexget schedules`

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use flexget_core::{Manager, Scheduler, SqliteTriggerStore};

use crate::settings::Settings;

/// Validate the config file and print every error
pub async fn run(path: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: Value = serde_yaml::from_str(&text).context("Config is not valid YAML")?;

    let manager = Manager::with_builtins();
    let errors = manager.validate_config(&config)?;
    if errors.is_empty() {
        println!("Config passed check.");
        return Ok(());
    }
    for error in &errors {
        let pointer = error.json_pointer();
        let location = if pointer.is_empty() { "/" } else { pointer.as_str() };
        println!("[{}] {}", location, error.message);
    }
    bail!("Config check failed with {} error(s)", errors.len())
}

/// List the configured triggers with their last and next run
pub async fn schedules(manager: Arc<Manager>, settings: &Settings) -> Result<()> {
    let db = settings.scheduler_db();
    let store = SqliteTriggerStore::from_path(&db)
        .await
        .with_context(|| format!("Failed to open scheduler database {}", db.display()))?;
    let scheduler = Scheduler::new(manager, Arc::new(store), settings.scheduler.engine_config());

    let triggers = scheduler.triggers().await;
    if triggers.is_empty() {
        println!("No schedules configured.");
        return Ok(());
    }
    for trigger in triggers {
        println!("{}", trigger);
        println!("    id:       {}", trigger.uid());
        println!("    last run: {}", trigger.last_run().map(local).unwrap_or_else(|| "never".to_string()));
        println!("    next run: {}", local(trigger.run_at()));
    }
    Ok(())
}

fn local(time: DateTime<Utc>) -> String {
    if time == DateTime::<Utc>::MAX_UTC {
        return "never".to_string();
    }
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
