//! Trigger last-run storage
//!
//! Last runs survive restarts so an interval keeps counting from the
//! previous run instead of firing again on startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use super::{Result, SchedulerError};

/// Persistent last-run record per trigger uid
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Last run of the trigger, if it ever ran
    async fn get(&self, uid: &str) -> Result<Option<DateTime<Utc>>>;

    /// Insert or update the last run of the trigger
    async fn upsert(&self, uid: &str, last_run: DateTime<Utc>) -> Result<()>;
}

/// SQLite-based trigger store
pub struct SqliteTriggerStore {
    pool: Pool<Sqlite>,
}

impl SqliteTriggerStore {
    /// Create a new store from database path
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SchedulerError::Store(format!("Failed to create directory: {}", e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create a store that lives as long as the process
    pub async fn in_memory() -> Result<Self> {
        // every connection to sqlite::memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_triggers (
                uid TEXT PRIMARY KEY,
                last_run TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TriggerStore for SqliteTriggerStore {
    async fn get(&self, uid: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(Option<DateTime<Utc>>,)> =
            sqlx::query_as("SELECT last_run FROM scheduler_triggers WHERE uid = ?")
                .bind(uid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(last_run,)| last_run))
    }

    async fn upsert(&self, uid: &str, last_run: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_triggers (uid, last_run) VALUES (?, ?)
            ON CONFLICT(uid) DO UPDATE SET last_run = excluded.last_run
            "#,
        )
        .bind(uid)
        .bind(last_run)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Trigger store kept in memory, for tests and `--test` runs
#[derive(Default)]
pub struct MemoryTriggerStore {
    runs: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryTriggerStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn get(&self, uid: &str) -> Result<Option<DateTime<Utc>>> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(runs.get(uid).copied())
    }

    async fn upsert(&self, uid: &str, last_run: DateTime<Utc>) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.insert(uid.to_string(), last_run);
        Ok(())
    }
}
