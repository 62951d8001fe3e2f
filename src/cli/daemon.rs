//! `flexget daemon`: run scheduled tasks until Ctrl-C

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flexget_core::{Manager, Scheduler, SqliteTriggerStore};

use crate::settings::Settings;

/// Run the command
pub async fn run(manager: Arc<Manager>, settings: &Settings) -> Result<()> {
    let db = settings.scheduler_db();
    let store = SqliteTriggerStore::from_path(&db)
        .await
        .with_context(|| format!("Failed to open scheduler database {}", db.display()))?;
    let scheduler = Scheduler::new(manager.clone(), Arc::new(store), settings.scheduler.engine_config());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
            }
            shutdown.cancel();
        });
    }
    spawn_reload_on_hangup(manager, shutdown.clone());

    info!(db = %db.display(), "Daemon started");
    scheduler.run(shutdown).await;
    info!("Daemon stopped");
    Ok(())
}

/// Reload the config file on SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(manager: Arc<Manager>, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGHUP, config reload disabled");
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("SIGHUP received, reloading config");
                    // failures are logged by the manager and the old config stays
                    let _ = manager.reload_config().await;
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_manager: Arc<Manager>, _shutdown: CancellationToken) {}
