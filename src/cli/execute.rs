//! `flexget execute`: queue the selected tasks, run them and exit

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use flexget_core::scheduler::DEFAULT_PRIORITY;
use flexget_core::{
    Entry, ExecuteOptions, Manager, MemoryTriggerStore, Scheduler, TaskOutcome,
};

use super::ExecuteArgs;
use crate::settings::Settings;

/// Run the command
pub async fn run(manager: Arc<Manager>, settings: &Settings, args: ExecuteArgs) -> Result<()> {
    let options = options_from_args(args);

    // Schedules never fire here, so last runs need not persist
    let scheduler = Scheduler::new(
        manager,
        Arc::new(MemoryTriggerStore::new()),
        settings.scheduler.engine_config(),
    );
    let handles = scheduler.execute(options, DEFAULT_PRIORITY, None).await;
    if handles.is_empty() {
        bail!("No matching tasks to execute");
    }

    scheduler.request_shutdown(true);
    scheduler.run(CancellationToken::new()).await;

    let outcomes = futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;
    let mut failed = 0;
    for outcome in outcomes.into_iter().flatten() {
        print_outcome(&outcome);
        if outcome.check().is_err() {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} task(s) aborted", failed);
    }
    Ok(())
}

fn options_from_args(args: ExecuteArgs) -> ExecuteOptions {
    let mut options = ExecuteOptions::new()
        .with_test(args.test)
        .with_learn(args.learn)
        .with_allow_manual(true);
    if !args.tasks.is_empty() {
        options = options.with_tasks(args.tasks);
    }
    if let Some(inject) = args.inject {
        options = options.with_inject(vec![injected_entry(&inject)]);
    }
    options
}

fn injected_entry(values: &[String]) -> Entry {
    let title = values.first().cloned().unwrap_or_default();
    let url = values
        .get(1)
        .cloned()
        .unwrap_or_else(|| format!("http://localhost/inject/{}", title.replace(' ', "%20")));
    Entry::with_title_url(title, url)
}

fn print_outcome(outcome: &TaskOutcome) {
    match &outcome.abort {
        Some(abort) if abort.silent => {
            println!("{:<24} skipped: {}", outcome.task, abort.reason);
        }
        Some(abort) => {
            println!("{:<24} ABORTED: {}", outcome.task, abort.reason);
        }
        None => {
            println!(
                "{:<24} accepted {:>3}  rejected {:>3}  failed {:>3}  undecided {:>3}",
                outcome.task, outcome.accepted, outcome.rejected, outcome.failed, outcome.undecided
            );
        }
    }
}
