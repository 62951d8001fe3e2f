//! Scheduler execution engine
//!
//! A single loop queues due triggers and runs queued jobs one at a time.
//! Jobs can be queued from anywhere through [`Scheduler::execute`].

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{FinishedHandle, Job, JobQueue};
use super::store::TriggerStore;
use super::trigger::Trigger;
use super::{Result, TRIGGER_PRIORITY};
use crate::entry::Entry;
use crate::event_bus::FlexgetEvent;
use crate::manager::Manager;
use crate::task::{TaskOptions, TaskOutcome};

/// What happens to queued jobs on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Run every queued job first
    #[default]
    Drain,
    /// Stop after the running job
    Immediate,
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long the loop waits for a job before checking triggers again
    pub poll_interval: Duration,
    /// Behavior when the shutdown token is cancelled
    pub shutdown_mode: ShutdownMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            shutdown_mode: ShutdownMode::Drain,
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the shutdown mode
    #[must_use]
    pub fn with_shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }
}

/// Which tasks to run and how
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Task names or glob patterns; `None` runs every task
    pub tasks: Option<Vec<String>>,
    /// Test mode
    pub test: bool,
    /// Learn mode
    pub learn: bool,
    /// Entries to inject instead of running inputs
    pub inject: Vec<Entry>,
    /// Tasks named exactly may run even when marked `manual`
    pub allow_manual: bool,
    /// Started by a trigger
    pub scheduled: bool,
}

impl ExecuteOptions {
    /// Run every task
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run only these tasks (names or patterns)
    #[must_use]
    pub fn with_tasks(mut self, tasks: Vec<String>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Enable test mode
    #[must_use]
    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    /// Enable learn mode
    #[must_use]
    pub fn with_learn(mut self, learn: bool) -> Self {
        self.learn = learn;
        self
    }

    /// Inject entries
    #[must_use]
    pub fn with_inject(mut self, entries: Vec<Entry>) -> Self {
        self.inject = entries;
        self
    }

    /// Let exactly named `manual` tasks run
    #[must_use]
    pub fn with_allow_manual(mut self, allow: bool) -> Self {
        self.allow_manual = allow;
        self
    }

    /// Mark the runs as scheduled
    #[must_use]
    pub fn scheduled(mut self) -> Self {
        self.scheduled = true;
        self
    }
}

/// Runs tasks from triggers and on request
pub struct Scheduler {
    manager: Arc<Manager>,
    store: Arc<dyn TriggerStore>,
    config: SchedulerConfig,
    queue: JobQueue,
    triggers: Mutex<Vec<Trigger>>,
    triggers_dirty: Arc<AtomicBool>,
    stop: CancellationToken,
    finish_queue: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler; triggers are built from the manager's config
    /// and rebuilt whenever `config.updated` fires.
    pub fn new(manager: Arc<Manager>, store: Arc<dyn TriggerStore>, config: SchedulerConfig) -> Arc<Self> {
        let triggers_dirty = Arc::new(AtomicBool::new(true));
        {
            let dirty = triggers_dirty.clone();
            manager.events().on("config.updated", "scheduler", move |_| {
                dirty.store(true, Ordering::SeqCst);
                Ok(())
            });
        }
        Arc::new(Self {
            manager,
            store,
            config,
            queue: JobQueue::new(),
            triggers: Mutex::new(Vec::new()),
            triggers_dirty,
            stop: CancellationToken::new(),
            finish_queue: AtomicBool::new(true),
        })
    }

    /// The job queue
    #[must_use]
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Current triggers, rebuilt first if the config changed
    pub async fn triggers(&self) -> Vec<Trigger> {
        self.refresh_triggers().await;
        self.triggers.lock().await.clone()
    }

    /// Build triggers from the `schedules` config key.
    ///
    /// Without the key every task runs hourly; `schedules: false` yields no
    /// triggers. Last runs are restored from the store.
    pub async fn load_schedules(&self) -> Result<Vec<Trigger>> {
        let config = self.manager.config();
        let schedules = match config.get("schedules") {
            None | Some(Value::Null) => json!([{"tasks": ["*"], "interval": {"hours": 1}}]),
            Some(Value::Bool(false)) => return Ok(Vec::new()),
            Some(schedules) => schedules.clone(),
        };
        let now = Utc::now();
        let mut triggers = Vec::new();
        for item in schedules.as_array().into_iter().flatten() {
            let mut trigger = Trigger::from_config(item, now)?;
            if let Err(e) = trigger.load_last_run(self.store.as_ref(), now).await {
                warn!(trigger = %trigger, error = %e, "Cannot load last run of trigger");
            }
            triggers.push(trigger);
        }
        Ok(triggers)
    }

    async fn refresh_triggers(&self) {
        if !self.triggers_dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.load_schedules().await {
            Ok(triggers) => {
                info!(count = triggers.len(), "Loaded schedules");
                for trigger in &triggers {
                    debug!(trigger = %trigger, run_at = %trigger.run_at(), "Trigger");
                }
                *self.triggers.lock().await = triggers;
            }
            Err(e) => error!(error = %e, "Invalid schedules, keeping previous triggers"),
        }
    }

    /// Queue tasks for execution, returning one handle per queued task.
    ///
    /// Patterns are matched case-insensitively in the order given; each task
    /// is queued once. Tasks are ordered by their `priority` config.
    pub async fn execute(
        &self,
        options: ExecuteOptions,
        priority: i32,
        trigger_id: Option<&str>,
    ) -> Vec<FinishedHandle> {
        let mut selected = select_tasks(&self.manager.task_names(), options.tasks.as_deref());
        selected.sort_by_key(|(name, _)| self.manager.task_priority(name));

        let mut handles = Vec::with_capacity(selected.len());
        for (name, exact) in selected {
            let task_options = TaskOptions::new()
                .with_test(options.test)
                .with_learn(options.learn)
                .with_inject(options.inject.clone())
                .with_allow_manual(options.allow_manual && exact)
                .with_scheduled(options.scheduled);
            let (mut job, handle) = Job::new(name, task_options, priority);
            if let Some(id) = trigger_id {
                job = job.with_trigger(id);
            }
            debug!(task = %job.task, priority, "Queuing task");
            self.queue.push(job).await;
            handles.push(handle);
        }
        handles
    }

    /// Queue every due trigger and schedule its next run.
    ///
    /// A trigger whose previous job is still waiting is not queued again but
    /// still advances.
    pub async fn queue_due_triggers(&self, now: DateTime<Utc>) {
        let mut triggers = self.triggers.lock().await;
        for trigger in triggers.iter_mut() {
            if !trigger.should_run(now) {
                continue;
            }
            if self.queue.contains_trigger(trigger.uid()).await {
                warn!(trigger = %trigger, "Not queuing tasks, the previous run of this trigger is still queued");
            } else {
                let options = ExecuteOptions::new()
                    .with_tasks(trigger.tasks().to_vec())
                    .scheduled();
                self.execute(options, TRIGGER_PRIORITY, Some(trigger.uid())).await;
            }
            if let Err(e) = trigger.trigger(self.store.as_ref(), now).await {
                warn!(trigger = %trigger, error = %e, "Cannot store last run of trigger");
            }
        }
    }

    /// Ask the loop to stop; with `finish_queue` queued jobs run first.
    pub fn request_shutdown(&self, finish_queue: bool) {
        self.finish_queue.store(finish_queue, Ordering::SeqCst);
        self.stop.cancel();
    }

    /// Run until `shutdown` is cancelled or [`Scheduler::request_shutdown`] is called.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Scheduler starting");
        self.fire(FlexgetEvent::SchedulerStarted);

        let mut announced = false;
        loop {
            if shutdown.is_cancelled() && !self.stop.is_cancelled() {
                self.request_shutdown(self.config.shutdown_mode == ShutdownMode::Drain);
            }
            if self.stop.is_cancelled() {
                let pending = self.queue.len().await;
                if !self.finish_queue.load(Ordering::SeqCst) || pending == 0 {
                    break;
                }
                if !announced {
                    warn!(pending, "Shutdown requested, finishing queued jobs first");
                    announced = true;
                }
            } else {
                self.refresh_triggers().await;
                self.queue_due_triggers(Utc::now()).await;
            }

            if let Some(job) = self.queue.pop(self.config.poll_interval).await {
                self.run_job(job).await;
            }
        }

        let remaining = self.queue.drain().await.len();
        if remaining > 0 {
            warn!(remaining, "Scheduler stopped with jobs still queued");
        }
        info!("Scheduler stopped");
        self.fire(FlexgetEvent::SchedulerStopped { remaining });
    }

    async fn run_job(&self, mut job: Job) {
        let manager = self.manager.clone();
        let task = job.task.clone();
        let options = std::mem::take(&mut job.options);
        info!(task = %task, scheduled = options.scheduled, "Running task");

        let outcome = match tokio::spawn(async move { manager.execute_task(&task, options).await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(task = %job.task, error = %e, "Cannot run task");
                TaskOutcome::aborted(&job.task, e.to_string())
            }
            Err(e) => {
                error!(task = %job.task, error = %e, "BUG: Task run crashed");
                TaskOutcome::aborted(&job.task, format!("BUG: task run crashed: {}", e))
            }
        };
        job.finish(outcome);
    }

    fn fire(&self, event: FlexgetEvent) {
        if let Err(e) = self.manager.events().fire(event) {
            warn!(error = %e, "Event handler failed");
        }
    }
}

/// Case-insensitive shell-style pattern (`*`, `?`, `[...]`)
fn glob_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    class.push(c);
                }
                if !closed {
                    expr.push_str(&regex::escape(&format!("[{}", class)));
                } else if let Some(rest) = class.strip_prefix('!') {
                    expr.push_str(&format!("[^{}]", rest));
                } else {
                    expr.push_str(&format!("[{}]", class));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    RegexBuilder::new(&expr).case_insensitive(true).build().ok()
}

/// Tasks matched by `patterns`, in pattern order, each once.
///
/// The flag is true when the task was named exactly.
fn select_tasks(names: &[String], patterns: Option<&[String]>) -> Vec<(String, bool)> {
    let Some(patterns) = patterns else {
        return names.iter().map(|n| (n.clone(), false)).collect();
    };
    let mut selected: Vec<(String, bool)> = Vec::new();
    for pattern in patterns {
        let matches: Vec<&String> = match names.iter().find(|n| n.eq_ignore_ascii_case(pattern)) {
            Some(exact) => vec![exact],
            None => match glob_regex(pattern) {
                Some(re) => names.iter().filter(|n| re.is_match(n)).collect(),
                None => Vec::new(),
            },
        };
        if matches.is_empty() {
            warn!(pattern = %pattern, "No task matches");
        }
        let exact = !pattern.contains(['*', '?', '[']);
        for name in matches {
            match selected.iter_mut().find(|(n, _)| n == name) {
                Some(existing) => existing.1 |= exact,
                None => selected.push((name.clone(), exact)),
            }
        }
    }
    selected
}

#[cfg(test)]
mod tests;
