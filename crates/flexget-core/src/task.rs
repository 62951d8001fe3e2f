//! Task - one configured pipeline run
//!
//! A [`Task`] owns its config and entries for the duration of a run and is
//! handed to every plugin handler. Execution lives in `runner.rs`.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::entry::{Entry, EntryScope, EntryState};
use crate::error::PluginError;
use crate::manager::Manager;
use crate::plugin::Phase;

mod runner;

/// Rerun limit when the `max_reruns` plugin is not configured
pub const DEFAULT_MAX_RERUNS: u32 = 5;

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Test mode: the learn phase is skipped
    pub test: bool,
    /// Learn mode: download and output are skipped
    pub learn: bool,
    /// Entries to use instead of running the input phase
    pub inject: Vec<Entry>,
    /// The task was requested by its exact name (allows `manual` tasks)
    pub allow_manual: bool,
    /// Started by a schedule rather than a user
    pub scheduled: bool,
    /// Phases to skip entirely
    pub disable_phases: Vec<Phase>,
}

impl TaskOptions {
    /// Create default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

    /// Mark the task as explicitly requested
    #[must_use]
    pub fn with_allow_manual(mut self, allow: bool) -> Self {
        self.allow_manual = allow;
        self
    }

    /// Mark the run as started by a schedule
    #[must_use]
    pub fn with_scheduled(mut self, scheduled: bool) -> Self {
        self.scheduled = scheduled;
        self
    }

    /// Skip a phase
    #[must_use]
    pub fn with_disabled_phase(mut self, phase: Phase) -> Self {
        self.disable_phases.push(phase);
        self
    }
}

/// Why and how a task stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortInfo {
    /// Abort reason
    pub reason: String,
    /// Logged at debug level only
    pub silent: bool,
    /// Plugin that aborted, if any
    pub plugin: Option<String>,
}

/// Summary of a task run
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    /// Task name
    pub task: String,
    /// Run identifier
    pub run_id: Uuid,
    /// Accepted entries in the final pass
    pub accepted: usize,
    /// Rejected entries in the final pass
    pub rejected: usize,
    /// Failed entries in the final pass
    pub failed: usize,
    /// Undecided entries in the final pass
    pub undecided: usize,
    /// Set when the task aborted
    pub abort: Option<AbortInfo>,
    /// Number of reruns performed
    pub rerun_count: u32,
}

impl TaskOutcome {
    /// Outcome of a task that aborted before running any phase
    #[must_use]
    pub fn aborted(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            run_id: Uuid::new_v4(),
            accepted: 0,
            rejected: 0,
            failed: 0,
            undecided: 0,
            abort: Some(AbortInfo {
                reason: reason.into(),
                silent: false,
                plugin: None,
            }),
            rerun_count: 0,
        }
    }

    /// Whether the run aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    /// Turn a non-silent abort into an error
    pub fn check(&self) -> Result<(), TaskError> {
        match &self.abort {
            Some(abort) if !abort.silent => Err(TaskError::Aborted {
                task: self.task.clone(),
                reason: abort.reason.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Task run errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task aborted
    #[error("task `{task}` aborted: {reason}")]
    Aborted {
        /// Task name
        task: String,
        /// Abort reason
        reason: String,
    },
}

/// A task being executed
pub struct Task {
    name: String,
    manager: Arc<Manager>,
    options: TaskOptions,
    config: Map<String, Value>,
    scope: Arc<EntryScope>,
    entries: Vec<Entry>,
    disabled_plugins: HashSet<String>,
    builtins_disabled: bool,
    rerun_reason: Option<String>,
    rerun_count: u32,
    max_reruns: u32,
    abort: Option<AbortInfo>,
    current_phase: Option<Phase>,
    current_plugin: Option<String>,
    run_id: Uuid,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("entries", &self.entries.len())
            .field("rerun_count", &self.rerun_count)
            .field("abort", &self.abort)
            .finish()
    }
}

impl Task {
    /// Create a task run from its (unprepared) config
    #[must_use]
    pub fn new(
        manager: Arc<Manager>,
        name: impl Into<String>,
        config: Map<String, Value>,
        options: TaskOptions,
    ) -> Self {
        let name = name.into();
        let scope = Arc::new(EntryScope::new(name.clone()));
        manager.register_lookups(&scope.lookups);
        Self {
            name,
            manager,
            options,
            config,
            scope,
            entries: Vec::new(),
            disabled_plugins: HashSet::new(),
            builtins_disabled: false,
            rerun_reason: None,
            rerun_count: 0,
            max_reruns: DEFAULT_MAX_RERUNS,
            abort: None,
            current_phase: None,
            current_plugin: None,
            run_id: Uuid::new_v4(),
        }
    }

    /// Task name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared manager
    #[must_use]
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Run options
    #[must_use]
    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    /// Run identifier
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Task config; fully validated and defaulted once prepare is over
    #[must_use]
    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Mutable task config, meant for prepare-phase plugins
    pub fn config_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.config
    }

    /// Scope shared by the entries of this run
    #[must_use]
    pub fn scope(&self) -> &Arc<EntryScope> {
        &self.scope
    }

    /// Phase currently running
    #[must_use]
    pub fn current_phase(&self) -> Option<Phase> {
        self.current_phase
    }

    /// Plugin currently running
    #[must_use]
    pub fn current_plugin(&self) -> Option<&str> {
        self.current_plugin.as_deref()
    }

    /// Every entry of the current pass
    #[must_use]
    pub fn all_entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Every entry of the current pass, mutably
    pub fn all_entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    /// Undecided and accepted entries
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.state(), EntryState::Undecided | EntryState::Accepted))
    }

    /// Undecided and accepted entries, mutably
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries
            .iter_mut()
            .filter(|e| matches!(e.state(), EntryState::Undecided | EntryState::Accepted))
    }

    /// Accepted entries
    pub fn accepted(&self) -> impl Iterator<Item = &Entry> {
        self.in_state(EntryState::Accepted)
    }

    /// Accepted entries, mutably
    pub fn accepted_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut().filter(|e| e.is_accepted())
    }

    /// Rejected entries
    pub fn rejected(&self) -> impl Iterator<Item = &Entry> {
        self.in_state(EntryState::Rejected)
    }

    /// Failed entries
    pub fn failed(&self) -> impl Iterator<Item = &Entry> {
        self.in_state(EntryState::Failed)
    }

    /// Undecided entries
    pub fn undecided(&self) -> impl Iterator<Item = &Entry> {
        self.in_state(EntryState::Undecided)
    }

    /// Undecided entries, mutably
    pub fn undecided_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut().filter(|e| e.is_undecided())
    }

    fn in_state(&self, state: EntryState) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(move |e| e.state() == state)
    }

    /// Abort the task. Return the result from the handler:
    /// `return Err(task.abort("reason", false));`
    pub fn abort(&mut self, reason: impl Into<String>, silent: bool) -> PluginError {
        let reason = reason.into();
        if self.abort.is_none() {
            self.abort = Some(AbortInfo {
                reason: reason.clone(),
                silent,
                plugin: self.current_plugin.clone(),
            });
        }
        PluginError::Abort { reason, silent }
    }

    /// Whether the task has aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    /// Abort details
    #[must_use]
    pub fn abort_info(&self) -> Option<&AbortInfo> {
        self.abort.as_ref()
    }

    /// Request another pass once this one ends
    pub fn rerun(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(task = %self.name, reason = %reason, "Rerun requested");
        self.rerun_reason = Some(reason);
    }

    /// Whether this pass is a rerun
    #[must_use]
    pub fn is_rerun(&self) -> bool {
        self.rerun_count > 0
    }

    /// Reruns performed so far
    #[must_use]
    pub fn rerun_count(&self) -> u32 {
        self.rerun_count
    }

    /// Rerun limit
    #[must_use]
    pub fn max_reruns(&self) -> u32 {
        self.max_reruns
    }

    /// Set the rerun limit
    pub fn set_max_reruns(&mut self, max_reruns: u32) {
        self.max_reruns = max_reruns;
    }

    /// Disable a plugin for the rest of this run
    pub fn disable_plugin(&mut self, name: impl Into<String>) {
        self.disabled_plugins.insert(name.into());
    }

    /// Disable every builtin plugin for the rest of this run
    pub fn disable_builtins(&mut self) {
        self.builtins_disabled = true;
    }

    /// Whether `name` was disabled for this run
    #[must_use]
    pub fn is_plugin_disabled(&self, name: &str) -> bool {
        self.disabled_plugins.contains(name)
    }

    /// Snapshot of the run
    #[must_use]
    pub fn outcome(&self) -> TaskOutcome {
        TaskOutcome {
            task: self.name.clone(),
            run_id: self.run_id,
            accepted: self.accepted().count(),
            rejected: self.rejected().count(),
            failed: self.failed().count(),
            undecided: self.undecided().count(),
            abort: self.abort.clone(),
            rerun_count: self.rerun_count,
        }
    }
}
