//! FlexGet Core - Task Pipeline and Scheduler
//!
//! This crate provides the runtime of FlexGet:
//! - Entry: candidate items and their accept/reject/fail state machine
//! - Plugin: the phase handler contract and the plugin registry
//! - Task: the phase pipeline, reruns and aborts
//! - Plugins: builtin config composition, run control and test plugins
//! - Scheduler: interval and cron triggers feeding a priority job queue
//! - Manager: the process-wide context tying it all together

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod entry;
pub mod error;
pub mod event_bus;
pub mod manager;
pub mod plugin;
pub mod plugins;
pub mod scheduler;
pub mod task;

pub use config::{merge_dict, MergeError};
pub use entry::{Entry, EntryScope, EntryState, LazyField, LazyLookupRegistry};
pub use error::{EntryError, Error, PluginError, PluginResult, Result};
pub use event_bus::{EventBus, FlexgetEvent};
pub use manager::Manager;
pub use plugin::{Phase, Plugin, PluginDefinition, PluginRegistry};
pub use scheduler::{
    ExecuteOptions, FinishedHandle, MemoryTriggerStore, Scheduler, SchedulerConfig,
    SchedulerError, ShutdownMode, SqliteTriggerStore, Trigger, TriggerStore,
};
pub use task::{AbortInfo, Task, TaskError, TaskOptions, TaskOutcome};
