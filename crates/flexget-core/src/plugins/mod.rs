//! Builtin plugins
//!
//! Config composition:
//! - template: merge named templates (and `global`) into the task
//! - include: merge YAML files into the task
//! - disable: turn plugins off for a run
//!
//! Run control: manual, max_reruns, priority.
//! Entries: mock, mock_output, accept_all, regexp, quality.

mod disable;
mod filters;
mod include;
mod manual;
mod mock;
mod run_control;
mod template;

pub use disable::DisablePlugin;
pub use filters::{AcceptAllPlugin, QualityPlugin, RegexpPlugin};
pub use include::IncludePlugin;
pub use manual::ManualPlugin;
pub use mock::{mock_output_entries, MockOutputPlugin, MockPlugin};
pub use run_control::{MaxRerunsPlugin, PriorityPlugin, DEFAULT_TASK_PRIORITY};
pub use template::TemplatePlugin;

use crate::plugin::PluginRegistry;
use std::sync::Arc;

/// Register all builtin plugins with the registry
pub fn register_builtins(registry: &mut PluginRegistry) {
    // Config composition
    registry.register(Arc::new(TemplatePlugin::new()));
    registry.register(Arc::new(IncludePlugin::new()));
    registry.register(Arc::new(DisablePlugin::new()));

    // Run control
    registry.register(Arc::new(ManualPlugin::new()));
    registry.register(Arc::new(MaxRerunsPlugin::new()));
    registry.register(Arc::new(PriorityPlugin::new()));

    // Entries
    registry.register(Arc::new(MockPlugin::new()));
    registry.register(Arc::new(AcceptAllPlugin::new()));
    registry.register(Arc::new(RegexpPlugin::new()));
    registry.register(Arc::new(QualityPlugin::new()));
    registry.register(Arc::new(MockOutputPlugin::new()));
}
