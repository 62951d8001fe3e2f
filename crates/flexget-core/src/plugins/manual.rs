//! Manual plugin: the task only runs when requested by name

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::entry::is_truthy;
use crate::error::PluginResult;
use crate::plugin::{Phase, Plugin, PluginDefinition};
use crate::task::Task;

/// Manual plugin
pub struct ManualPlugin {
    definition: PluginDefinition,
}

impl ManualPlugin {
    /// Create a new manual plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("manual")
            .with_phase_priority(Phase::Start, 255)
            .with_schema(json!({"type": "boolean"}));
        Self { definition }
    }
}

impl Default for ManualPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ManualPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_start(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        if !is_truthy(config) || task.options().allow_manual {
            return Ok(());
        }
        debug!(task = %task.name(), "Task can only run in manual mode");
        Err(task.abort("manual task not specified in --tasks", true))
    }
}
