//! Disable plugin: `disable: [seen, builtins]`

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use flexget_schema::{as_list, one_or_more};

use crate::error::PluginResult;
use crate::plugin::{Phase, Plugin, PluginDefinition};
use crate::task::Task;

/// Disable plugin
pub struct DisablePlugin {
    definition: PluginDefinition,
}

impl DisablePlugin {
    /// Create a new disable plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("disable")
            .with_phase_priority(Phase::Prepare, 250)
            .with_schema(one_or_more(json!({"type": "string"}), false));
        Self { definition }
    }
}

impl Default for DisablePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for DisablePlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_prepare(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        for name in as_list(config).iter().filter_map(Value::as_str) {
            if name == "builtins" {
                debug!(task = %task.name(), "Disabling all builtin plugins");
                task.disable_builtins();
                continue;
            }
            debug!(task = %task.name(), plugin = name, "Disabling plugin");
            task.disable_plugin(name);
            task.config_mut().remove(name);
        }
        Ok(())
    }
}
