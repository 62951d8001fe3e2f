//! `max_reruns` and `priority`

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::PluginResult;
use crate::plugin::{Phase, Plugin, PluginDefinition};
use crate::task::Task;

/// Batch ordering priority of tasks without a `priority` key
pub const DEFAULT_TASK_PRIORITY: i64 = 65535;

/// Overrides how many times a task may rerun
pub struct MaxRerunsPlugin {
    definition: PluginDefinition,
}

impl MaxRerunsPlugin {
    /// Create a new max_reruns plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("max_reruns")
            .with_phase_priority(Phase::Start, 255)
            .with_schema(json!({"type": "integer", "minimum": 0}));
        Self { definition }
    }
}

impl Default for MaxRerunsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for MaxRerunsPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_start(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        if let Some(limit) = config.as_u64() {
            task.set_max_reruns(u32::try_from(limit).unwrap_or(u32::MAX));
        }
        Ok(())
    }
}

/// Ordering key for batch execution; read by the scheduler, never runs
pub struct PriorityPlugin {
    definition: PluginDefinition,
}

impl PriorityPlugin {
    /// Create a new priority plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("priority").with_schema(json!({"type": "integer"}));
        Self { definition }
    }
}

impl Default for PriorityPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for PriorityPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }
}
