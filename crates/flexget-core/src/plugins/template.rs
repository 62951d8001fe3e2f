//! Template plugin
//!
//! Merges named templates from the root `templates` key into the task
//! config. `global` is applied to every task unless `no_global` is listed;
//! `template: no` turns templates off for the task.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::merge_dict;
use crate::error::{PluginError, PluginResult};
use crate::plugin::{Phase, Plugin, PluginDefinition};
use crate::task::Task;

/// Template plugin
pub struct TemplatePlugin {
    definition: PluginDefinition,
}

impl TemplatePlugin {
    /// Create a new template plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("template")
            .builtin()
            .with_phase_priority(Phase::Prepare, 256)
            .with_schema(json!({
                "oneOf": [
                    {
                        "description": "Apply multiple templates to this task.",
                        "type": "array",
                        "items": {"type": "string"}
                    },
                    {
                        "description": "Apply a single template to this task.",
                        "type": "string"
                    },
                    {
                        "description": "Disable all templates on this task.",
                        "type": "boolean",
                        "enum": [false]
                    }
                ]
            }));
        Self { definition }
    }
}

impl Default for TemplatePlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn template_names(config: &Value) -> Vec<String> {
    match config {
        Value::String(name) => vec![name.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Plugin for TemplatePlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_prepare(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        if config == &Value::Bool(false) {
            return Ok(());
        }

        let mut names = template_names(config);
        if let Some(pos) = names.iter().position(|n| n == "no_global") {
            names.remove(pos);
            names.retain(|n| n != "global");
        } else if !names.iter().any(|n| n == "global") {
            names.push("global".to_string());
        }

        let root = task.manager().config();
        let templates = root
            .get("templates")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut i = 0;
        while i < names.len() {
            let name = names[i].clone();
            i += 1;
            let Some(template) = templates.get(&name) else {
                if name == "global" {
                    continue;
                }
                return Err(PluginError::error(format!(
                    "Unable to find template {} for task {}",
                    name,
                    task.name()
                )));
            };
            let Some(template) = template.as_object() else {
                warn!(task = %task.name(), template = %name, "Template is empty. Nothing to merge.");
                continue;
            };

            let mut template = template.clone();
            if let Some(nested) = template.remove("template") {
                for nested_name in template_names(&nested) {
                    if names.contains(&nested_name) {
                        warn!(task = %task.name(), template = %nested_name, "Templates contain each other in a loop.");
                    } else {
                        names.push(nested_name);
                    }
                }
            }

            debug!(task = %task.name(), template = %name, "Merging template into task");
            merge_dict(&template, task.config_mut()).map_err(|e| {
                PluginError::error(format!(
                    "Failed to merge template {} to task {}. Error: {}",
                    name,
                    task.name(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}
