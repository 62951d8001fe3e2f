//! Include plugin: merge YAML files into the task config

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{debug, error};

use flexget_schema::{as_list, expand_user, one_or_more};

use crate::config::merge_dict;
use crate::error::{PluginError, PluginResult};
use crate::plugin::{Phase, Plugin, PluginDefinition};
use crate::task::Task;

/// Include plugin
pub struct IncludePlugin {
    definition: PluginDefinition,
}

impl IncludePlugin {
    /// Create a new include plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("include")
            .with_phase_priority(Phase::Prepare, 254)
            .with_schema(one_or_more(json!({"type": "string"}), false));
        Self { definition }
    }
}

impl Default for IncludePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for IncludePlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_prepare(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        for name in as_list(config).iter().filter_map(Value::as_str) {
            let mut file = expand_user(name);
            if file.is_relative() {
                if let Some(base) = task.manager().config_dir() {
                    file = base.join(file);
                }
            }
            let include = read_include(&file).await?;

            let schemas = task.manager().schemas().clone();
            let errors = schemas
                .validate(&Value::Object(include.clone()), &json!({"$ref": "/schema/plugins"}))
                .map_err(anyhow::Error::new)?;
            if !errors.is_empty() {
                error!(task = %task.name(), file = %file.display(), "Included file has invalid config:");
                for err in &errors {
                    error!(task = %task.name(), "[{}] {}", err.json_pointer(), err.message);
                }
                return Err(task.abort(format!("Included file {} has errors.", file.display()), false));
            }

            debug!(task = %task.name(), file = %file.display(), "Merging include into task");
            merge_dict(&include, task.config_mut()).map_err(|e| {
                PluginError::error(format!(
                    "Failed to merge include file to task {}, incompatible datatypes: {}",
                    task.name(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

async fn read_include(file: &Path) -> PluginResult<Map<String, Value>> {
    let text = tokio::fs::read_to_string(file).await.map_err(|e| {
        PluginError::error(format!("Unable to read include file {}: {}", file.display(), e))
    })?;
    match serde_yaml::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(PluginError::error(format!(
            "Include file {} must contain a mapping",
            file.display()
        ))),
        Err(e) => Err(PluginError::error(format!(
            "Include file {} is not valid YAML: {}",
            file.display(),
            e
        ))),
    }
}
