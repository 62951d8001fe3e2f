//! Mock input and output, used by tests and for trying configs out

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::entry::Entry;
use crate::error::PluginResult;
use crate::manager::Manager;
use crate::plugin::{Phase, Plugin, PluginDefinition};
use crate::task::Task;

const MOCK_OUTPUT_KEY: &str = "mock_output";

/// Emits entries straight from its config
pub struct MockPlugin {
    definition: PluginDefinition,
}

impl MockPlugin {
    /// Create a new mock plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("mock")
            .with_phase(Phase::Input)
            .with_schema(json!({
                "type": "array",
                "items": {
                    "oneOf": [
                        {"type": "string"},
                        {
                            "type": "object",
                            "properties": {
                                "title": {"type": "string"},
                                "url": {"type": "string"}
                            }
                        }
                    ]
                }
            }));
        Self { definition }
    }
}

impl Default for MockPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn mock_entry(item: &Value) -> Entry {
    let mut draft = Entry::new();
    match item {
        Value::String(title) => draft.set("title", Value::String(title.clone())),
        Value::Object(fields) => {
            for (key, value) in fields {
                draft.set(key, value.clone());
            }
        }
        _ => {}
    }
    if draft.peek_str("title").is_none() {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        draft.set("title", Value::String(format!("mock-{}", suffix)));
    }

    // string fields may reference each other: `url: http://x/{title}.torrent`
    let mut entry = Entry::new();
    for (key, value) in draft.fields() {
        if key.starts_with("original_") {
            continue;
        }
        let value = match value.as_str() {
            Some(text) if text.contains('{') => Value::String(draft.render(text)),
            _ => value.clone(),
        };
        entry.set(key, value);
    }
    if entry.peek_str("url").is_none() {
        let url = entry.render("mock://localhost/mock/{title}").replace(' ', "%20");
        entry.set("url", Value::String(url));
    }
    entry
}

#[async_trait]
impl Plugin for MockPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_input(&self, task: &mut Task, config: &Value) -> PluginResult<Vec<Entry>> {
        let entries: Vec<Entry> = config
            .as_array()
            .map(|items| items.iter().map(mock_entry).collect())
            .unwrap_or_default();
        debug!(task = %task.name(), count = entries.len(), "Mock entries created");
        Ok(entries)
    }
}

/// Records accepted entries in the persistent task state.
///
/// The record is cleared when a run starts and kept across reruns.
pub struct MockOutputPlugin {
    definition: PluginDefinition,
}

impl MockOutputPlugin {
    /// Create a new mock_output plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("mock_output")
            .with_phase(Phase::Start)
            .with_phase(Phase::Output)
            .with_schema(json!({"type": "boolean"}));
        Self { definition }
    }
}

impl Default for MockOutputPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for MockOutputPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_start(&self, task: &mut Task, _config: &Value) -> PluginResult<()> {
        task.manager().with_task_state(task.name(), |state| {
            state.insert(MOCK_OUTPUT_KEY.to_string(), Value::Array(Vec::new()));
        });
        Ok(())
    }

    async fn on_task_output(&self, task: &mut Task, _config: &Value) -> PluginResult<()> {
        let mut accepted = Vec::new();
        for entry in task.accepted() {
            match serde_json::to_value(entry.serialize()) {
                Ok(value) => accepted.push(value),
                Err(e) => warn!(task = %task.name(), entry = %entry, error = %e, "Cannot record entry"),
            }
        }
        debug!(task = %task.name(), count = accepted.len(), "Recording accepted entries");
        task.manager().with_task_state(task.name(), |state| {
            match state
                .entry(MOCK_OUTPUT_KEY.to_string())
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(recorded) => recorded.extend(accepted),
                other => *other = Value::Array(accepted),
            }
        });
        Ok(())
    }
}

/// Entries recorded by `mock_output` for `task`
#[must_use]
pub fn mock_output_entries(manager: &Manager, task: &str) -> Vec<Entry> {
    manager.with_task_state(task, |state| {
        state
            .get(MOCK_OUTPUT_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| Entry::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_entry_from_string() {
        let entry = mock_entry(&json!("Some.Show.S01E01"));
        assert_eq!(entry.peek_str("title"), Some("Some.Show.S01E01"));
        assert_eq!(entry.peek_str("url"), Some("mock://localhost/mock/Some.Show.S01E01"));
        assert!(entry.is_valid());
    }

    #[test]
    fn test_mock_entry_generates_title() {
        let entry = mock_entry(&json!({"url": "http://x/a"}));
        assert!(entry.peek_str("title").is_some_and(|t| t.starts_with("mock-")));
        assert_eq!(entry.peek_str("url"), Some("http://x/a"));
    }

    #[test]
    fn test_mock_entry_renders_fields() {
        let entry = mock_entry(&json!({"title": "abc", "url": "http://x/{title}.torrent", "size": 5}));
        assert_eq!(entry.peek_str("url"), Some("http://x/abc.torrent"));
        assert_eq!(entry.peek("size"), Some(&json!(5)));
    }
}
