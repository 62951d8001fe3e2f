//! Plugin contract and registry
//!
//! A plugin declares the phases it takes part in (with a priority for each)
//! and the schema of its config key. The registry is built once at startup
//! and is read-only afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use flexget_schema::SchemaRegistry;

use crate::entry::Entry;
use crate::error::PluginResult;
use crate::task::Task;

/// Priority used when a plugin does not ask for one
pub const DEFAULT_PRIORITY: i32 = 128;

/// Plugin API version understood by this core
pub const API_VERSION: u32 = 2;

/// Task phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Config mutation before anything else
    Prepare,
    /// Run-level setup
    Start,
    /// Produce entries
    Input,
    /// Cheap enrichment before filtering
    Metainfo,
    /// Accept / reject decisions
    Filter,
    /// Fetch content for accepted entries
    Download,
    /// Transform surviving entries
    Modify,
    /// Side effects for accepted entries
    Output,
    /// Remember what was processed
    Learn,
    /// Normal cleanup
    Exit,
    /// Cleanup after an abort
    Abort,
}

impl Phase {
    /// Phases of a normal run; `Abort` replaces `Exit` after an abort
    pub const PIPELINE: [Phase; 10] = [
        Phase::Prepare,
        Phase::Start,
        Phase::Input,
        Phase::Metainfo,
        Phase::Filter,
        Phase::Download,
        Phase::Modify,
        Phase::Output,
        Phase::Learn,
        Phase::Exit,
    ];

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Start => "start",
            Self::Input => "input",
            Self::Metainfo => "metainfo",
            Self::Filter => "filter",
            Self::Download => "download",
            Self::Modify => "modify",
            Self::Output => "output",
            Self::Learn => "learn",
            Self::Exit => "exit",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix("task_").unwrap_or(s);
        Phase::PIPELINE
            .iter()
            .chain(std::iter::once(&Phase::Abort))
            .find(|p| p.as_str() == name)
            .copied()
            .ok_or_else(|| format!("unknown phase `{}`", s))
    }
}

/// Plugin metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDefinition {
    /// Unique plugin name, also its config key
    pub name: String,
    /// Config shape version
    pub api_ver: u32,
    /// Interfaces implemented (`task`, `search`, ...)
    pub interfaces: Vec<String>,
    /// Runs on every task unless disabled
    pub builtin: bool,
    /// Phases handled, with their priority
    pub phases: BTreeMap<Phase, i32>,
    /// Schema of the config value
    pub schema: Option<Value>,
}

impl PluginDefinition {
    /// Create a new plugin definition
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_ver: API_VERSION,
            interfaces: vec!["task".to_string()],
            builtin: false,
            phases: BTreeMap::new(),
            schema: None,
        }
    }

    /// Handle `phase` at the default priority
    #[must_use]
    pub fn with_phase(self, phase: Phase) -> Self {
        self.with_phase_priority(phase, DEFAULT_PRIORITY)
    }

    /// Handle `phase` at `priority` (higher runs earlier)
    #[must_use]
    pub fn with_phase_priority(mut self, phase: Phase, priority: i32) -> Self {
        self.phases.insert(phase, priority);
        self
    }

    /// Set the config schema
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Mark as builtin
    #[must_use]
    pub fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }

    /// Add an implemented interface
    #[must_use]
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        let interface = interface.into();
        if !self.interfaces.contains(&interface) {
            self.interfaces.push(interface);
        }
        self
    }

    /// Set the api version
    #[must_use]
    pub fn with_api_ver(mut self, api_ver: u32) -> Self {
        self.api_ver = api_ver;
        self
    }

    /// Priority for `phase`, if handled
    #[must_use]
    pub fn priority(&self, phase: Phase) -> Option<i32> {
        self.phases.get(&phase).copied()
    }
}

/// A task plugin.
///
/// Handlers receive the validated, defaulted value of the plugin's own
/// config key. Only phases listed in the definition are ever called.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Get the plugin definition
    fn definition(&self) -> &PluginDefinition;

    /// Prepare phase
    async fn on_task_prepare(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Start phase
    async fn on_task_start(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Input phase: return new entries
    async fn on_task_input(&self, _task: &mut Task, _config: &Value) -> PluginResult<Vec<Entry>> {
        Ok(Vec::new())
    }

    /// Metainfo phase
    async fn on_task_metainfo(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Filter phase
    async fn on_task_filter(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Download phase
    async fn on_task_download(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Modify phase
    async fn on_task_modify(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Output phase
    async fn on_task_output(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Learn phase
    async fn on_task_learn(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Exit phase
    async fn on_task_exit(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }

    /// Abort phase
    async fn on_task_abort(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        Ok(())
    }
}

/// Call the handler of `plugin` for `phase`; only input returns entries.
pub(crate) async fn call_phase(
    plugin: &dyn Plugin,
    phase: Phase,
    task: &mut Task,
    config: &Value,
) -> PluginResult<Vec<Entry>> {
    match phase {
        Phase::Prepare => plugin.on_task_prepare(task, config).await?,
        Phase::Start => plugin.on_task_start(task, config).await?,
        Phase::Input => return plugin.on_task_input(task, config).await,
        Phase::Metainfo => plugin.on_task_metainfo(task, config).await?,
        Phase::Filter => plugin.on_task_filter(task, config).await?,
        Phase::Download => plugin.on_task_download(task, config).await?,
        Phase::Modify => plugin.on_task_modify(task, config).await?,
        Phase::Output => plugin.on_task_output(task, config).await?,
        Phase::Learn => plugin.on_task_learn(task, config).await?,
        Phase::Exit => plugin.on_task_exit(task, config).await?,
        Phase::Abort => plugin.on_task_abort(task, config).await?,
    }
    Ok(Vec::new())
}

/// Registry of all plugins
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin; a plugin with the same name is replaced in place
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.definition().name.clone();
        debug!(plugin = %name, "Registering plugin");
        if let Some(&slot) = self.index.get(&name) {
            warn!(plugin = %name, "Plugin registered twice, replacing");
            self.plugins[slot] = plugin;
            return;
        }
        self.index.insert(name, self.plugins.len());
        self.plugins.push(plugin);
    }

    /// Get a plugin by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.index.get(name).map(|&i| self.plugins[i].clone())
    }

    /// Check if a plugin exists
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Plugin names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.plugins
            .iter()
            .map(|p| p.definition().name.clone())
            .collect()
    }

    /// Get plugin count
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins handling `phase`, highest priority first, ties in
    /// registration order
    #[must_use]
    pub fn for_phase(&self, phase: Phase) -> Vec<Arc<dyn Plugin>> {
        let mut handlers: Vec<(i32, usize, Arc<dyn Plugin>)> = self
            .plugins
            .iter()
            .enumerate()
            .filter_map(|(order, plugin)| {
                plugin
                    .definition()
                    .priority(phase)
                    .map(|priority| (priority, order, plugin.clone()))
            })
            .collect();
        handlers.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        handlers.into_iter().map(|(_, _, plugin)| plugin).collect()
    }

    /// Register `/schema/plugin/<name>` for every plugin with a schema and
    /// the `/schema/plugins` factory describing a whole task config.
    ///
    /// The factory accepts `phase` and `interface` query parameters to
    /// restrict the allowed keys.
    pub fn register_schemas(&self, schemas: &SchemaRegistry) {
        let mut catalog = Vec::new();
        for plugin in &self.plugins {
            let def = plugin.definition();
            if let Some(schema) = &def.schema {
                schemas.register_schema(format!("/schema/plugin/{}", def.name), schema.clone());
                catalog.push(def.clone());
            }
        }
        let catalog = Arc::new(catalog);
        schemas.register_schema_factory("/schema/plugins", move |kwargs| {
            plugins_schema(&catalog, kwargs)
        });
    }
}

fn plugins_schema(catalog: &[PluginDefinition], kwargs: &HashMap<String, String>) -> Value {
    let phase = kwargs.get("phase").and_then(|p| p.parse::<Phase>().ok());
    let interface = kwargs.get("interface");
    let mut properties = Map::new();
    for def in catalog {
        if phase.is_some_and(|p| def.priority(p).is_none()) {
            continue;
        }
        if interface.is_some_and(|i| !def.interfaces.contains(i)) {
            continue;
        }
        properties.insert(
            def.name.clone(),
            json!({"$ref": format!("/schema/plugin/{}", def.name)}),
        );
    }
    json!({
        "type": "object",
        "properties": properties,
        "patternProperties": {"^_": {"title": "Disabled Plugin"}},
        "additionalProperties": false,
        "error_additionalProperties": "{{message}} Only known plugin names are valid keys.",
    })
}
