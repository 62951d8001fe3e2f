//! Manager - process-wide context
//!
//! Owns the schema and plugin registries, the event bus, the loaded config
//! and the state tasks keep between runs. Constructed once at startup and
//! shared by `Arc`.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tracing::{debug, info, warn};

use flexget_schema::{SchemaRegistry, ValidationError};

use crate::entry::{Entry, LazyField, LazyLookupRegistry};
use crate::error::{Error, Result};
use crate::event_bus::{EventBus, FlexgetEvent};
use crate::plugin::PluginRegistry;
use crate::plugins::{register_builtins, DEFAULT_TASK_PRIORITY};
use crate::scheduler;
use crate::task::{Task, TaskOptions, TaskOutcome};

/// Process-wide context shared by tasks and the scheduler
pub struct Manager {
    schemas: Arc<SchemaRegistry>,
    plugins: PluginRegistry,
    events: EventBus,
    config: RwLock<Arc<Value>>,
    config_path: RwLock<Option<PathBuf>>,
    task_state: Mutex<HashMap<String, Map<String, Value>>>,
    lookups: LazyLookupRegistry,
    registered: OnceLock<()>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("plugins", &self.plugins.names())
            .field("config_path", &self.config_path())
            .finish()
    }
}

impl Manager {
    /// Create a manager around a plugin registry
    #[must_use]
    pub fn new(plugins: PluginRegistry) -> Arc<Self> {
        let schemas = Arc::new(SchemaRegistry::new());
        plugins.register_schemas(&schemas);

        let events = EventBus::default();
        {
            let schemas = schemas.clone();
            events.on("config.register", "core", move |_| {
                let tasks = json!({
                    "type": "object",
                    "additionalProperties": {"$ref": "/schema/plugins"}
                });
                schemas.register_config_key("tasks", tasks.clone(), true);
                schemas.register_config_key("templates", tasks, false);
                Ok(())
            });
        }
        {
            let schemas = schemas.clone();
            events.on("config.register", "scheduler", move |_| {
                scheduler::register_config(&schemas);
                Ok(())
            });
        }

        Arc::new(Self {
            schemas,
            plugins,
            events,
            config: RwLock::new(Arc::new(json!({"tasks": {}}))),
            config_path: RwLock::new(None),
            task_state: Mutex::new(HashMap::new()),
            lookups: LazyLookupRegistry::new(),
            registered: OnceLock::new(),
        })
    }

    /// Create a manager with every builtin plugin registered
    #[must_use]
    pub fn with_builtins() -> Arc<Self> {
        let mut plugins = PluginRegistry::new();
        register_builtins(&mut plugins);
        Self::new(plugins)
    }

    /// Schema registry
    #[must_use]
    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        self.ensure_registered();
        &self.schemas
    }

    /// Plugin registry
    #[must_use]
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Event bus
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Fire `config.register` once, before the config schema is first used
    fn ensure_registered(&self) {
        self.registered.get_or_init(|| {
            if let Err(e) = self.events.fire(FlexgetEvent::ConfigRegister) {
                warn!(error = %e, "Config registration failed");
            }
        });
    }

    /// Schema of the whole config file
    #[must_use]
    pub fn config_schema(&self) -> Value {
        self.schemas().root_config_schema()
    }

    /// Current config
    #[must_use]
    pub fn config(&self) -> Arc<Value> {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// File the config was loaded from
    #[must_use]
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config_path.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Directory relative include paths are resolved against
    #[must_use]
    pub fn config_dir(&self) -> Option<PathBuf> {
        self.config_path()
            .and_then(|p| p.parent().map(Path::to_path_buf))
    }

    /// Validate a whole config; `Err` only for broken schemas
    pub fn validate_config(&self, config: &Value) -> Result<Vec<ValidationError>> {
        let schema = self.config_schema();
        Ok(self.schemas.validate(config, &schema)?)
    }

    /// Validate a whole config, turning validation errors into [`Error::InvalidConfig`]
    pub fn check_config(&self, config: &Value) -> Result<()> {
        let errors = self.validate_config(config)?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig { errors })
        }
    }

    /// Validate and install a config, then fire `config.updated`
    pub fn set_config(&self, config: Value, path: Option<PathBuf>) -> Result<()> {
        self.check_config(&config)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        *self.config_path.write().unwrap_or_else(PoisonError::into_inner) = path.clone();
        info!(path = ?path, tasks = self.task_names().len(), "Config loaded");

        let event = FlexgetEvent::ConfigUpdated {
            path: path.map(|p| p.display().to_string()),
        };
        if let Err(e) = self.events.fire(event) {
            warn!(error = %e, "config.updated handler failed");
        }
        Ok(())
    }

    /// Parse and install a YAML config
    pub fn load_config_str(&self, yaml: &str) -> Result<()> {
        let config: Value = serde_yaml::from_str(yaml)?;
        self.set_config(config, None)
    }

    /// Read, validate and install a YAML config file
    pub async fn load_config_file(&self, path: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(path).await?;
        let config: Value = serde_yaml::from_str(&text)?;
        self.set_config(config, Some(path.to_path_buf()))
    }

    /// Read the config file again; the current config stays on failure
    pub async fn reload_config(&self) -> Result<()> {
        let path = self.config_path().ok_or(Error::NoConfigFile)?;
        match self.load_config_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config reload failed, keeping the current config");
                Err(e)
            }
        }
    }

    /// Names of the configured tasks in config order, skipping `_disabled` ones
    #[must_use]
    pub fn task_names(&self) -> Vec<String> {
        self.config()
            .get("tasks")
            .and_then(Value::as_object)
            .map(|tasks| {
                tasks
                    .keys()
                    .filter(|name| !name.starts_with('_'))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw config of a task
    #[must_use]
    pub fn task_config(&self, name: &str) -> Option<Map<String, Value>> {
        let config = self.config();
        match config.get("tasks").and_then(|t| t.get(name)) {
            Some(Value::Object(task)) => Some(task.clone()),
            Some(Value::Null) => Some(Map::new()),
            _ => None,
        }
    }

    /// Batch ordering priority of a task, lower runs first
    #[must_use]
    pub fn task_priority(&self, name: &str) -> i64 {
        self.task_config(name)
            .and_then(|c| c.get("priority").and_then(Value::as_i64))
            .unwrap_or(DEFAULT_TASK_PRIORITY)
    }

    /// Run a configured task to completion
    pub async fn execute_task(self: &Arc<Self>, name: &str, options: TaskOptions) -> Result<TaskOutcome> {
        let config = self
            .task_config(name)
            .ok_or_else(|| Error::UnknownTask(name.to_string()))?;
        let task = Task::new(self.clone(), name, config, options);
        Ok(task.execute().await)
    }

    /// Access the state a task keeps between runs
    pub fn with_task_state<R>(&self, task: &str, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut state = self.task_state.lock().unwrap_or_else(PoisonError::into_inner);
        f(state.entry(task.to_string()).or_default())
    }

    /// Register a lazy lookup available to every task run
    pub fn register_lookup<F>(&self, id: impl Into<String>, lookup: F)
    where
        F: Fn(&Entry, &LazyField) -> anyhow::Result<Map<String, Value>> + Send + Sync + 'static,
    {
        let id = id.into();
        debug!(lookup = %id, "Registering lazy lookup");
        self.lookups.register(id, lookup);
    }

    /// Copy the registered lookups into a task's registry
    pub fn register_lookups(&self, target: &LazyLookupRegistry) {
        target.extend_from(&self.lookups);
    }
}
