//! Lazy field lookups
//!
//! Expensive enrichment (metadata APIs and the like) is registered on an
//! entry as a [`LazyField`] descriptor and only runs when a later plugin
//! actually reads one of the fields it fills.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::Entry;

/// A pending lazy computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LazyField {
    /// Id of the lookup in the [`LazyLookupRegistry`]
    pub lookup_id: String,
    /// Fields the lookup fills
    pub fields: Vec<String>,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

/// A lookup: receives the entry and the descriptor, returns field values
pub type LookupFn =
    Arc<dyn Fn(&Entry, &LazyField) -> anyhow::Result<Map<String, Value>> + Send + Sync>;

/// Lookup id → closure table owned by a task run
#[derive(Default)]
pub struct LazyLookupRegistry {
    lookups: RwLock<HashMap<String, LookupFn>>,
}

impl std::fmt::Debug for LazyLookupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self
            .lookups
            .read()
            .map(|l| l.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("LazyLookupRegistry").field("ids", &ids).finish()
    }
}

impl LazyLookupRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lookup under `id`, replacing any previous one
    pub fn register<F>(&self, id: impl Into<String>, lookup: F)
    where
        F: Fn(&Entry, &LazyField) -> anyhow::Result<Map<String, Value>> + Send + Sync + 'static,
    {
        if let Ok(mut lookups) = self.lookups.write() {
            lookups.insert(id.into(), Arc::new(lookup));
        }
    }

    /// Fetch a lookup by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<LookupFn> {
        self.lookups.read().ok().and_then(|l| l.get(id).cloned())
    }

    /// Copy every lookup of `other` into this registry
    pub fn extend_from(&self, other: &LazyLookupRegistry) {
        let Ok(source) = other.lookups.read() else {
            return;
        };
        if let Ok(mut lookups) = self.lookups.write() {
            lookups.extend(source.iter().map(|(id, f)| (id.clone(), f.clone())));
        }
    }
}

/// Per-run context shared by every entry of a task
#[derive(Debug, Default)]
pub struct EntryScope {
    /// Task the entries belong to
    pub task: String,
    /// Lazy lookups available to the entries
    pub lookups: LazyLookupRegistry,
    current_plugin: RwLock<Option<String>>,
}

impl EntryScope {
    /// Create a scope for `task`
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            lookups: LazyLookupRegistry::new(),
            current_plugin: RwLock::new(None),
        }
    }

    /// Plugin currently running, recorded in traces
    #[must_use]
    pub fn current_plugin(&self) -> Option<String> {
        self.current_plugin.read().ok().and_then(|p| p.clone())
    }

    /// Set (or clear) the plugin currently running
    pub fn set_current_plugin(&self, plugin: Option<&str>) {
        if let Ok(mut current) = self.current_plugin.write() {
            *current = plugin.map(str::to_string);
        }
    }
}
