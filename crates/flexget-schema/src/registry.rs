//! Schema registry
//!
//! Schemas live under canonical paths such as `/schema/config/<key>`,
//! `/schema/plugin/<name>` or `/schema/plugins`. A path can hold a plain
//! document or a factory that builds the document from the `$ref` query
//! string (`/schema/plugins?phase=input`).

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::error::{Result, SchemaError, ValidationError};
use crate::formats::FormatRegistry;
use crate::messages::apply_custom_messages;
use crate::validator::Validator;

/// JSON-Schema dialect injected into every resolved document
pub const SCHEMA_DIALECT: &str = "http://json-schema.org/draft-04/schema#";

/// Builds a schema from `$ref` query parameters
pub type SchemaFactory = Arc<dyn Fn(&HashMap<String, String>) -> Value + Send + Sync>;

#[derive(Clone)]
enum SchemaSource {
    Document(Arc<Value>),
    Factory(SchemaFactory),
}

#[derive(Default)]
struct RootKeys {
    properties: Map<String, Value>,
    required: Vec<String>,
}

/// Registry of named schemas plus the root config schema
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, SchemaSource>>,
    root: RwLock<RootKeys>,
    formats: FormatRegistry,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("paths", &self.paths())
            .field("formats", &self.formats)
            .finish()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn with_dialect(mut schema: Value) -> Value {
    if let Value::Object(map) = &mut schema {
        map.entry("$schema")
            .or_insert_with(|| Value::String(SCHEMA_DIALECT.to_string()));
    }
    schema
}

impl SchemaRegistry {
    /// Create a registry with the builtin formats
    #[must_use]
    pub fn new() -> Self {
        Self::with_formats(FormatRegistry::new())
    }

    /// Create a registry using the given format checkers
    #[must_use]
    pub fn with_formats(formats: FormatRegistry) -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            root: RwLock::new(RootKeys::default()),
            formats,
        }
    }

    /// Format checkers used by `format` keywords
    #[must_use]
    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    /// Register a schema document. An existing registration under the same
    /// path is replaced.
    pub fn register_schema(&self, path: impl Into<String>, schema: Value) {
        self.insert(path.into(), SchemaSource::Document(Arc::new(with_dialect(schema))));
    }

    /// Register a schema factory called with the `$ref` query parameters.
    pub fn register_schema_factory<F>(&self, path: impl Into<String>, factory: F)
    where
        F: Fn(&HashMap<String, String>) -> Value + Send + Sync + 'static,
    {
        self.insert(path.into(), SchemaSource::Factory(Arc::new(factory)));
    }

    fn insert(&self, path: String, source: SchemaSource) {
        if let Ok(mut schemas) = self.schemas.write() {
            if schemas.insert(path.clone(), source).is_some() {
                debug!(path = %path, "Schema re-registered");
            }
        }
    }

    /// Whether anything is registered under `path`
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.schemas
            .read()
            .map(|schemas| schemas.contains_key(path))
            .unwrap_or(false)
    }

    /// Sorted list of registered paths
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .schemas
            .read()
            .map(|schemas| schemas.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Resolve a `$ref` such as `/schema/plugin/regexp` or
    /// `/schema/plugins?phase=filter`.
    pub fn resolve_ref(&self, uri: &str) -> Result<Arc<Value>> {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };
        let source = self
            .schemas
            .read()
            .ok()
            .and_then(|schemas| schemas.get(path).cloned())
            .ok_or_else(|| SchemaError::Unresolvable(uri.to_string()))?;
        match source {
            SchemaSource::Document(schema) => Ok(schema),
            SchemaSource::Factory(factory) => {
                let kwargs: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect();
                Ok(Arc::new(with_dialect(factory(&kwargs))))
            }
        }
    }

    /// Register a root-level config key (e.g. `tasks`, `templates`) and its
    /// schema under `/schema/config/<key>`.
    pub fn register_config_key(&self, key: &str, schema: Value, required: bool) {
        self.register_schema(format!("/schema/config/{}", key), schema.clone());
        if let Ok(mut root) = self.root.write() {
            root.properties.insert(key.to_string(), schema);
            if required && !root.required.iter().any(|k| k == key) {
                root.required.push(key.to_string());
            } else if !required {
                root.required.retain(|k| k != key);
            }
        }
    }

    /// The schema of the whole config file
    #[must_use]
    pub fn root_config_schema(&self) -> Value {
        let (properties, required) = self
            .root
            .read()
            .map(|root| (root.properties.clone(), root.required.clone()))
            .unwrap_or_default();
        json!({
            "$schema": SCHEMA_DIALECT,
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Validate `config` against `schema`, optionally filling `default`s.
    ///
    /// Returns every validation error found. `Err` is reserved for broken
    /// schemas (unresolvable `$ref`, invalid regex).
    pub fn process_config(
        &self,
        config: &mut Value,
        schema: &Value,
        set_defaults: bool,
    ) -> Result<Vec<ValidationError>> {
        let validator = Validator::new(self, set_defaults);
        let mut errors = validator.validate(config, schema, schema)?;
        apply_custom_messages(&mut errors);
        Ok(errors)
    }

    /// Validate without modifying the instance
    pub fn validate(&self, instance: &Value, schema: &Value) -> Result<Vec<ValidationError>> {
        let mut copy = instance.clone();
        self.process_config(&mut copy, schema, false)
    }
}
