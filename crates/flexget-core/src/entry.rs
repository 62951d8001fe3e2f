//! Entry - one candidate item flowing through a task
//!
//! An entry is an ordered mapping of fields plus a decision state. State only
//! moves forward within a run: `Undecided` becomes one of `Accepted`,
//! `Rejected` or `Failed`; the one allowed late change is a plugin rejecting
//! an accepted entry.

mod lazy;

pub use lazy::{EntryScope, LazyField, LazyLookupRegistry, LookupFn};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

use crate::error::EntryError;

/// Decision state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// No plugin decided yet
    #[default]
    Undecided,
    /// Accepted for output
    Accepted,
    /// Rejected by a filter
    Rejected,
    /// Failed during processing
    Failed,
}

impl EntryState {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation recorded by a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceOperation {
    /// Entry accepted
    Accept,
    /// Entry rejected
    Reject,
    /// Entry failed
    Fail,
}

impl FromStr for TraceOperation {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            "fail" => Ok(Self::Fail),
            other => Err(EntryError::InvalidOperation(other.to_string())),
        }
    }
}

/// One record of an entry's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Plugin that was running, if any
    pub plugin: Option<String>,
    /// Decision recorded, if any
    pub operation: Option<TraceOperation>,
    /// Free text
    pub message: String,
}

/// Hook trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookAction {
    /// Entry accepted
    Accept,
    /// Entry rejected
    Reject,
    /// Entry failed
    Fail,
    /// Task run finished with the entry
    Complete,
}

impl FromStr for HookAction {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            "fail" => Ok(Self::Fail),
            "complete" => Ok(Self::Complete),
            other => Err(EntryError::InvalidHookAction(other.to_string())),
        }
    }
}

/// Arguments passed to a hook
#[derive(Debug, Clone, PartialEq)]
pub struct HookContext {
    /// Action that fired
    pub action: HookAction,
    /// Reason given to accept/reject/fail
    pub reason: Option<String>,
    /// Bound kwargs merged with call kwargs (call wins)
    pub kwargs: Map<String, Value>,
}

/// Hook callable
pub type HookFn = Arc<dyn Fn(&Entry, &HookContext) + Send + Sync>;

#[derive(Clone)]
struct Hook {
    func: HookFn,
    kwargs: Map<String, Value>,
}

/// Where [`Entry::update_using_map`] reads a field from
#[derive(Clone)]
pub enum FieldSource {
    /// Dotted path into the source (`info.year`, `files.0.name`)
    Path(String),
    /// Computed from the source
    Func(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
}

impl FieldSource {
    /// Dotted path source
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    fn resolve(&self, source: &Value) -> Value {
        match self {
            Self::Path(path) => {
                let mut current = source;
                for part in path.split('.') {
                    let next = match current {
                        Value::Object(map) => map.get(part),
                        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
                        _ => None,
                    };
                    match next {
                        Some(value) => current = value,
                        None => return Value::Null,
                    }
                }
                current.clone()
            }
            Self::Func(func) => func(source),
        }
    }
}

/// Serialized form of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEntry {
    /// Concrete fields (underscore-prefixed fields are dropped)
    pub fields: Map<String, Value>,
    /// Lazy lookups that have not run yet
    #[serde(default)]
    pub lazy_fields: Vec<LazyField>,
}

/// A candidate item
#[derive(Clone, Default)]
pub struct Entry {
    fields: Map<String, Value>,
    state: EntryState,
    reason: Option<String>,
    traces: Vec<TraceRecord>,
    hooks: HashMap<HookAction, Vec<Hook>>,
    lazy: Vec<LazyField>,
    scope: Option<Arc<EntryScope>>,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("title", &self.peek("title"))
            .field("url", &self.peek("url"))
            .field("state", &self.state)
            .field("fields", &self.fields.len())
            .field("lazy", &self.lazy.len())
            .finish()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peek("title").and_then(Value::as_str) {
            Some(title) => write!(f, "<Entry(title={},state={})>", title, self.state),
            None => write!(f, "<Entry(state={})>", self.state),
        }
    }
}

impl Entry {
    /// Create an empty entry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry with `title` and `url`
    #[must_use]
    pub fn with_title_url(title: impl Into<String>, url: impl Into<String>) -> Self {
        let mut entry = Self::new();
        entry.set("title", Value::String(title.into()));
        entry.set("url", Value::String(url.into()));
        entry
    }

    /// Attach the per-run scope (lazy lookups, current plugin)
    pub fn attach_scope(&mut self, scope: Arc<EntryScope>) {
        self.scope = Some(scope);
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Reason given for the last state change
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Accepted
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.state == EntryState::Accepted
    }

    /// Rejected
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.state == EntryState::Rejected
    }

    /// Failed
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == EntryState::Failed
    }

    /// Undecided
    #[must_use]
    pub fn is_undecided(&self) -> bool {
        self.state == EntryState::Undecided
    }

    /// Trace history
    #[must_use]
    pub fn traces(&self) -> &[TraceRecord] {
        &self.traces
    }

    /// Set a field.
    ///
    /// The first value written to `title` / `url` is also kept as
    /// `original_title` / `original_url`. Setting a field that was pending
    /// lazy evaluation replaces the lazy value.
    pub fn set(&mut self, field: &str, value: Value) {
        if field == "title" || field == "url" {
            let original = format!("original_{}", field);
            if !self.fields.contains_key(&original) {
                self.fields.insert(original, value.clone());
            }
        }
        self.drop_lazy(field);
        self.fields.insert(field.to_string(), value);
    }

    /// Set a field from raw bytes; only valid UTF-8 is accepted.
    pub fn set_bytes(&mut self, field: &str, bytes: Vec<u8>) -> Result<(), EntryError> {
        let text = String::from_utf8(bytes).map_err(|_| EntryError::NotText(field.to_string()))?;
        self.set(field, Value::String(text));
        Ok(())
    }

    /// Set a field only if it is not present yet
    pub fn set_default(&mut self, field: &str, value: Value) {
        if !self.contains(field) {
            self.set(field, value);
        }
    }

    /// Remove a concrete field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.drop_lazy(field);
        self.fields.shift_remove(field)
    }

    /// Read a field without evaluating lazy lookups
    #[must_use]
    pub fn peek(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Read a field as a string without evaluating lazy lookups
    #[must_use]
    pub fn peek_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Read a field, running its lazy lookup first if it is still pending.
    ///
    /// An unknown lookup id is an error. A lookup that fails is logged and
    /// leaves its fields `null`; it is not retried.
    pub fn get(&mut self, field: &str) -> Result<Option<&Value>, EntryError> {
        self.evaluate_lazy(field)?;
        Ok(self.fields.get(field))
    }

    /// Whether the field is set or pending lazy evaluation
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field) || self.is_lazy(field)
    }

    /// Whether the field is pending lazy evaluation
    #[must_use]
    pub fn is_lazy(&self, field: &str) -> bool {
        self.lazy.iter().any(|l| l.fields.iter().any(|f| f == field))
    }

    /// Concrete fields in insertion order
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Both `title` and `url` are present strings
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.fields.get("title").is_some_and(Value::is_string)
            && self.fields.get("url").is_some_and(Value::is_string)
    }

    /// Append a trace record unless an identical one exists
    pub fn trace(&mut self, message: impl Into<String>, operation: Option<TraceOperation>) {
        let plugin = self.scope.as_ref().and_then(|s| s.current_plugin());
        self.trace_as(message, operation, plugin);
    }

    /// Append a trace record for an explicit plugin
    pub fn trace_as(
        &mut self,
        message: impl Into<String>,
        operation: Option<TraceOperation>,
        plugin: Option<String>,
    ) {
        let record = TraceRecord {
            plugin,
            operation,
            message: message.into(),
        };
        if !self.traces.contains(&record) {
            self.traces.push(record);
        }
    }

    /// Accept the entry. Rejected and failed entries keep their state.
    pub fn accept(&mut self, reason: Option<&str>) {
        self.accept_with(reason, Map::new());
    }

    /// [`Entry::accept`] passing extra kwargs to the hooks
    pub fn accept_with(&mut self, reason: Option<&str>, kwargs: Map<String, Value>) {
        match self.state {
            EntryState::Rejected => {
                debug!(entry = %self, "Tried to accept rejected entry");
                self.trace("tried to accept rejected entry", None);
            }
            EntryState::Failed => {
                debug!(entry = %self, "Tried to accept failed entry");
                self.trace("tried to accept failed entry", None);
            }
            EntryState::Accepted => {}
            EntryState::Undecided => {
                self.state = EntryState::Accepted;
                self.reason = reason.map(str::to_string);
                self.trace(reason.unwrap_or_default(), Some(TraceOperation::Accept));
                self.run_hooks(HookAction::Accept, reason, kwargs);
            }
        }
    }

    /// Reject the entry; suppressed when the entry has a truthy `immortal` field.
    pub fn reject(&mut self, reason: Option<&str>) {
        self.reject_with(reason, Map::new());
    }

    /// [`Entry::reject`] passing extra kwargs to the hooks
    pub fn reject_with(&mut self, reason: Option<&str>, kwargs: Map<String, Value>) {
        if self.fields.get("immortal").is_some_and(is_truthy) {
            let detail = reason.map(|r| format!(" ({})", r)).unwrap_or_default();
            warn!(entry = %self, "Tried to reject immortal entry{}", detail);
            self.trace(format!("Tried to reject immortal{}", detail), None);
            return;
        }
        match self.state {
            EntryState::Rejected => {
                self.trace(
                    format!("already rejected, ignoring: {}", reason.unwrap_or_default()),
                    None,
                );
                return;
            }
            EntryState::Failed => {
                debug!(entry = %self, "Tried to reject failed entry");
                self.trace("tried to reject failed entry", None);
                return;
            }
            EntryState::Undecided | EntryState::Accepted => {}
        }
        self.state = EntryState::Rejected;
        self.reason = reason.map(str::to_string);
        self.trace(reason.unwrap_or_default(), Some(TraceOperation::Reject));
        self.run_hooks(HookAction::Reject, reason, kwargs);
    }

    /// Mark the entry failed
    pub fn fail(&mut self, reason: Option<&str>) {
        self.fail_with(reason, Map::new());
    }

    /// [`Entry::fail`] passing extra kwargs to the hooks
    pub fn fail_with(&mut self, reason: Option<&str>, kwargs: Map<String, Value>) {
        if self.state == EntryState::Failed {
            return;
        }
        self.state = EntryState::Failed;
        self.reason = reason.map(str::to_string);
        self.trace(reason.unwrap_or_default(), Some(TraceOperation::Fail));
        error!(entry = %self, reason = reason.unwrap_or_default(), "Failed");
        self.run_hooks(HookAction::Fail, reason, kwargs);
    }

    /// Run `complete` hooks; the state is left alone
    pub fn complete(&mut self, kwargs: Map<String, Value>) {
        self.run_hooks(HookAction::Complete, None, kwargs);
    }

    /// Register a hook for `action` (`accept`, `reject`, `fail`, `complete`)
    /// with bound kwargs.
    pub fn add_hook<F>(
        &mut self,
        action: &str,
        func: F,
        kwargs: Map<String, Value>,
    ) -> Result<(), EntryError>
    where
        F: Fn(&Entry, &HookContext) + Send + Sync + 'static,
    {
        let action: HookAction = action.parse()?;
        self.hooks.entry(action).or_default().push(Hook {
            func: Arc::new(func),
            kwargs,
        });
        Ok(())
    }

    fn run_hooks(&mut self, action: HookAction, reason: Option<&str>, kwargs: Map<String, Value>) {
        let hooks = match self.hooks.get(&action) {
            Some(hooks) if !hooks.is_empty() => hooks.clone(),
            _ => return,
        };
        for hook in hooks {
            let mut merged = hook.kwargs.clone();
            for (key, value) in &kwargs {
                merged.insert(key.clone(), value.clone());
            }
            let context = HookContext {
                action,
                reason: reason.map(str::to_string),
                kwargs: merged,
            };
            (hook.func)(self, &context);
        }
    }

    /// Register a deferred lookup filling `fields`.
    ///
    /// Fields that already hold a concrete value are left alone.
    pub fn add_lazy_fields(
        &mut self,
        lookup_id: impl Into<String>,
        fields: &[&str],
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) {
        let pending: Vec<String> = fields
            .iter()
            .filter(|f| !self.fields.contains_key(**f))
            .map(|f| (*f).to_string())
            .collect();
        if pending.is_empty() {
            return;
        }
        for field in &pending {
            self.drop_lazy(field);
        }
        self.lazy.push(LazyField {
            lookup_id: lookup_id.into(),
            fields: pending,
            args,
            kwargs,
        });
    }

    /// Lazy lookups that have not run yet
    #[must_use]
    pub fn lazy_fields(&self) -> &[LazyField] {
        &self.lazy
    }

    fn drop_lazy(&mut self, field: &str) {
        for lazy in &mut self.lazy {
            lazy.fields.retain(|f| f != field);
        }
        self.lazy.retain(|l| !l.fields.is_empty());
    }

    fn evaluate_lazy(&mut self, field: &str) -> Result<(), EntryError> {
        let Some(pos) = self
            .lazy
            .iter()
            .position(|l| l.fields.iter().any(|f| f == field))
        else {
            return Ok(());
        };
        let lookup_id = self.lazy[pos].lookup_id.clone();
        let lookup = self
            .scope
            .as_ref()
            .and_then(|scope| scope.lookups.get(&lookup_id))
            .ok_or_else(|| EntryError::UnknownLookup(lookup_id.clone()))?;
        let descriptor = self.lazy.remove(pos);
        let values = match lookup(self, &descriptor) {
            Ok(values) => values,
            Err(err) => {
                warn!(lookup = %lookup_id, entry = %self, error = %err, "Lazy lookup failed");
                Map::new()
            }
        };
        for name in &descriptor.fields {
            let value = values.get(name).cloned().unwrap_or(Value::Null);
            self.set(name, value);
        }
        Ok(())
    }

    /// Copy fields out of `source`. With `ignore_none`, `null` results are
    /// skipped instead of written.
    pub fn update_using_map(
        &mut self,
        field_map: &[(&str, FieldSource)],
        source: &Value,
        ignore_none: bool,
    ) {
        for (field, from) in field_map {
            let value = from.resolve(source);
            if ignore_none && value.is_null() {
                continue;
            }
            self.set(field, value);
        }
    }

    /// Substitute `{field}` placeholders with field values
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        placeholder_regex()
            .replace_all(template, |caps: &regex::Captures<'_>| {
                match self.fields.get(&caps[1]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => caps[0].to_string(),
                    Some(other) => other.to_string(),
                }
            })
            .into_owned()
    }

    /// Plain structure with concrete public fields and pending lazy lookups
    #[must_use]
    pub fn serialize(&self) -> SerializedEntry {
        let fields = self
            .fields
            .iter()
            .filter(|(key, _)| !key.starts_with('_'))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        SerializedEntry {
            fields,
            lazy_fields: self.lazy.clone(),
        }
    }

    /// Restore an entry from [`Entry::serialize`] output
    #[must_use]
    pub fn deserialize(data: SerializedEntry) -> Self {
        let mut entry = Self::new();
        for (key, value) in data.fields {
            if key.starts_with("original_") {
                entry.fields.insert(key, value);
            } else {
                entry.set(&key, value);
            }
        }
        entry.lazy = data.lazy_fields;
        entry
    }

    /// Restore from a JSON value
    pub fn from_value(value: Value) -> Result<Self, EntryError> {
        let data: SerializedEntry =
            serde_json::from_value(value).map_err(|e| EntryError::Deserialize(e.to_string()))?;
        Ok(Self::deserialize(data))
    }

    fn identity(&self) -> (Option<&Value>, Option<&Value>) {
        (
            self.fields.get("original_title"),
            self.fields.get("original_url"),
        )
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("placeholder regex is valid"))
}

/// Python-style truthiness of a field value
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (title, url) = self.identity();
        title.map(Value::to_string).hash(state);
        url.map(Value::to_string).hash(state);
    }
}

#[cfg(test)]
mod tests;
