//! Filter plugins: accept_all, regexp, quality

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

use flexget_schema::{as_list, one_or_more, Quality, Requirements};

use crate::entry::{is_truthy, Entry};
use crate::error::{PluginError, PluginResult};
use crate::plugin::{Phase, Plugin, PluginDefinition};
use crate::task::Task;

/// Accepts every undecided entry
pub struct AcceptAllPlugin {
    definition: PluginDefinition,
}

impl AcceptAllPlugin {
    /// Create a new accept_all plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("accept_all")
            .with_phase(Phase::Filter)
            .with_schema(json!({"type": "boolean"}));
        Self { definition }
    }
}

impl Default for AcceptAllPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for AcceptAllPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_filter(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        if !is_truthy(config) {
            return Ok(());
        }
        for entry in task.undecided_mut() {
            entry.accept(None);
        }
        Ok(())
    }
}

const REGEXP_OPERATIONS: [&str; 4] = ["accept", "reject", "accept_excluding", "reject_excluding"];

/// Accept or reject entries by regular expressions over entry fields.
///
/// ```yaml
/// regexp:
///   accept:
///     - some.show
///     - other: {from: [description], not: [german]}
///   reject: [cam]
///   rest: reject
/// ```
pub struct RegexpPlugin {
    definition: PluginDefinition,
}

impl RegexpPlugin {
    /// Create a new regexp plugin
    #[must_use]
    pub fn new() -> Self {
        let regexps = json!({
            "type": "array",
            "items": {
                "oneOf": [
                    {"type": "string", "format": "regex"},
                    {
                        "type": "object",
                        "minProperties": 1,
                        "maxProperties": 1,
                        "additionalProperties": {
                            "type": "object",
                            "properties": {
                                "from": one_or_more(json!({"type": "string"}), false),
                                "not": one_or_more(json!({"type": "string", "format": "regex"}), false),
                                "set": {"type": "object"}
                            },
                            "additionalProperties": false
                        }
                    }
                ]
            }
        });
        let definition = PluginDefinition::new("regexp")
            .with_phase_priority(Phase::Filter, 172)
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "accept": regexps,
                    "reject": regexps,
                    "accept_excluding": regexps,
                    "reject_excluding": regexps,
                    "from": one_or_more(json!({"type": "string"}), false),
                    "rest": {"type": "string", "enum": ["accept", "reject"]}
                },
                "additionalProperties": false
            }));
        Self { definition }
    }
}

impl Default for RegexpPlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct Rule {
    pattern: String,
    regex: Regex,
    not: Vec<Regex>,
    from: Vec<String>,
    set: Map<String, Value>,
}

fn compile(pattern: &str) -> PluginResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| PluginError::error(format!("Invalid regexp `{}`: {}", pattern, e)))
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .map(as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn parse_rules(items: &Value, default_from: &[String]) -> PluginResult<Vec<Rule>> {
    let mut rules = Vec::new();
    for item in as_list(items) {
        let (pattern, options) = match &item {
            Value::String(pattern) => (pattern.clone(), Map::new()),
            Value::Object(map) => match map.iter().next() {
                Some((pattern, Value::Object(options))) => (pattern.clone(), options.clone()),
                Some((pattern, _)) => (pattern.clone(), Map::new()),
                None => continue,
            },
            _ => continue,
        };
        let from = strings(options.get("from"));
        rules.push(Rule {
            regex: compile(&pattern)?,
            not: strings(options.get("not"))
                .iter()
                .map(|p| compile(p))
                .collect::<PluginResult<_>>()?,
            from: if from.is_empty() {
                default_from.to_vec()
            } else {
                from
            },
            set: options
                .get("set")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            pattern,
        });
    }
    Ok(rules)
}

impl Rule {
    /// Field the rule matched in, if any
    fn matches(&self, entry: &mut Entry) -> PluginResult<Option<String>> {
        for field in &self.from {
            let texts: Vec<String> = match entry.get(field)? {
                Some(Value::String(s)) => vec![s.clone()],
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => continue,
            };
            for text in texts {
                if self.regex.is_match(&text) && !self.not.iter().any(|n| n.is_match(&text)) {
                    return Ok(Some(field.clone()));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Plugin for RegexpPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_filter(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        let mut default_from = strings(config.get("from"));
        if default_from.is_empty() {
            default_from.push("title".to_string());
        }

        let mut rest: Option<BTreeSet<usize>> = None;
        for operation in REGEXP_OPERATIONS {
            let Some(items) = config.get(operation) else {
                continue;
            };
            let rules = parse_rules(items, &default_from)?;
            let excluding = operation.ends_with("_excluding");
            let accept = operation.starts_with("accept");

            let mut leftovers = BTreeSet::new();
            for (index, entry) in task.all_entries_mut().iter_mut().enumerate() {
                if entry.is_rejected() || entry.is_failed() {
                    continue;
                }
                let mut hit = None;
                for rule in &rules {
                    if let Some(field) = rule.matches(entry)? {
                        hit = Some((rule, field));
                        break;
                    }
                }
                let applies = hit.is_some() != excluding;
                if !applies {
                    leftovers.insert(index);
                    continue;
                }
                let reason = match &hit {
                    Some((rule, field)) => format!("regexp '{}' matched field '{}'", rule.pattern, field),
                    None => format!("regexp '{}' did not match", operation),
                };
                if let Some((rule, _)) = &hit {
                    for (key, value) in &rule.set {
                        entry.set(key, value.clone());
                    }
                }
                debug!(entry = %entry, operation, "{}", reason);
                if accept {
                    entry.accept(Some(&reason));
                } else {
                    entry.reject(Some(&reason));
                }
            }
            rest = Some(match rest {
                None => leftovers,
                Some(previous) => previous.intersection(&leftovers).copied().collect(),
            });
        }

        let Some(method) = config.get("rest").and_then(Value::as_str) else {
            return Ok(());
        };
        let rest = rest.unwrap_or_else(|| (0..task.all_entries().len()).collect());
        for index in rest {
            let entry = &mut task.all_entries_mut()[index];
            if entry.is_rejected() || entry.is_failed() {
                continue;
            }
            if method == "accept" {
                entry.accept(Some("regexp `rest`"));
            } else {
                entry.reject(Some("regexp `rest`"));
            }
        }
        Ok(())
    }
}

/// Rejects entries whose quality does not meet the requirements
pub struct QualityPlugin {
    definition: PluginDefinition,
}

impl QualityPlugin {
    /// Create a new quality plugin
    #[must_use]
    pub fn new() -> Self {
        let definition = PluginDefinition::new("quality")
            .with_phase_priority(Phase::Filter, 175)
            .with_schema(one_or_more(
                json!({"type": "string", "format": "quality_requirements"}),
                true,
            ));
        Self { definition }
    }
}

impl Default for QualityPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_quality(entry: &Entry) -> Quality {
    if let Some(quality) = entry.peek_str("quality").and_then(|q| Quality::parse(q).ok()) {
        return quality;
    }
    Quality::scan(entry.peek_str("title").unwrap_or_default())
}

#[async_trait]
impl Plugin for QualityPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_filter(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        let requirements = strings(Some(config))
            .iter()
            .map(|text| {
                Requirements::parse(text).map_err(|e| {
                    PluginError::error(format!("Invalid quality requirement `{}`: {}", text, e))
                })
            })
            .collect::<PluginResult<Vec<_>>>()?;
        if requirements.is_empty() {
            return Ok(());
        }

        for entry in task.entries_mut() {
            let quality = entry_quality(entry);
            if !entry.contains("quality") {
                entry.set("quality", Value::String(quality.to_string()));
            }
            if requirements.iter().any(|r| r.allows(&quality)) {
                debug!(entry = %entry, quality = %quality, "Quality meets requirements");
            } else {
                entry.reject(Some(&format!("quality is {}", quality)));
            }
        }
        Ok(())
    }
}
