//! Config composition helpers
//!
//! Templates and includes are merged into a task config with
//! [`merge_dict`]: keys missing from the task are copied, nested mappings are
//! merged recursively, lists are concatenated and the task's own scalars win.

use serde_json::{Map, Value};
use thiserror::Error;

/// Two values under the same key cannot be merged
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot merge `{key}`: {found} into {existing}")]
pub struct MergeError {
    /// Dotted path of the conflicting key
    pub key: String,
    /// Kind of the value being merged in
    pub found: &'static str,
    /// Kind of the value already present
    pub existing: &'static str,
}

/// Merge `from` into `into`.
pub fn merge_dict(from: &Map<String, Value>, into: &mut Map<String, Value>) -> Result<(), MergeError> {
    merge_at("", from, into)
}

fn merge_at(
    prefix: &str,
    from: &Map<String, Value>,
    into: &mut Map<String, Value>,
) -> Result<(), MergeError> {
    for (key, value) in from {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let Some(existing) = into.get_mut(key) else {
            into.insert(key.clone(), value.clone());
            continue;
        };
        match (existing, value) {
            (Value::Object(target), Value::Object(source)) => merge_at(&path, source, target)?,
            (Value::Array(target), Value::Array(source)) => target.extend(source.iter().cloned()),
            (existing, value) => {
                // `key: null` in the task means "use the merged value"
                if existing.is_null() {
                    *existing = value.clone();
                } else if kind(existing) != kind(value) && is_container(existing, value) {
                    return Err(MergeError {
                        key: path,
                        found: kind(value),
                        existing: kind(existing),
                    });
                }
            }
        }
    }
    Ok(())
}

fn is_container(a: &Value, b: &Value) -> bool {
    a.is_object() || a.is_array() || b.is_object() || b.is_array()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_missing_keys_are_copied() {
        let mut task = obj(json!({"accept_all": true}));
        merge_dict(&obj(json!({"mock": [{"title": "a"}]})), &mut task).unwrap();
        assert_eq!(Value::Object(task), json!({"accept_all": true, "mock": [{"title": "a"}]}));
    }

    #[test]
    fn test_nested_merge_and_list_concat() {
        let mut task = obj(json!({
            "regexp": {"accept": ["foo"], "from": "title"},
            "max_reruns": 2
        }));
        let template = obj(json!({
            "regexp": {"accept": ["bar"], "reject": ["baz"], "from": "url"},
            "max_reruns": 5
        }));
        merge_dict(&template, &mut task).unwrap();
        assert_eq!(
            Value::Object(task),
            json!({
                "regexp": {"accept": ["foo", "bar"], "from": "title", "reject": ["baz"]},
                "max_reruns": 2
            })
        );
    }

    #[test]
    fn test_null_takes_template_value() {
        let mut task = obj(json!({"mock": null}));
        merge_dict(&obj(json!({"mock": [{"title": "a"}]})), &mut task).unwrap();
        assert_eq!(task["mock"], json!([{"title": "a"}]));
    }

    #[test]
    fn test_conflict_is_error() {
        let mut task = obj(json!({"regexp": {"accept": "foo"}}));
        let err = merge_dict(&obj(json!({"regexp": {"accept": ["bar"]}})), &mut task).unwrap_err();
        assert_eq!(err.key, "regexp.accept");
        assert_eq!(err.found, "list");
        assert_eq!(err.existing, "string");
    }
}
