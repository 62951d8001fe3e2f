//! Structural self-check of schema documents

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Result, SchemaError};

const TYPES: &[&str] = &[
    "string", "number", "integer", "boolean", "null", "object", "array",
];

fn malformed(path: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Malformed {
        path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        message: message.into(),
    }
}

/// Check that `schema` is a well formed schema document.
///
/// Catches the mistakes that would otherwise only surface at validation
/// time: unknown type names, bad regexes, non-schema subschemas and
/// negative limits.
pub fn check_schema(schema: &Value) -> Result<()> {
    check_node(schema, "")
}

fn check_node(schema: &Value, path: &str) -> Result<()> {
    let obj = match schema {
        Value::Bool(_) => return Ok(()),
        Value::Object(obj) => obj,
        other => return Err(malformed(path, format!("expected a schema, got {}", other))),
    };
    for (keyword, value) in obj {
        let here = format!("{}/{}", path, keyword);
        match keyword.as_str() {
            "type" => check_types(value, &here)?,
            "properties" | "patternProperties" => {
                let map = expect_object(value, &here)?;
                for (key, subschema) in map {
                    if keyword == "patternProperties" {
                        check_regex(key, &here)?;
                    }
                    check_node(subschema, &format!("{}/{}", here, key))?;
                }
            }
            "additionalProperties" | "not" => check_node(value, &here)?,
            "items" => match value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        check_node(item, &format!("{}/{}", here, i))?;
                    }
                }
                other => check_node(other, &here)?,
            },
            "oneOf" | "anyOf" | "allOf" => {
                let items = value
                    .as_array()
                    .filter(|items| !items.is_empty())
                    .ok_or_else(|| malformed(&here, "must be a non-empty list of schemas"))?;
                for (i, item) in items.iter().enumerate() {
                    check_node(item, &format!("{}/{}", here, i))?;
                }
            }
            "required" => {
                let ok = value
                    .as_array()
                    .is_some_and(|items| items.iter().all(Value::is_string));
                if !ok {
                    return Err(malformed(&here, "must be a list of strings"));
                }
            }
            "enum" => {
                if !value.is_array() {
                    return Err(malformed(&here, "must be a list"));
                }
            }
            "minItems" | "maxItems" | "minLength" | "maxLength" | "minProperties"
            | "maxProperties" => {
                if value.as_u64().is_none() {
                    return Err(malformed(&here, "must be a non-negative integer"));
                }
            }
            "minimum" | "maximum" | "multipleOf" => {
                if !value.is_number() {
                    return Err(malformed(&here, "must be a number"));
                }
            }
            "exclusiveMinimum" | "exclusiveMaximum" => {
                if !(value.is_number() || value.is_boolean()) {
                    return Err(malformed(&here, "must be a number or boolean"));
                }
            }
            "uniqueItems" => {
                if !value.is_boolean() {
                    return Err(malformed(&here, "must be a boolean"));
                }
            }
            "pattern" => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| malformed(&here, "must be a string"))?;
                check_regex(pattern, &here)?;
            }
            "format" | "$ref" | "title" | "description" | "$schema" => {
                if !value.is_string() {
                    return Err(malformed(&here, "must be a string"));
                }
            }
            "dependencies" => {
                for (key, dependency) in expect_object(value, &here)? {
                    if !dependency.is_array() {
                        check_node(dependency, &format!("{}/{}", here, key))?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn expect_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| malformed(path, "must be an object"))
}

fn check_types(value: &Value, path: &str) -> Result<()> {
    let names: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    for name in names {
        match name.as_str() {
            Some(name) if TYPES.contains(&name) => {}
            _ => return Err(malformed(path, format!("unknown type {}", name))),
        }
    }
    Ok(())
}

fn check_regex(pattern: &str, path: &str) -> Result<()> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| malformed(path, format!("invalid regex `{}`: {}", pattern, e)))
}
