//! Human readable validation messages
//!
//! The validator asks this module for the message of each keyword it checks.
//! Schemas may override any message with an `error_<validator>` or `error`
//! template; those are applied once validation has finished.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::ValidationError;

/// Render a value the way it is shown inside messages: strings bare,
/// everything else as compact JSON.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Join words as an English list: `a`, `a or b`, `a, b or c`.
#[must_use]
pub fn english_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}

fn friendly_type(name: &str) -> &str {
    match name {
        "object" => "dict",
        "array" => "list",
        other => other,
    }
}

/// Type names from a `type` keyword value (string or list)
#[must_use]
pub fn type_names(validator_value: &Value) -> Vec<String> {
    match validator_value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Message for a failed `type` keyword
#[must_use]
pub fn type_message(instance: &Value, validator_value: &Value) -> String {
    let expected: Vec<String> = type_names(validator_value)
        .iter()
        .map(|t| friendly_type(t).to_string())
        .collect();
    let expected = english_list(&expected);
    match instance {
        Value::Object(_) => format!("Got a dict, expected: {}", expected),
        Value::Array(_) => format!("Got a list, expected: {}", expected),
        other => format!("Got `{}`, expected: {}", display_value(other), expected),
    }
}

/// Message for a failed `enum` keyword
#[must_use]
pub fn enum_message(validator_value: &Value) -> String {
    let options: Vec<String> = validator_value
        .as_array()
        .map(|items| items.iter().map(display_value).collect())
        .unwrap_or_default();
    format!("Must be one of the following: {}", options.join(", "))
}

/// Message for keys rejected by `additionalProperties: false`
#[must_use]
pub fn additional_properties_message(extras: &[String]) -> String {
    match extras {
        [single] => format!("The key `{}` is not valid here.", single),
        many => {
            let keys: Vec<String> = many.iter().map(|k| format!("`{}`", k)).collect();
            format!("The keys {} are not valid here.", keys.join(", "))
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("placeholder regex is valid"))
}

/// Render a schema supplied error template for `error`.
#[must_use]
pub fn render_template(template: &str, error: &ValidationError) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
            "message" => error.message.clone(),
            "validator" => error.validator.clone(),
            "validator_value" => display_value(&error.validator_value),
            "instance" => display_value(&error.instance),
            "json_pointer" => error.json_pointer(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Replace messages with `error_<validator>` / `error` templates declared in
/// the schema node that produced each error.
pub fn apply_custom_messages(errors: &mut [ValidationError]) {
    for error in errors.iter_mut() {
        let specific = format!("error_{}", error.validator);
        let template = error
            .schema
            .get(&specific)
            .or_else(|| error.schema.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(template) = template {
            error.message = render_template(&template, error);
        }
    }
}
