//! Schema building helpers

use serde_json::{json, Value};

/// Schema accepting either a single value matching `schema` or a non-empty
/// list of such values.
#[must_use]
pub fn one_or_more(schema: Value, unique_items: bool) -> Value {
    let mut single = schema.clone();
    if let Value::Object(map) = &mut single {
        map.entry("title")
            .or_insert_with(|| Value::String("single value".to_string()));
    }
    json!({
        "oneOf": [
            {
                "title": "multiple values",
                "type": "array",
                "items": schema,
                "minItems": 1,
                "uniqueItems": unique_items,
            },
            single,
        ]
    })
}

/// Coerce a value accepted by [`one_or_more`] into a list.
#[must_use]
pub fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}
