//! Draft-4 style validator with default filling and branch selection
//!
//! Validation collects every error instead of stopping at the first one.
//! When defaults are enabled, `default` values of `properties` are inserted
//! into objects before those objects are validated. Inside `oneOf`/`anyOf`
//! each branch validates a copy of the instance; only the copy of the branch
//! that matched is written back, so defaults from rejected branches never
//! leak into the config.

use regex::Regex;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PathSegment, Result, SchemaError, ValidationError};
use crate::messages::{
    additional_properties_message, display_value, enum_message, type_message, type_names,
};
use crate::registry::SchemaRegistry;

type Outcome = Result<Vec<ValidationError>>;

pub(crate) struct Validator<'r> {
    registry: &'r SchemaRegistry,
    set_defaults: bool,
    patterns: RefCell<HashMap<String, Regex>>,
}

impl<'r> Validator<'r> {
    pub(crate) fn new(registry: &'r SchemaRegistry, set_defaults: bool) -> Self {
        Self {
            registry,
            set_defaults,
            patterns: RefCell::new(HashMap::new()),
        }
    }

    /// Validate `instance` against `schema`; `root` is the document local
    /// `#/` references resolve against.
    pub(crate) fn validate(&self, instance: &mut Value, schema: &Value, root: &Value) -> Outcome {
        let obj = match schema {
            Value::Bool(true) => return Ok(Vec::new()),
            Value::Bool(false) => {
                return Ok(vec![ValidationError::new(
                    "false",
                    &Value::Bool(false),
                    instance,
                    schema,
                    format!("`{}` is not allowed here", display_value(instance)),
                )])
            }
            Value::Object(obj) => obj,
            _ => {
                return Err(SchemaError::Malformed {
                    path: String::new(),
                    message: format!("schema must be an object or boolean, got {}", schema),
                })
            }
        };

        if let Some(reference) = obj.get("$ref") {
            return self.validate_ref(instance, reference, root);
        }

        if self.set_defaults {
            fill_defaults(instance, obj);
        }

        if let Some(note) = obj.get("deprecated") {
            warn_deprecated(note, obj);
        }

        let mut errors = Vec::new();
        for (keyword, value) in obj {
            let found = match keyword.as_str() {
                "type" => check_type(instance, value, schema),
                "enum" => check_enum(instance, value, schema),
                "const" => check_const(instance, value, schema),
                "properties" => self.check_properties(instance, value, root)?,
                "patternProperties" => self.check_pattern_properties(instance, value, root)?,
                "additionalProperties" => {
                    self.check_additional_properties(instance, value, obj, schema, root)?
                }
                "required" => check_required(instance, value, schema),
                "minProperties" | "maxProperties" => {
                    check_property_count(keyword, instance, value, schema)
                }
                "dependencies" => self.check_dependencies(instance, value, schema, root)?,
                "items" => self.check_items(instance, value, root)?,
                "minItems" | "maxItems" => check_item_count(keyword, instance, value, schema),
                "uniqueItems" => check_unique(instance, value, schema),
                "minLength" | "maxLength" => check_length(keyword, instance, value, schema),
                "pattern" => self.check_pattern(instance, value, schema)?,
                "format" => self.check_format(instance, value, schema),
                "minimum" | "maximum" => check_bound(keyword, instance, value, obj, schema),
                "exclusiveMinimum" | "exclusiveMaximum" if value.is_number() => {
                    check_exclusive_bound(keyword, instance, value, schema)
                }
                "multipleOf" => check_multiple_of(instance, value, schema),
                "allOf" => self.check_all_of(instance, value, root)?,
                "anyOf" => self.check_any_of(instance, value, schema, root)?,
                "oneOf" => self.check_one_of(instance, value, schema, root)?,
                "not" => self.check_not(instance, value, schema, root)?,
                _ => Vec::new(),
            };
            errors.extend(found);
        }
        Ok(errors)
    }

    fn validate_ref(&self, instance: &mut Value, reference: &Value, root: &Value) -> Outcome {
        let uri = reference.as_str().ok_or_else(|| SchemaError::Malformed {
            path: "$ref".to_string(),
            message: "$ref must be a string".to_string(),
        })?;
        let errors = if let Some(pointer) = uri.strip_prefix('#') {
            let target = root
                .pointer(pointer)
                .ok_or_else(|| SchemaError::InvalidPointer(uri.to_string()))?;
            self.validate(instance, target, root)?
        } else {
            let target: Arc<Value> = self.registry.resolve_ref(uri)?;
            self.validate(instance, &target, &target)?
        };
        Ok(errors
            .into_iter()
            .map(|e| e.schema_prefixed(&["$ref"]))
            .collect())
    }

    fn regex(&self, pattern: &str) -> Result<Regex> {
        if let Some(re) = self.patterns.borrow().get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|e| SchemaError::Malformed {
            path: "pattern".to_string(),
            message: format!("invalid regex `{}`: {}", pattern, e),
        })?;
        self.patterns
            .borrow_mut()
            .insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    fn check_properties(&self, instance: &mut Value, properties: &Value, root: &Value) -> Outcome {
        let (Value::Object(map), Some(properties)) = (instance, properties.as_object()) else {
            return Ok(Vec::new());
        };
        let mut errors = Vec::new();
        for (key, subschema) in properties {
            if let Some(child) = map.get_mut(key) {
                for e in self.validate(child, subschema, root)? {
                    errors.push(e.prefixed(PathSegment::Key(key.clone()), &["properties", key.as_str()]));
                }
            }
        }
        Ok(errors)
    }

    fn check_pattern_properties(
        &self,
        instance: &mut Value,
        patterns: &Value,
        root: &Value,
    ) -> Outcome {
        let (Value::Object(map), Some(patterns)) = (instance, patterns.as_object()) else {
            return Ok(Vec::new());
        };
        let mut errors = Vec::new();
        for (pattern, subschema) in patterns {
            let re = self.regex(pattern)?;
            for (key, child) in map.iter_mut() {
                if !re.is_match(key) {
                    continue;
                }
                for e in self.validate(child, subschema, root)? {
                    errors.push(e.prefixed(
                        PathSegment::Key(key.clone()),
                        &["patternProperties", pattern.as_str()],
                    ));
                }
            }
        }
        Ok(errors)
    }

    fn extra_keys(&self, map: &Map<String, Value>, schema: &Map<String, Value>) -> Result<Vec<String>> {
        let declared = schema.get("properties").and_then(Value::as_object);
        let mut patterns = Vec::new();
        if let Some(pattern_props) = schema.get("patternProperties").and_then(Value::as_object) {
            for pattern in pattern_props.keys() {
                patterns.push(self.regex(pattern)?);
            }
        }
        Ok(map
            .keys()
            .filter(|key| !declared.is_some_and(|d| d.contains_key(*key)))
            .filter(|key| !patterns.iter().any(|re| re.is_match(key)))
            .cloned()
            .collect())
    }

    fn check_additional_properties(
        &self,
        instance: &mut Value,
        additional: &Value,
        obj: &Map<String, Value>,
        schema: &Value,
        root: &Value,
    ) -> Outcome {
        let Value::Object(map) = instance else {
            return Ok(Vec::new());
        };
        let extras = self.extra_keys(map, obj)?;
        if extras.is_empty() {
            return Ok(Vec::new());
        }
        match additional {
            Value::Bool(false) => {
                let message = additional_properties_message(&extras);
                Ok(vec![ValidationError::new(
                    "additionalProperties",
                    additional,
                    &Value::Object(map.clone()),
                    schema,
                    message,
                )])
            }
            Value::Bool(true) => Ok(Vec::new()),
            subschema => {
                let mut errors = Vec::new();
                for key in extras {
                    if let Some(child) = map.get_mut(&key) {
                        for e in self.validate(child, subschema, root)? {
                            errors.push(
                                e.prefixed(PathSegment::Key(key.clone()), &["additionalProperties"]),
                            );
                        }
                    }
                }
                Ok(errors)
            }
        }
    }

    fn check_dependencies(
        &self,
        instance: &mut Value,
        dependencies: &Value,
        schema: &Value,
        root: &Value,
    ) -> Outcome {
        let Some(dependencies) = dependencies.as_object() else {
            return Ok(Vec::new());
        };
        let mut errors = Vec::new();
        for (key, dependency) in dependencies {
            let present = instance.as_object().is_some_and(|m| m.contains_key(key));
            if !present {
                continue;
            }
            match dependency {
                Value::Array(required) => {
                    for name in required.iter().filter_map(Value::as_str) {
                        let missing = !instance.as_object().is_some_and(|m| m.contains_key(name));
                        if missing {
                            let mut e = ValidationError::new(
                                "dependencies",
                                dependency,
                                instance,
                                schema,
                                format!("`{}` is a dependency of `{}`", name, key),
                            );
                            e.schema_path.push(key.clone());
                            errors.push(e);
                        }
                    }
                }
                subschema => {
                    for e in self.validate(instance, subschema, root)? {
                        errors.push(e.schema_prefixed(&["dependencies", key.as_str()]));
                    }
                }
            }
        }
        Ok(errors)
    }

    fn check_items(&self, instance: &mut Value, items: &Value, root: &Value) -> Outcome {
        let Value::Array(array) = instance else {
            return Ok(Vec::new());
        };
        let mut errors = Vec::new();
        match items {
            Value::Array(schemas) => {
                for (index, (child, subschema)) in array.iter_mut().zip(schemas).enumerate() {
                    let idx = index.to_string();
                    for e in self.validate(child, subschema, root)? {
                        errors.push(e.prefixed(PathSegment::Index(index), &["items", idx.as_str()]));
                    }
                }
            }
            subschema => {
                for (index, child) in array.iter_mut().enumerate() {
                    for e in self.validate(child, subschema, root)? {
                        errors.push(e.prefixed(PathSegment::Index(index), &["items"]));
                    }
                }
            }
        }
        Ok(errors)
    }

    fn check_pattern(&self, instance: &Value, pattern: &Value, schema: &Value) -> Outcome {
        let (Some(text), Some(pattern_str)) = (instance.as_str(), pattern.as_str()) else {
            return Ok(Vec::new());
        };
        if self.regex(pattern_str)?.is_match(text) {
            return Ok(Vec::new());
        }
        Ok(vec![ValidationError::new(
            "pattern",
            pattern,
            instance,
            schema,
            format!("`{}` does not match `{}`", text, pattern_str),
        )])
    }

    fn check_format(&self, instance: &Value, format: &Value, schema: &Value) -> Vec<ValidationError> {
        let Some(name) = format.as_str() else {
            return Vec::new();
        };
        match self.registry.formats().check(name, instance) {
            Ok(()) => Vec::new(),
            Err(message) => vec![ValidationError::new("format", format, instance, schema, message)],
        }
    }

    fn check_all_of(&self, instance: &mut Value, branches: &Value, root: &Value) -> Outcome {
        let mut errors = Vec::new();
        for (index, branch) in branches.as_array().into_iter().flatten().enumerate() {
            let idx = index.to_string();
            for e in self.validate(instance, branch, root)? {
                errors.push(e.schema_prefixed(&["allOf", idx.as_str()]));
            }
        }
        Ok(errors)
    }

    /// Validate each branch against its own copy of the instance.
    fn try_branches(
        &self,
        instance: &Value,
        branches: &Value,
        root: &Value,
        stop_at_first_match: bool,
    ) -> Result<(Vec<(usize, Value)>, Vec<(usize, Vec<ValidationError>)>)> {
        let mut matched = Vec::new();
        let mut failed = Vec::new();
        for (index, branch) in branches.as_array().into_iter().flatten().enumerate() {
            let mut candidate = instance.clone();
            let errors = self.validate(&mut candidate, branch, root)?;
            if errors.is_empty() {
                matched.push((index, candidate));
                if stop_at_first_match {
                    break;
                }
            } else {
                failed.push((index, errors));
            }
        }
        Ok((matched, failed))
    }

    fn check_any_of(
        &self,
        instance: &mut Value,
        branches: &Value,
        schema: &Value,
        root: &Value,
    ) -> Outcome {
        let (mut matched, failed) = self.try_branches(instance, branches, root, true)?;
        if let Some((_, candidate)) = matched.pop() {
            *instance = candidate;
            return Ok(Vec::new());
        }
        Ok(select_branch_errors("anyOf", branches, instance, schema, failed))
    }

    fn check_one_of(
        &self,
        instance: &mut Value,
        branches: &Value,
        schema: &Value,
        root: &Value,
    ) -> Outcome {
        let (mut matched, failed) = self.try_branches(instance, branches, root, false)?;
        match matched.len() {
            0 => Ok(select_branch_errors("oneOf", branches, instance, schema, failed)),
            1 => {
                if let Some((_, candidate)) = matched.pop() {
                    *instance = candidate;
                }
                Ok(Vec::new())
            }
            _ => {
                let indexes: Vec<String> = matched.iter().map(|(i, _)| i.to_string()).collect();
                Ok(vec![ValidationError::new(
                    "oneOf",
                    branches,
                    instance,
                    schema,
                    format!(
                        "`{}` is valid under more than one of the given schemas ({})",
                        display_value(instance),
                        indexes.join(", ")
                    ),
                )])
            }
        }
    }

    fn check_not(&self, instance: &mut Value, negated: &Value, schema: &Value, root: &Value) -> Outcome {
        let mut candidate = instance.clone();
        if self.validate(&mut candidate, negated, root)?.is_empty() {
            return Ok(vec![ValidationError::new(
                "not",
                negated,
                instance,
                schema,
                format!("`{}` is not allowed here", display_value(instance)),
            )]);
        }
        Ok(Vec::new())
    }
}

fn fill_defaults(instance: &mut Value, schema: &Map<String, Value>) {
    let (Value::Object(map), Some(properties)) = (
        instance,
        schema.get("properties").and_then(Value::as_object),
    ) else {
        return;
    };
    for (key, subschema) in properties {
        if map.contains_key(key) {
            continue;
        }
        if let Some(default) = subschema.get("default") {
            map.insert(key.clone(), default.clone());
        }
    }
}

fn warn_deprecated(note: &Value, schema: &Map<String, Value>) {
    let message = match note {
        Value::String(message) => message.clone(),
        Value::Bool(true) => schema
            .get("deprecationMessage")
            .and_then(Value::as_str)
            .unwrap_or("this option is deprecated")
            .to_string(),
        _ => return,
    };
    tracing::warn!("{}", message);
}

/// Pick the most useful errors out of a failed `oneOf`/`anyOf`.
///
/// Branches that failed on the type of the instance itself are assumed not
/// to be the intended one. If exactly one branch survives, its errors are
/// reported; if none survive, a single `type` error listing every allowed
/// type is reported instead.
fn select_branch_errors(
    keyword: &str,
    branches: &Value,
    instance: &Value,
    schema: &Value,
    failed: Vec<(usize, Vec<ValidationError>)>,
) -> Vec<ValidationError> {
    let mut allowed_types: Vec<String> = Vec::new();
    let mut candidates = Vec::new();
    for (index, errors) in failed {
        let mut wrong_type = false;
        for error in &errors {
            if error.validator == "type" && error.path.is_empty() {
                wrong_type = true;
                for name in type_names(&error.validator_value) {
                    if !allowed_types.contains(&name) {
                        allowed_types.push(name);
                    }
                }
            }
        }
        if !wrong_type {
            candidates.push((index, errors));
        }
    }

    if candidates.len() == 1 {
        if let Some((index, errors)) = candidates.pop() {
            let idx = index.to_string();
            return errors
                .into_iter()
                .map(|e| e.schema_prefixed(&[keyword, idx.as_str()]))
                .collect();
        }
    }
    if candidates.is_empty() && !allowed_types.is_empty() {
        let types = Value::Array(allowed_types.into_iter().map(Value::String).collect());
        let message = type_message(instance, &types);
        let error = ValidationError::new("type", &types, instance, schema, message)
            .schema_prefixed(&[keyword]);
        return vec![error];
    }
    vec![ValidationError::new(
        keyword,
        branches,
        instance,
        schema,
        format!(
            "`{}` is not valid under any of the given schemas",
            display_value(instance)
        ),
    )]
}

fn is_type(instance: &Value, name: &str) -> bool {
    match name {
        "string" => instance.is_string(),
        "number" => instance.is_number(),
        "integer" => match instance {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        _ => false,
    }
}

fn check_type(instance: &Value, types: &Value, schema: &Value) -> Vec<ValidationError> {
    let names = type_names(types);
    if names.iter().any(|name| is_type(instance, name)) {
        return Vec::new();
    }
    vec![ValidationError::new(
        "type",
        types,
        instance,
        schema,
        type_message(instance, types),
    )]
}

fn check_enum(instance: &Value, options: &Value, schema: &Value) -> Vec<ValidationError> {
    let allowed = options
        .as_array()
        .is_some_and(|items| items.iter().any(|item| item == instance));
    if allowed {
        return Vec::new();
    }
    vec![ValidationError::new(
        "enum",
        options,
        instance,
        schema,
        enum_message(options),
    )]
}

fn check_const(instance: &Value, expected: &Value, schema: &Value) -> Vec<ValidationError> {
    if instance == expected {
        return Vec::new();
    }
    vec![ValidationError::new(
        "const",
        expected,
        instance,
        schema,
        format!("Must be `{}`", display_value(expected)),
    )]
}

fn check_required(instance: &Value, required: &Value, schema: &Value) -> Vec<ValidationError> {
    let Value::Object(map) = instance else {
        return Vec::new();
    };
    required
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|key| !map.contains_key(*key))
        .map(|key| {
            ValidationError::new(
                "required",
                required,
                instance,
                schema,
                format!("`{}` is a required property", key),
            )
        })
        .collect()
}

fn limit(value: &Value) -> Option<usize> {
    value.as_u64().map(|v| v as usize)
}

fn check_property_count(
    keyword: &str,
    instance: &Value,
    bound: &Value,
    schema: &Value,
) -> Vec<ValidationError> {
    let (Value::Object(map), Some(bound_n)) = (instance, limit(bound)) else {
        return Vec::new();
    };
    let (failed, message) = if keyword == "minProperties" {
        (map.len() < bound_n, format!("needs at least {} properties", bound_n))
    } else {
        (map.len() > bound_n, format!("allows at most {} properties", bound_n))
    };
    if failed {
        vec![ValidationError::new(keyword, bound, instance, schema, message)]
    } else {
        Vec::new()
    }
}

fn check_item_count(
    keyword: &str,
    instance: &Value,
    bound: &Value,
    schema: &Value,
) -> Vec<ValidationError> {
    let (Value::Array(items), Some(bound_n)) = (instance, limit(bound)) else {
        return Vec::new();
    };
    let (failed, message) = if keyword == "minItems" {
        (items.len() < bound_n, format!("needs at least {} items", bound_n))
    } else {
        (items.len() > bound_n, format!("allows at most {} items", bound_n))
    };
    if failed {
        vec![ValidationError::new(keyword, bound, instance, schema, message)]
    } else {
        Vec::new()
    }
}

fn check_unique(instance: &Value, unique: &Value, schema: &Value) -> Vec<ValidationError> {
    let (Value::Array(items), Some(true)) = (instance, unique.as_bool()) else {
        return Vec::new();
    };
    for (i, item) in items.iter().enumerate() {
        if items[i + 1..].contains(item) {
            return vec![ValidationError::new(
                "uniqueItems",
                unique,
                instance,
                schema,
                format!("`{}` appears more than once", display_value(item)),
            )];
        }
    }
    Vec::new()
}

fn check_length(keyword: &str, instance: &Value, bound: &Value, schema: &Value) -> Vec<ValidationError> {
    let (Some(text), Some(bound_n)) = (instance.as_str(), limit(bound)) else {
        return Vec::new();
    };
    let length = text.chars().count();
    let (failed, message) = if keyword == "minLength" {
        (length < bound_n, format!("`{}` is too short", text))
    } else {
        (length > bound_n, format!("`{}` is too long", text))
    };
    if failed {
        vec![ValidationError::new(keyword, bound, instance, schema, message)]
    } else {
        Vec::new()
    }
}

fn check_bound(
    keyword: &str,
    instance: &Value,
    bound: &Value,
    obj: &Map<String, Value>,
    schema: &Value,
) -> Vec<ValidationError> {
    let (Some(n), Some(b)) = (instance.as_f64(), bound.as_f64()) else {
        return Vec::new();
    };
    let minimum = keyword == "minimum";
    let exclusive_key = if minimum { "exclusiveMinimum" } else { "exclusiveMaximum" };
    let exclusive = obj.get(exclusive_key).and_then(Value::as_bool).unwrap_or(false);
    let failed = match (minimum, exclusive) {
        (true, false) => n < b,
        (true, true) => n <= b,
        (false, false) => n > b,
        (false, true) => n >= b,
    };
    if !failed {
        return Vec::new();
    }
    let relation = match (minimum, exclusive) {
        (true, false) => "less than the minimum of",
        (true, true) => "less than or equal to the minimum of",
        (false, false) => "greater than the maximum of",
        (false, true) => "greater than or equal to the maximum of",
    };
    vec![ValidationError::new(
        keyword,
        bound,
        instance,
        schema,
        format!("{} is {} {}", instance, relation, bound),
    )]
}

fn check_exclusive_bound(
    keyword: &str,
    instance: &Value,
    bound: &Value,
    schema: &Value,
) -> Vec<ValidationError> {
    let (Some(n), Some(b)) = (instance.as_f64(), bound.as_f64()) else {
        return Vec::new();
    };
    let (failed, relation) = if keyword == "exclusiveMinimum" {
        (n <= b, "less than or equal to")
    } else {
        (n >= b, "greater than or equal to")
    };
    if !failed {
        return Vec::new();
    }
    vec![ValidationError::new(
        keyword,
        bound,
        instance,
        schema,
        format!("{} is {} {}", instance, relation, bound),
    )]
}

fn check_multiple_of(instance: &Value, factor: &Value, schema: &Value) -> Vec<ValidationError> {
    let (Some(n), Some(f)) = (instance.as_f64(), factor.as_f64()) else {
        return Vec::new();
    };
    if f == 0.0 {
        return Vec::new();
    }
    let quotient = n / f;
    if (quotient - quotient.round()).abs() < 1e-9 {
        return Vec::new();
    }
    vec![ValidationError::new(
        "multipleOf",
        factor,
        instance,
        schema,
        format!("{} is not a multiple of {}", instance, factor),
    )]
}
