//! Error types for flexget-schema
//!
//! Three kinds of failure live here and must not be confused:
//! - [`SchemaError`]: a bug in a schema or its registration (programming error)
//! - [`ValidationError`]: user data that does not match a schema
//! - [`ParseError`]: a value that one of the parse helpers could not understand

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Schema registry / schema document errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    /// A `$ref` pointed at a path nothing was registered under
    #[error("{0} could not be resolved")]
    Unresolvable(String),

    /// A local `#/...` pointer did not exist in the referencing document
    #[error("invalid local reference `{0}`")]
    InvalidPointer(String),

    /// The schema document itself is malformed
    #[error("malformed schema at `{path}`: {message}")]
    Malformed {
        /// JSON pointer into the schema document
        path: String,
        /// What is wrong
        message: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Failure of one of the `parse_*` helpers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One segment of an instance path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Object key
    Key(String),
    /// Array index
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{}", key),
            Self::Index(index) => write!(f, "{}", index),
        }
    }
}

/// A structured validation failure
///
/// Validation never stops at the first problem; callers receive every error
/// and decide which ones are fatal.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    /// Location of the offending value inside the validated instance
    pub path: Vec<PathSegment>,
    /// Location of the failing keyword inside the schema
    pub schema_path: Vec<String>,
    /// Name of the failing keyword (`type`, `enum`, `oneOf`, ...)
    pub validator: String,
    /// Value of the failing keyword in the schema
    pub validator_value: Value,
    /// The offending value
    pub instance: Value,
    /// Human readable message
    pub message: String,
    /// Schema node that contained the failing keyword
    #[serde(skip)]
    pub(crate) schema: Value,
}

impl ValidationError {
    pub(crate) fn new(
        validator: &str,
        validator_value: &Value,
        instance: &Value,
        schema: &Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: Vec::new(),
            schema_path: vec![validator.to_string()],
            validator: validator.to_string(),
            validator_value: validator_value.clone(),
            instance: instance.clone(),
            message: message.into(),
            schema: schema.clone(),
        }
    }

    /// JSON-pointer style rendering of [`ValidationError::path`]
    #[must_use]
    pub fn json_pointer(&self) -> String {
        let mut pointer = String::new();
        for segment in &self.path {
            pointer.push('/');
            pointer.push_str(&segment.to_string());
        }
        if pointer.is_empty() {
            pointer.push('/');
        }
        pointer
    }

    pub(crate) fn prefixed(mut self, segment: PathSegment, keyword: &[&str]) -> Self {
        self.path.insert(0, segment);
        for (i, part) in keyword.iter().enumerate() {
            self.schema_path.insert(i, (*part).to_string());
        }
        self
    }

    pub(crate) fn schema_prefixed(mut self, keyword: &[&str]) -> Self {
        for (i, part) in keyword.iter().enumerate() {
            self.schema_path.insert(i, (*part).to_string());
        }
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.json_pointer(), self.message)
    }
}

impl PartialEq for ValidationError {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.validator == other.validator
            && self.validator_value == other.validator_value
            && self.instance == other.instance
            && self.message == other.message
    }
}
