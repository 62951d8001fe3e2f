//! Error types for flexget-core
//!
//! Per-concern error enums live next to the code that raises them
//! ([`EntryError`], [`PluginError`], [`SchedulerError`](crate::scheduler::SchedulerError));
//! [`Error`] is the umbrella type returned by [`Manager`](crate::Manager).

use flexget_schema::{SchemaError, ValidationError};
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Broken schema or unresolvable `$ref` (a programming error)
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The config file failed validation
    #[error("config is invalid:\n{}", format_errors(.errors))]
    InvalidConfig {
        /// Every validation error found
        errors: Vec<ValidationError>,
    },

    /// The config file could not be parsed
    #[error("config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Config file could not be read
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Reload requested but the config did not come from a file
    #[error("no config file loaded")]
    NoConfigFile,

    /// A task name that is not in the config
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// An event subscriber failed
    #[error("event `{event}` handler `{subscriber}` failed: {message}")]
    Event {
        /// Event name
        event: String,
        /// Subscriber name
        subscriber: String,
        /// Failure description
        message: String,
    },

    /// Entry model misuse
    #[error(transparent)]
    Entry(#[from] EntryError),

    /// Scheduler failure
    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::SchedulerError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Render validation errors one per line
#[must_use]
pub fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Entry model errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntryError {
    /// A lazy field referenced a lookup id nobody registered
    #[error("lazy lookup `{0}` is not registered")]
    UnknownLookup(String),

    /// Raw bytes that are not valid UTF-8
    #[error("field `{0}` must be text, got non UTF-8 bytes")]
    NotText(String),

    /// Unknown hook action name
    #[error("`{0}` is not a valid hook action, expected one of: accept, reject, fail, complete")]
    InvalidHookAction(String),

    /// Unknown trace operation name
    #[error("`{0}` is not a valid trace operation, expected one of: accept, reject, fail")]
    InvalidOperation(String),

    /// A serialized entry could not be restored
    #[error("cannot deserialize entry: {0}")]
    Deserialize(String),
}

/// Errors a plugin handler can return
#[derive(Debug, Error)]
pub enum PluginError {
    /// User facing problem (bad credentials, unreachable feed); aborts the task
    #[error("{message}")]
    Error {
        /// Message shown to the user
        message: String,
    },

    /// The plugin skips its contribution; the task continues
    #[error("{message}")]
    Warning {
        /// Message logged as a warning
        message: String,
    },

    /// Control-flow abort raised by [`Task::abort`](crate::task::Task::abort)
    #[error("task aborted: {reason}")]
    Abort {
        /// Why the task was aborted
        reason: String,
        /// Log at debug level only
        silent: bool,
    },

    /// Unexpected failure; logged and converted into an abort
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PluginError {
    /// User facing error
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Warning: skip this plugin's contribution
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }
}

impl From<EntryError> for PluginError {
    fn from(err: EntryError) -> Self {
        Self::Internal(anyhow::Error::new(err))
    }
}

/// Result type for plugin handlers
pub type PluginResult<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalid_config_lists_errors() {
        let registry = flexget_schema::SchemaRegistry::new();
        let errors = registry
            .validate(&json!({"a": 1}), &json!({"properties": {"a": {"type": "string"}}}))
            .unwrap();
        let err = Error::InvalidConfig { errors };
        assert_eq!(
            err.to_string(),
            "config is invalid:\n  [/a] Got `1`, expected: string"
        );
    }

    #[test]
    fn test_plugin_error_messages() {
        assert_eq!(PluginError::error("bad password").to_string(), "bad password");
        let abort = PluginError::Abort {
            reason: "manual".to_string(),
            silent: true,
        };
        assert_eq!(abort.to_string(), "task aborted: manual");
        let internal: PluginError = EntryError::UnknownLookup("imdb".to_string()).into();
        assert!(matches!(internal, PluginError::Internal(_)));
    }

    #[test]
    fn test_entry_error_messages() {
        let err = EntryError::InvalidHookAction("explode".to_string());
        assert!(err.to_string().contains("accept, reject, fail, complete"));
    }
}
