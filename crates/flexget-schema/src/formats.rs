//! Named `format` checkers
//!
//! A checker receives the instance and returns `Err(message)` when the value
//! is not acceptable. Checkers ignore values of types they do not apply to,
//! leaving that to the `type` keyword.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use crate::parse::{
    parse_episode_identifier, parse_interval, parse_percent, parse_size, parse_time,
};
use crate::quality::{Quality, Requirements};

/// A format checker
pub type FormatChecker = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Registry of named format checkers
pub struct FormatRegistry {
    checkers: RwLock<HashMap<String, FormatChecker>>,
    template_dirs: RwLock<Vec<PathBuf>>,
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.names();
        f.debug_struct("FormatRegistry")
            .field("formats", &names)
            .finish()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn empty() -> Self {
        Self {
            checkers: RwLock::new(HashMap::new()),
            template_dirs: RwLock::new(Vec::new()),
        }
    }

    /// Create a registry with all builtin formats
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register("quality", str_checker(|s| {
            Quality::parse(s).map(|_| ()).map_err(|e| e.to_string())
        }));
        registry.register("quality_requirements", str_checker(|s| {
            Requirements::parse(s)
                .map(|_| ())
                .map_err(|e| format!("`{}` is not a valid quality requirement: {}", s, e))
        }));
        registry.register("time", str_checker(|s| {
            parse_time(s).map(|_| ()).map_err(|e| e.to_string())
        }));
        registry.register("interval", str_checker(|s| {
            parse_interval(s).map(|_| ()).map_err(|e| e.to_string())
        }));
        registry.register("percent", str_checker(|s| {
            parse_percent(s).map(|_| ()).map_err(|e| e.to_string())
        }));
        registry.register("regex", str_checker(|s| {
            Regex::new(s)
                .map(|_| ())
                .map_err(|e| format!("`{}` is not a valid regular expression: {}", s, e))
        }));
        registry.register("file", str_checker(check_file));
        registry.register("path", str_checker(check_path));
        registry.register("url", str_checker(check_url));
        registry.register(
            "size",
            Arc::new(|value: &Value| match value {
                Value::String(_) | Value::Number(_) => {
                    parse_size(value).map(|_| ()).map_err(|e| e.to_string())
                }
                _ => Ok(()),
            }),
        );
        registry.register(
            "episode_identifier",
            Arc::new(|value: &Value| episode_checker(value, false)),
        );
        registry.register(
            "episode_or_season_id",
            Arc::new(|value: &Value| episode_checker(value, true)),
        );
        registry
    }

    /// Register (or replace) a named checker
    pub fn register(&self, name: impl Into<String>, checker: FormatChecker) {
        if let Ok(mut checkers) = self.checkers.write() {
            checkers.insert(name.into(), checker);
        }
    }

    /// Directories searched by the `file_template` format
    pub fn set_template_dirs(&self, dirs: Vec<PathBuf>) {
        if let Ok(mut current) = self.template_dirs.write() {
            *current = dirs;
        }
    }

    /// Run the named checker; unknown formats always pass
    pub fn check(&self, name: &str, value: &Value) -> Result<(), String> {
        if name == "file_template" {
            return self.check_file_template(value);
        }
        let checker = self
            .checkers
            .read()
            .ok()
            .and_then(|checkers| checkers.get(name).cloned());
        match checker {
            Some(checker) => checker(value),
            None => Ok(()),
        }
    }

    /// Whether a checker exists for `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        name == "file_template"
            || self
                .checkers
                .read()
                .map(|checkers| checkers.contains_key(name))
                .unwrap_or(false)
    }

    /// Sorted list of known format names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .checkers
            .read()
            .map(|checkers| checkers.keys().cloned().collect())
            .unwrap_or_default();
        names.push("file_template".to_string());
        names.sort();
        names
    }

    fn check_file_template(&self, value: &Value) -> Result<(), String> {
        let Value::String(name) = value else {
            return Ok(());
        };
        if name.trim().is_empty() {
            return Err("template name must not be empty".to_string());
        }
        let dirs = self
            .template_dirs
            .read()
            .map(|dirs| dirs.clone())
            .unwrap_or_default();
        if dirs.is_empty() {
            return Ok(());
        }
        let found = dirs.iter().any(|dir| {
            dir.join(name).is_file() || dir.join(format!("{}.template", name)).is_file()
        });
        if found {
            Ok(())
        } else {
            Err(format!("template `{}` not found", name))
        }
    }
}

fn str_checker<F>(check: F) -> FormatChecker
where
    F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(move |value: &Value| match value {
        Value::String(s) => check(s),
        _ => Ok(()),
    })
}

fn episode_checker(value: &Value, allow_season: bool) -> Result<(), String> {
    match value {
        Value::String(_) | Value::Number(_) => parse_episode_identifier(value, allow_season)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        _ => Ok(()),
    }
}

/// Expand a leading `~` to the home directory
#[must_use]
pub fn expand_user(input: &str) -> PathBuf {
    if let Some(rest) = input.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(input)
}

fn check_file(input: &str) -> Result<(), String> {
    if expand_user(input).is_file() {
        Ok(())
    } else {
        Err(format!("`{}` does not exist", input))
    }
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[{%].*[}%]\}").expect("template regex is valid"))
}

fn check_path(input: &str) -> Result<(), String> {
    // Only the static part of a templated path has to exist
    let static_part = match template_regex().find(input) {
        Some(m) => {
            let prefix = &input[..m.start()];
            match prefix.rfind(['/', '\\']) {
                Some(0) => "/".to_string(),
                Some(idx) => prefix[..idx].to_string(),
                None => String::new(),
            }
        }
        None => input.to_string(),
    };
    if static_part.is_empty() {
        return Ok(());
    }
    if expand_user(&static_part).is_dir() {
        Ok(())
    } else {
        Err(format!("`{}` does not exist", static_part))
    }
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(ftp|http|https|file|udp|socks5h?)://(\S+)$").expect("url regex is valid")
    })
}

fn check_url(input: &str) -> Result<(), String> {
    if input.contains("{{") || url_regex().is_match(input) {
        Ok(())
    } else {
        Err(format!("`{}` is not a valid url", input))
    }
}

#[cfg(test)]
mod tests;
