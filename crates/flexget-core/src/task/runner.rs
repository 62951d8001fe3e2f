//! Phase execution for [`Task`]

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::Task;
use crate::entry::Entry;
use crate::error::{format_errors, PluginError};
use crate::event_bus::FlexgetEvent;
use crate::plugin::{call_phase, Phase, Plugin};
use crate::task::TaskOutcome;

impl Task {
    /// Run the task to completion, rerunning while requested and allowed.
    pub async fn execute(mut self) -> TaskOutcome {
        debug!(task = %self.name, run_id = %self.run_id, "Executing task");
        self.fire(FlexgetEvent::TaskStarted {
            task: self.name.clone(),
            run_id: self.run_id,
        });

        loop {
            self.run_pass().await;
            if self.abort.is_some() {
                break;
            }
            let Some(reason) = self.rerun_reason.take() else {
                break;
            };
            if self.rerun_count >= self.max_reruns {
                info!(
                    task = %self.name,
                    reruns = self.rerun_count,
                    "Task has been re-run {} times already. Stopping for now", self.rerun_count
                );
                break;
            }
            info!(task = %self.name, reason = %reason, "Rerunning the task");
            self.rerun_count += 1;
            self.entries.clear();
        }

        let outcome = self.outcome();
        self.fire(FlexgetEvent::TaskCompleted {
            task: self.name.clone(),
            run_id: self.run_id,
            aborted: outcome.abort.as_ref().map(|a| a.reason.clone()),
        });
        outcome
    }

    fn fire(&self, event: FlexgetEvent) {
        if let Err(e) = self.manager.events().fire(event) {
            warn!(task = %self.name, error = %e, "Event handler failed");
        }
    }

    fn will_rerun(&self) -> bool {
        self.abort.is_none() && self.rerun_reason.is_some() && self.rerun_count < self.max_reruns
    }

    fn phase_disabled(&self, phase: Phase) -> bool {
        if self.options.disable_phases.contains(&phase) {
            return true;
        }
        match phase {
            Phase::Input => !self.options.inject.is_empty(),
            Phase::Download | Phase::Output => self.options.learn,
            Phase::Learn => self.options.test,
            _ => false,
        }
    }

    async fn run_pass(&mut self) {
        if !self.options.inject.is_empty() {
            let injected: Vec<Entry> = self.options.inject.clone();
            for entry in injected {
                self.add_entry(entry, "inject");
            }
        }

        for phase in Phase::PIPELINE {
            if self.phase_disabled(phase) {
                debug!(task = %self.name, phase = %phase, "Phase disabled");
                continue;
            }
            if matches!(phase, Phase::Prepare | Phase::Start) && self.is_rerun() {
                debug!(task = %self.name, phase = %phase, "Skipping phase during rerun");
                continue;
            }
            if phase == Phase::Exit && self.will_rerun() {
                debug!(task = %self.name, "Not running exit yet because task will rerun");
                continue;
            }

            self.run_phase(phase).await;
            if phase == Phase::Prepare && self.abort.is_none() {
                self.validate_config();
            }
            if self.abort.is_some() {
                break;
            }
        }

        if let Some(abort) = self.abort.clone() {
            if abort.silent {
                debug!(task = %self.name, reason = %abort.reason, "Task aborted silently");
            } else {
                warn!(
                    task = %self.name,
                    plugin = abort.plugin.as_deref().unwrap_or("-"),
                    reason = %abort.reason,
                    "Aborting task"
                );
            }
            self.run_phase(Phase::Abort).await;
        }

        for entry in &mut self.entries {
            entry.complete(Map::new());
        }
    }

    /// Plugin config for this run, `None` when the plugin must not run
    fn plugin_config(&self, plugin: &dyn Plugin) -> Option<Value> {
        let def = plugin.definition();
        if self.disabled_plugins.contains(&def.name) {
            return None;
        }
        match self.config.get(&def.name) {
            Some(config) => Some(config.clone()),
            None if def.builtin && !self.builtins_disabled => Some(Value::Null),
            None => None,
        }
    }

    async fn run_phase(&mut self, phase: Phase) {
        self.current_phase = Some(phase);
        let handlers = self.manager.plugins().for_phase(phase);
        for plugin in handlers {
            if phase != Phase::Abort && self.abort.is_some() {
                break;
            }
            let Some(mut config) = self.plugin_config(plugin.as_ref()) else {
                continue;
            };
            let name = plugin.definition().name.clone();
            if phase == Phase::Prepare && !config.is_null() {
                match self.validate_plugin_config(&name, config) {
                    Some(validated) => config = validated,
                    None => break,
                }
            }

            debug!(task = %self.name, plugin = %name, phase = %phase, "Running plugin");
            self.current_plugin = Some(name.clone());
            self.scope.set_current_plugin(Some(&name));
            let result = call_phase(plugin.as_ref(), phase, self, &config).await;
            match result {
                Ok(entries) => {
                    for entry in entries {
                        self.add_entry(entry, &name);
                    }
                }
                Err(PluginError::Warning { message }) => {
                    warn!(task = %self.name, plugin = %name, phase = %phase, "{}", message);
                }
                Err(PluginError::Error { message }) => {
                    error!(task = %self.name, plugin = %name, phase = %phase, "{}", message);
                    self.abort(message, false);
                }
                Err(PluginError::Abort { reason, .. }) if phase == Phase::Abort => {
                    error!(task = %self.name, plugin = %name, "Abort handler aborted: {}", reason);
                }
                Err(PluginError::Abort { reason, silent }) => {
                    self.abort(reason, silent);
                }
                Err(PluginError::Internal(e)) => {
                    error!(
                        task = %self.name,
                        plugin = %name,
                        phase = %phase,
                        error = ?e,
                        "BUG: Unhandled error in plugin"
                    );
                    self.abort(format!("BUG: Unhandled error in plugin {}: {}", name, e), false);
                }
            }
            self.current_plugin = None;
            self.scope.set_current_plugin(None);
        }
        self.current_phase = None;
    }

    fn add_entry(&mut self, mut entry: Entry, source: &str) {
        if !entry.is_valid() {
            warn!(task = %self.name, plugin = source, entry = %entry, "Input did not return a valid entry");
            return;
        }
        if self.entries.iter().any(|e| e == &entry) {
            debug!(task = %self.name, plugin = source, entry = %entry, "Dropping duplicate entry");
            return;
        }
        entry.attach_scope(self.scope.clone());
        self.entries.push(entry);
    }

    /// Validate a single prepare-phase plugin config with defaults.
    fn validate_plugin_config(&mut self, name: &str, mut config: Value) -> Option<Value> {
        let path = format!("/schema/plugin/{}", name);
        let schemas = self.manager.schemas().clone();
        if !schemas.contains(&path) {
            return Some(config);
        }
        match schemas.process_config(&mut config, &json!({"$ref": path}), true) {
            Ok(errors) if errors.is_empty() => Some(config),
            Ok(errors) => {
                let reason = format!(
                    "Invalid `{}` config:\n{}",
                    name,
                    format_errors(&errors)
                );
                self.abort(reason, false);
                None
            }
            Err(e) => {
                self.abort(format!("BUG: schema error for `{}`: {}", name, e), false);
                None
            }
        }
    }

    /// Validate the merged task config against every plugin schema.
    fn validate_config(&mut self) {
        let mut config = Value::Object(std::mem::take(&mut self.config));
        let schemas = self.manager.schemas().clone();
        let result = schemas.process_config(&mut config, &json!({"$ref": "/schema/plugins"}), true);
        if let Value::Object(map) = config {
            self.config = map;
        }
        match result {
            Ok(errors) if errors.is_empty() => {}
            Ok(errors) => {
                for err in &errors {
                    error!(task = %self.name, path = %err.json_pointer(), "{}", err.message);
                }
                self.abort(format!("Invalid task config:\n{}", format_errors(&errors)), false);
            }
            Err(e) => {
                self.abort(format!("BUG: schema error: {}", e), false);
            }
        }
    }
}
