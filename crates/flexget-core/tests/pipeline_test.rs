//! Task pipeline integration tests
//!
//! Runs whole tasks through a manager with the builtin plugins and a probe
//! plugin that counts phase calls.

use async_trait::async_trait;
use flexget_core::plugins::{mock_output_entries, register_builtins};
use flexget_core::{
    Entry, FlexgetEvent, Manager, Phase, Plugin, PluginDefinition, PluginError, PluginRegistry,
    PluginResult, Task, TaskOptions,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Default)]
struct Counters {
    input: AtomicUsize,
    learn: AtomicUsize,
    exit: AtomicUsize,
    abort: AtomicUsize,
}

impl Counters {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct ProbePlugin {
    definition: PluginDefinition,
    counters: Arc<Counters>,
}

impl ProbePlugin {
    fn new(counters: Arc<Counters>) -> Self {
        let definition = PluginDefinition::new("probe")
            .with_phase(Phase::Input)
            .with_phase(Phase::Filter)
            .with_phase(Phase::Output)
            .with_phase(Phase::Learn)
            .with_phase(Phase::Exit)
            .with_phase(Phase::Abort)
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "rerun": {"type": "boolean"},
                    "fail": {"type": "string", "enum": ["error", "warning", "internal"]}
                },
                "additionalProperties": false
            }));
        Self {
            definition,
            counters,
        }
    }
}

#[async_trait]
impl Plugin for ProbePlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn on_task_input(&self, _task: &mut Task, _config: &Value) -> PluginResult<Vec<Entry>> {
        self.counters.input.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn on_task_filter(&self, _task: &mut Task, config: &Value) -> PluginResult<()> {
        match config.get("fail").and_then(Value::as_str) {
            Some("error") => Err(PluginError::error("boom")),
            Some("warning") => Err(PluginError::warning("careful")),
            Some("internal") => Err(anyhow::anyhow!("kaput").into()),
            _ => Ok(()),
        }
    }

    async fn on_task_output(&self, task: &mut Task, config: &Value) -> PluginResult<()> {
        if config.get("rerun").and_then(Value::as_bool).unwrap_or(false) {
            task.rerun("probe wants another pass");
        }
        Ok(())
    }

    async fn on_task_learn(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        self.counters.learn.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_task_exit(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        self.counters.exit.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_task_abort(&self, _task: &mut Task, _config: &Value) -> PluginResult<()> {
        self.counters.abort.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn setup(yaml: &str) -> (Arc<Manager>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let mut plugins = PluginRegistry::new();
    register_builtins(&mut plugins);
    plugins.register(Arc::new(ProbePlugin::new(counters.clone())));
    let manager = Manager::new(plugins);
    manager.load_config_str(yaml).unwrap();
    (manager, counters)
}

#[tokio::test]
async fn test_max_reruns_limits_passes() {
    let (manager, counters) = setup(
        r#"
tasks:
  tv:
    mock: [a]
    probe: {rerun: yes}
    max_reruns: 1
"#,
    );
    let outcome = manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    assert_eq!(Counters::get(&counters.input), 2);
    assert_eq!(outcome.rerun_count, 1);
    assert_eq!(Counters::get(&counters.exit), 1);
    assert!(!outcome.is_aborted());
}

#[tokio::test]
async fn test_default_rerun_limit() {
    let (manager, counters) = setup("tasks:\n  tv:\n    probe: {rerun: yes}\n");
    let outcome = manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    assert_eq!(outcome.rerun_count, 5);
    assert_eq!(Counters::get(&counters.input), 6);
}

#[tokio::test]
async fn test_mock_output_accumulates_across_reruns() {
    let (manager, _) = setup(
        r#"
tasks:
  tv:
    mock: [{title: a, url: "http://a"}]
    accept_all: yes
    mock_output: yes
    probe: {rerun: yes}
    max_reruns: 1
"#,
    );
    manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    assert_eq!(mock_output_entries(&manager, "tv").len(), 2);

    // a new run starts from scratch
    manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    let recorded = mock_output_entries(&manager, "tv");
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].peek_str("title"), Some("a"));
}

#[tokio::test]
async fn test_error_aborts_and_runs_abort_phase() {
    let (manager, counters) = setup("tasks:\n  tv:\n    mock: [a]\n    probe: {fail: error}\n");
    let outcome = manager.execute_task("tv", TaskOptions::new()).await.unwrap();

    let abort = outcome.abort.clone().expect("task should abort");
    assert_eq!(abort.reason, "boom");
    assert_eq!(abort.plugin.as_deref(), Some("probe"));
    assert!(!abort.silent);
    assert!(outcome.check().is_err());

    assert_eq!(Counters::get(&counters.abort), 1);
    assert_eq!(Counters::get(&counters.exit), 0);
    assert_eq!(Counters::get(&counters.learn), 0);
}

#[tokio::test]
async fn test_warning_continues() {
    let (manager, counters) =
        setup("tasks:\n  tv:\n    mock: [a]\n    accept_all: yes\n    probe: {fail: warning}\n");
    let outcome = manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    assert!(!outcome.is_aborted());
    assert_eq!(outcome.accepted, 1);
    assert_eq!(Counters::get(&counters.exit), 1);
}

#[tokio::test]
async fn test_internal_error_becomes_abort() {
    let (manager, counters) = setup("tasks:\n  tv:\n    probe: {fail: internal}\n");
    let outcome = manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    let abort = outcome.abort.expect("task should abort");
    assert!(abort.reason.starts_with("BUG: Unhandled error in plugin probe"), "{}", abort.reason);
    assert_eq!(Counters::get(&counters.abort), 1);
}

#[tokio::test]
async fn test_test_mode_skips_learn() {
    let (manager, counters) = setup("tasks:\n  tv:\n    probe: {}\n");
    manager
        .execute_task("tv", TaskOptions::new().with_test(true))
        .await
        .unwrap();
    assert_eq!(Counters::get(&counters.learn), 0);

    manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    assert_eq!(Counters::get(&counters.learn), 1);
}

#[tokio::test]
async fn test_learn_mode_skips_output() {
    let (manager, _) =
        setup("tasks:\n  tv:\n    mock: [a]\n    accept_all: yes\n    mock_output: yes\n");
    let outcome = manager
        .execute_task("tv", TaskOptions::new().with_learn(true))
        .await
        .unwrap();
    assert_eq!(outcome.accepted, 1);
    assert!(mock_output_entries(&manager, "tv").is_empty());
}

#[tokio::test]
async fn test_inject_replaces_input() {
    let (manager, counters) = setup("tasks:\n  tv:\n    probe: {}\n    accept_all: yes\n");
    let options = TaskOptions::new().with_inject(vec![Entry::with_title_url("Injected", "http://x")]);
    let outcome = manager.execute_task("tv", options).await.unwrap();
    assert_eq!(Counters::get(&counters.input), 0);
    assert_eq!(outcome.accepted, 1);
}

#[tokio::test]
async fn test_templates() {
    let (manager, _) = setup(
        r#"
templates:
  global:
    accept_all: yes
  tv:
    mock: [{title: t, url: "http://t"}]
tasks:
  with_template:
    template: tv
  without_global:
    template: no
    mock: [{title: u, url: "http://u"}]
  missing:
    template: [nope]
"#,
    );
    let outcome = manager.execute_task("with_template", TaskOptions::new()).await.unwrap();
    assert_eq!(outcome.accepted, 1);

    let outcome = manager.execute_task("without_global", TaskOptions::new()).await.unwrap();
    assert_eq!(outcome.accepted, 0);
    assert_eq!(outcome.undecided, 1);

    let outcome = manager.execute_task("missing", TaskOptions::new()).await.unwrap();
    let abort = outcome.abort.expect("missing template should abort");
    assert!(abort.reason.contains("Unable to find template nope"), "{}", abort.reason);
}

#[tokio::test]
async fn test_disable_plugin() {
    let (manager, _) = setup(
        r#"
templates:
  global:
    accept_all: yes
tasks:
  tv:
    mock: [a]
    disable: [accept_all]
"#,
    );
    let outcome = manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    assert_eq!(outcome.accepted, 0);
    assert_eq!(outcome.undecided, 1);
}

#[tokio::test]
async fn test_include_files() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("accept.yml"), "accept_all: yes\n").unwrap();
    std::fs::write(dir.path().join("broken.yml"), "no_such_plugin: 1\n").unwrap();
    let config = dir.path().join("config.yml");
    std::fs::write(
        &config,
        r#"
tasks:
  good:
    mock: [a]
    include: accept.yml
  bad:
    mock: [a]
    include: [broken.yml]
"#,
    )
    .unwrap();

    let (manager, _) = setup("tasks: {}\n");
    manager.load_config_file(&config).await.unwrap();

    let outcome = manager.execute_task("good", TaskOptions::new()).await.unwrap();
    assert_eq!(outcome.accepted, 1);

    let outcome = manager.execute_task("bad", TaskOptions::new()).await.unwrap();
    let abort = outcome.abort.expect("invalid include should abort");
    assert!(abort.reason.contains("has errors"), "{}", abort.reason);
    assert!(!abort.silent);
}

#[tokio::test]
async fn test_regexp_and_quality() {
    let (manager, _) = setup(
        r#"
tasks:
  tv:
    mock:
      - {title: "Show.S01E01.720p.HDTV", url: "http://1"}
      - {title: "Show.S01E02.1080p.WEB-DL", url: "http://2"}
      - {title: "Other.S01E01.720p.HDTV", url: "http://3"}
    quality: 720p
    regexp:
      accept: [show]
      rest: reject
"#,
    );
    let outcome = manager.execute_task("tv", TaskOptions::new()).await.unwrap();
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.rejected, 2);
}

#[tokio::test]
async fn test_manual_task() {
    let (manager, counters) = setup("tasks:\n  backlog:\n    manual: yes\n    probe: {}\n");
    let outcome = manager.execute_task("backlog", TaskOptions::new()).await.unwrap();
    let abort = outcome.abort.clone().expect("manual task should abort");
    assert!(abort.silent);
    assert!(outcome.check().is_ok());
    assert_eq!(Counters::get(&counters.input), 0);

    let outcome = manager
        .execute_task("backlog", TaskOptions::new().with_allow_manual(true))
        .await
        .unwrap();
    assert!(!outcome.is_aborted());
    assert_eq!(Counters::get(&counters.input), 1);
}

#[tokio::test]
async fn test_task_events_are_broadcast() {
    let (manager, _) = setup("tasks:\n  tv:\n    probe: {fail: error}\n");
    let mut events = manager.events().subscribe();
    manager.execute_task("tv", TaskOptions::new()).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(&seen[0], FlexgetEvent::TaskStarted { task, .. } if task == "tv"));
    assert!(matches!(
        seen.last(),
        Some(FlexgetEvent::TaskCompleted { aborted: Some(reason), .. }) if reason == "boom"
    ));
}
