use super::*;
use crate::scheduler::store::{MemoryTriggerStore, MockTriggerStore};
use crate::scheduler::{SchedulerError, DEFAULT_PRIORITY};
use chrono::Duration as ChronoDuration;

const TASKS: &str = r#"
tasks:
  TV-Shows:
    mock: [{title: a, url: "http://a"}]
    accept_all: yes
  tv-extra:
    priority: 1
    mock: [{title: b, url: "http://b"}]
  movies:
    mock: [{title: c, url: "http://c"}]
  backlog:
    manual: yes
    mock: [{title: d, url: "http://d"}]
    accept_all: yes
"#;

const SCHEDULES: &str = r#"
schedules:
  - tasks: ["tv*", movies]
    interval:
      hours: 1
"#;

fn manager(yaml: &str) -> Arc<Manager> {
    let manager = Manager::with_builtins();
    manager.load_config_str(yaml).unwrap();
    manager
}

fn new_scheduler(manager: Arc<Manager>) -> Arc<Scheduler> {
    let config = SchedulerConfig::new().with_poll_interval(Duration::from_millis(10));
    Scheduler::new(manager, Arc::new(MemoryTriggerStore::new()), config)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_select_tasks_in_pattern_order() {
    let tasks = names(&["TV-Shows", "tv-extra", "movies", "backlog"]);
    let selected = select_tasks(&tasks, Some(&names(&["movies", "TV*", "tv-extra"])));
    assert_eq!(
        selected,
        vec![
            ("movies".to_string(), true),
            ("TV-Shows".to_string(), false),
            ("tv-extra".to_string(), true),
        ]
    );

    let all = select_tasks(&tasks, None);
    assert_eq!(all.len(), 4);
    assert!(all.iter().all(|(_, exact)| !exact));

    assert!(select_tasks(&tasks, Some(&names(&["nothing*"]))).is_empty());
}

#[test]
fn test_glob_patterns() {
    let re = glob_regex("tv-?").unwrap();
    assert!(re.is_match("TV-1"));
    assert!(!re.is_match("tv-12"));

    let re = glob_regex("[ab]*").unwrap();
    assert!(re.is_match("Backlog"));
    assert!(!re.is_match("movies"));

    let re = glob_regex("[!m]*").unwrap();
    assert!(!re.is_match("movies"));
    assert!(re.is_match("tv"));

    let re = glob_regex("a.b").unwrap();
    assert!(!re.is_match("axb"));
}

#[tokio::test]
async fn test_execute_orders_by_task_priority() {
    let scheduler = new_scheduler(manager(&format!("{}{}", TASKS, SCHEDULES)));
    let handles = scheduler
        .execute(ExecuteOptions::new().with_tasks(names(&["tv*", "movies"])), DEFAULT_PRIORITY, None)
        .await;
    let order: Vec<&str> = handles.iter().map(|h| h.task()).collect();
    assert_eq!(order, vec!["tv-extra", "TV-Shows", "movies"]);
    assert_eq!(scheduler.queue().len().await, 3);
}

#[tokio::test]
async fn test_default_and_disabled_schedules() {
    let scheduler = new_scheduler(manager("tasks:\n  a:\n    accept_all: yes\n"));
    let triggers = scheduler.load_schedules().await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].tasks(), ["*".to_string()]);

    let scheduler = new_scheduler(manager("tasks: {}\nschedules: false\n"));
    assert!(scheduler.load_schedules().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_due_trigger_is_not_queued_twice() {
    let scheduler = new_scheduler(manager(&format!("{}{}", TASKS, SCHEDULES)));
    let triggers = scheduler.triggers().await;
    assert_eq!(triggers.len(), 1);
    let now = Utc::now();

    scheduler.queue_due_triggers(now).await;
    assert_eq!(scheduler.queue().len().await, 3);
    assert!(scheduler.queue().contains_trigger(triggers[0].uid()).await);

    // due again while the first batch is still waiting
    let later = now + ChronoDuration::hours(2);
    scheduler.queue_due_triggers(later).await;
    assert_eq!(scheduler.queue().len().await, 3);

    let trigger = scheduler.triggers().await.remove(0);
    assert_eq!(trigger.last_run(), Some(later));
    assert!(trigger.run_at() > later);
}

#[tokio::test]
async fn test_store_failure_still_advances_trigger() {
    let mut store = MockTriggerStore::new();
    store.expect_get().returning(|_| Ok(None));
    store
        .expect_upsert()
        .times(1)
        .returning(|_, _| Err(SchedulerError::Store("disk full".to_string())));
    let scheduler = Scheduler::new(manager(&format!("{}{}", TASKS, SCHEDULES)), Arc::new(store), SchedulerConfig::new());

    scheduler.triggers().await;
    let now = Utc::now();
    scheduler.queue_due_triggers(now).await;

    let trigger = scheduler.triggers().await.remove(0);
    assert_eq!(trigger.last_run(), Some(now));
    assert_eq!(trigger.run_at(), now + ChronoDuration::hours(1));
}

#[tokio::test]
async fn test_drain_shutdown_runs_queued_jobs() {
    let scheduler = new_scheduler(manager(&format!("{}schedules: false\n", TASKS)));
    let handles = scheduler
        .execute(ExecuteOptions::new().with_tasks(names(&["TV-Shows", "movies"])), DEFAULT_PRIORITY, None)
        .await;

    scheduler.request_shutdown(true);
    scheduler.run(CancellationToken::new()).await;

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.wait().await.unwrap());
    }
    assert_eq!(outcomes[0].task, "TV-Shows");
    assert_eq!(outcomes[0].accepted, 1);
    assert_eq!(outcomes[1].task, "movies");
    assert_eq!(outcomes[1].undecided, 1);
    assert!(scheduler.queue().is_empty().await);
}

#[tokio::test]
async fn test_immediate_shutdown_abandons_queue() {
    let manager = manager("tasks:\n  a:\n    accept_all: yes\n  b:\n    accept_all: yes\nschedules: false\n");
    let mut events = manager.events().subscribe();
    let scheduler = new_scheduler(manager);
    let handles = scheduler.execute(ExecuteOptions::new(), DEFAULT_PRIORITY, None).await;
    assert_eq!(handles.len(), 2);

    scheduler.request_shutdown(false);
    scheduler.run(CancellationToken::new()).await;

    for handle in handles {
        assert!(handle.wait().await.is_none());
    }
    let mut stopped = None;
    while let Ok(event) = events.try_recv() {
        if let FlexgetEvent::SchedulerStopped { remaining } = event {
            stopped = Some(remaining);
        }
    }
    assert_eq!(stopped, Some(2));
}

#[tokio::test]
async fn test_cancel_token_stops_loop() {
    let scheduler = new_scheduler(manager("tasks: {}\nschedules: false\n"));
    let token = CancellationToken::new();
    let runner = {
        let scheduler = scheduler.clone();
        let token = token.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_manual_task_needs_exact_name() {
    let scheduler = new_scheduler(manager(&format!("{}{}", TASKS, SCHEDULES)));

    let handles = scheduler
        .execute(
            ExecuteOptions::new().with_tasks(names(&["backlog"])).with_allow_manual(true),
            DEFAULT_PRIORITY,
            None,
        )
        .await;
    let handles_glob = scheduler
        .execute(
            ExecuteOptions::new().with_tasks(names(&["back*"])).with_allow_manual(true),
            DEFAULT_PRIORITY,
            None,
        )
        .await;
    scheduler.request_shutdown(true);
    scheduler.run(CancellationToken::new()).await;

    let exact = handles.into_iter().next().unwrap().wait().await.unwrap();
    assert!(!exact.is_aborted());
    assert_eq!(exact.accepted, 1);

    let glob = handles_glob.into_iter().next().unwrap().wait().await.unwrap();
    let abort = glob.abort.as_ref().expect("manual task should abort");
    assert!(abort.silent);
    assert!(glob.check().is_ok());
}
