use super::*;
use crate::scheduler::store::MemoryTriggerStore;
use serde_json::json;

fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Local
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .earliest()
        .unwrap()
        .with_timezone(&Utc)
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[test]
fn test_never_run_interval_is_due_now() {
    let now = local(2026, 1, 14, 12, 0);
    let trigger = Trigger::new(
        vec!["tv".to_string()],
        Schedule::Interval(IntervalSpec::new(IntervalUnit::Hours, 2.0)),
        now,
    );
    assert_eq!(trigger.run_at(), now);
    assert!(trigger.should_run(now));
    assert!(!trigger.should_run(now - Duration::seconds(1)));
}

#[test]
fn test_interval_counts_from_last_run() {
    let last = local(2026, 1, 14, 12, 0);
    let interval = IntervalSpec::new(IntervalUnit::Minutes, 1.5);
    assert_eq!(interval.next_run(Some(last), last), last + Duration::seconds(90));
}

#[test]
fn test_on_day_picks_next_matching_weekday() {
    // 2026-01-14 is a wednesday
    let last = local(2026, 1, 14, 10, 0);
    let friday = IntervalSpec::new(IntervalUnit::Weeks, 1.0).with_on_day(Weekday::Fri);
    assert_eq!(friday.next_run(Some(last), last), local(2026, 1, 16, 10, 0));

    let wednesday = IntervalSpec::new(IntervalUnit::Weeks, 1.0).with_on_day(Weekday::Wed);
    assert_eq!(wednesday.next_run(Some(last), last), local(2026, 1, 21, 10, 0));

    let fortnightly = IntervalSpec::new(IntervalUnit::Weeks, 2.0).with_on_day(Weekday::Fri);
    assert_eq!(fortnightly.next_run(Some(last), last), local(2026, 1, 23, 10, 0));
}

#[test]
fn test_monday_is_a_real_on_day() {
    let last = local(2026, 1, 14, 10, 0);
    let monday = IntervalSpec::new(IntervalUnit::Weeks, 1.0).with_on_day(Weekday::Mon);
    assert_eq!(monday.next_run(Some(last), last), local(2026, 1, 19, 10, 0));
}

#[test]
fn test_at_time_replaces_time_of_day() {
    let last = local(2026, 1, 14, 10, 0);
    let daily = IntervalSpec::new(IntervalUnit::Days, 1.0).with_at_time(time(3, 0));
    assert_eq!(daily.next_run(Some(last), last), local(2026, 1, 15, 3, 0));

    let weekly = IntervalSpec::new(IntervalUnit::Weeks, 1.0)
        .with_on_day(Weekday::Sat)
        .with_at_time(time(23, 30));
    assert_eq!(weekly.next_run(Some(last), last), local(2026, 1, 17, 23, 30));
}

#[test]
fn test_jitter_stays_within_bound() {
    let last = local(2026, 1, 14, 10, 0);
    let interval = IntervalSpec::new(IntervalUnit::Hours, 1.0).with_jitter(30);
    for _ in 0..20 {
        let run_at = interval.next_run(Some(last), last);
        assert!(run_at >= last + Duration::hours(1));
        assert!(run_at <= last + Duration::hours(1) + Duration::seconds(30));
    }
}

#[test]
fn test_uid_ignores_task_order() {
    let now = Utc::now();
    let schedule = || Schedule::Interval(IntervalSpec::new(IntervalUnit::Hours, 1.0));
    let a = Trigger::new(vec!["a".to_string(), "b".to_string()], schedule(), now);
    let b = Trigger::new(vec!["b".to_string(), "a".to_string()], schedule(), now);
    assert_eq!(a.uid(), b.uid());
    assert_eq!(a.uid().len(), 64);

    let c = Trigger::new(
        vec!["a".to_string(), "b".to_string()],
        Schedule::Interval(IntervalSpec::new(IntervalUnit::Hours, 2.0)),
        now,
    );
    assert_ne!(a.uid(), c.uid());
}

#[test]
fn test_from_config() {
    let now = Utc::now();
    let trigger = Trigger::from_config(&json!({"tasks": "tv", "interval": {"hours": 2}}), now).unwrap();
    assert_eq!(trigger.tasks(), ["tv".to_string()]);
    assert!(matches!(
        trigger.schedule(),
        Schedule::Interval(IntervalSpec { unit: IntervalUnit::Hours, .. })
    ));

    let trigger = Trigger::from_config(
        &json!({"tasks": ["a", "b"], "interval": {"weeks": 1, "on_day": "monday", "at_time": "03:00 AM"}}),
        now,
    )
    .unwrap();
    let Schedule::Interval(interval) = trigger.schedule() else {
        panic!("expected an interval");
    };
    assert_eq!(interval.on_day, Some(Weekday::Mon));
    assert_eq!(interval.at_time, Some(time(3, 0)));

    let trigger = Trigger::from_config(&json!({"tasks": "*", "schedule": {"hour": 3}}), now).unwrap();
    assert!(matches!(trigger.schedule(), Schedule::Cron { .. }));
}

#[test]
fn test_from_config_rejects_invalid_combinations() {
    let now = Utc::now();
    for config in [
        json!({"tasks": "tv"}),
        json!({"tasks": "tv", "interval": {"hours": 1}, "schedule": {"hour": 1}}),
        json!({"tasks": "tv", "interval": {"days": 1, "on_day": "monday"}}),
        json!({"tasks": "tv", "interval": {"hours": 1, "at_time": "03:00"}}),
        json!({"tasks": "tv", "interval": {"days": 1.5, "at_time": "03:00"}}),
        json!({"tasks": "tv", "interval": {"weeks": 1.5, "on_day": "monday"}}),
        json!({"tasks": "tv", "interval": {"hours": 1, "minutes": 1}}),
    ] {
        let err = Trigger::from_config(&config, now).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)), "{}", config);
    }
}

#[tokio::test]
async fn test_trigger_records_and_reschedules() {
    let store = MemoryTriggerStore::new();
    let start = local(2026, 1, 14, 12, 0);
    let mut trigger = Trigger::new(
        vec!["tv".to_string()],
        Schedule::Interval(IntervalSpec::new(IntervalUnit::Hours, 1.0)),
        start,
    );
    assert!(trigger.last_run().is_none());

    trigger.trigger(&store, start).await.unwrap();
    assert_eq!(trigger.last_run(), Some(start));
    assert_eq!(trigger.run_at(), start + Duration::hours(1));
    assert_eq!(store.get(trigger.uid()).await.unwrap(), Some(start));

    let mut restored = Trigger::new(
        vec!["tv".to_string()],
        Schedule::Interval(IntervalSpec::new(IntervalUnit::Hours, 1.0)),
        start + Duration::minutes(10),
    );
    restored.load_last_run(&store, start + Duration::minutes(10)).await.unwrap();
    assert_eq!(restored.last_run(), Some(start));
    assert_eq!(restored.run_at(), start + Duration::hours(1));
}

#[test]
fn test_cron_trigger_runs_at_next_fire_time() {
    let now = local(2026, 1, 14, 12, 0);
    let trigger = Trigger::from_config(&json!({"tasks": "tv", "schedule": {"hour": 3}}), now).unwrap();
    assert_eq!(trigger.run_at(), local(2026, 1, 15, 3, 0));
    assert!(!trigger.should_run(now));
}
