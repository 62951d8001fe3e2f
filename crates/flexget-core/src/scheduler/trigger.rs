//! Triggers: which tasks run, and when
//!
//! Interval schedules pretend the previous run happened one period ago when
//! there is no recorded run, so a new trigger fires right away. `on_day` and
//! `at_time` are computed in local time.

use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone, Utc, Weekday};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

use flexget_schema::parse_time;

use super::cron::{CronSchedule, CronSpec};
use super::store::TriggerStore;
use super::{Result, SchedulerError};

/// Interval units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
    /// Weeks
    Weeks,
}

impl IntervalUnit {
    /// All units, smallest first
    pub const ALL: [IntervalUnit; 5] = [
        IntervalUnit::Seconds,
        IntervalUnit::Minutes,
        IntervalUnit::Hours,
        IntervalUnit::Days,
        IntervalUnit::Weeks,
    ];

    /// Config key of the unit
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
        }
    }

    fn seconds(self) -> f64 {
        match self {
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3_600.0,
            Self::Days => 86_400.0,
            Self::Weeks => 604_800.0,
        }
    }
}

/// A simple interval
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalSpec {
    /// Unit of `amount`
    pub unit: IntervalUnit,
    /// Number of units between runs
    pub amount: f64,
    /// Time of day to run at (days and weeks only)
    pub at_time: Option<NaiveTime>,
    /// Day of the week to run on (weeks only)
    pub on_day: Option<Weekday>,
    /// Up to this many seconds are added to each run time
    pub jitter: u32,
}

impl IntervalSpec {
    /// Interval of `amount` units
    #[must_use]
    pub fn new(unit: IntervalUnit, amount: f64) -> Self {
        Self {
            unit,
            amount,
            at_time: None,
            on_day: None,
            jitter: 0,
        }
    }

    /// Run at a time of day
    #[must_use]
    pub fn with_at_time(mut self, at_time: NaiveTime) -> Self {
        self.at_time = Some(at_time);
        self
    }

    /// Run on a day of the week
    #[must_use]
    pub fn with_on_day(mut self, on_day: Weekday) -> Self {
        self.on_day = Some(on_day);
        self
    }

    /// Randomize run times by up to `seconds`
    #[must_use]
    pub fn with_jitter(mut self, seconds: u32) -> Self {
        self.jitter = seconds;
        self
    }

    /// Read an `interval:` config block
    pub fn from_config(spec: &Map<String, Value>) -> Result<Self> {
        let mut units = IntervalUnit::ALL
            .iter()
            .filter_map(|u| spec.get(u.as_str()).and_then(Value::as_f64).map(|a| (*u, a)));
        let (unit, amount) = units.next().ok_or_else(|| {
            SchedulerError::InvalidSchedule("Schedule interval must provide a unit and amount".to_string())
        })?;
        if units.next().is_some() {
            return Err(SchedulerError::InvalidSchedule(
                "Schedule interval must provide exactly one unit".to_string(),
            ));
        }
        if amount <= 0.0 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "Interval amount must be positive, got {}",
                amount
            )));
        }
        let mut interval = Self::new(unit, amount);

        if let Some(at_time) = spec.get("at_time").and_then(Value::as_str) {
            let time = parse_time(at_time).map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
            interval = interval.with_at_time(time);
        }
        if let Some(on_day) = spec.get("on_day").and_then(Value::as_str) {
            let day = on_day
                .parse::<Weekday>()
                .map_err(|_| SchedulerError::InvalidSchedule(format!("`{}` is not a weekday", on_day)))?;
            interval = interval.with_on_day(day);
        }
        if let Some(jitter) = spec.get("jitter").and_then(Value::as_u64) {
            interval = interval.with_jitter(u32::try_from(jitter).unwrap_or(u32::MAX));
        }
        interval.check()?;
        Ok(interval)
    }

    fn check(&self) -> Result<()> {
        check_unit_rules(self.unit, self.amount, self.at_time.is_some(), self.on_day.is_some())
            .map_err(SchedulerError::InvalidSchedule)
    }

    /// Time between runs
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::milliseconds((self.amount * self.unit.seconds() * 1000.0).round() as i64)
    }

    /// Next run after `last_run`, or after `now - period` when never run
    #[must_use]
    pub fn next_run(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        let last = last_run.unwrap_or(now - self.period()).with_timezone(&Local);
        let mut run_at = match self.on_day {
            Some(day) => {
                let mut days_ahead = i64::from(day.num_days_from_monday())
                    - i64::from(last.weekday().num_days_from_monday());
                if days_ahead <= 0 {
                    days_ahead += 7;
                }
                let extra_weeks = (self.amount as i64 - 1).max(0);
                last + Duration::days(days_ahead) + Duration::weeks(extra_weeks)
            }
            None => last + self.period(),
        };
        if let Some(at_time) = self.at_time {
            let naive = run_at.date_naive().and_time(at_time);
            if let Some(local) = Local.from_local_datetime(&naive).earliest() {
                run_at = local;
            }
        }
        if self.jitter > 0 {
            let offset = rand::thread_rng().gen_range(0..=i64::from(self.jitter));
            run_at += Duration::seconds(offset);
        }
        run_at.with_timezone(&Utc)
    }

    fn uid_parts(&self) -> Vec<(String, String)> {
        let mut parts = vec![(self.unit.as_str().to_string(), self.amount.to_string())];
        if let Some(at_time) = self.at_time {
            parts.push(("at_time".to_string(), at_time.to_string()));
        }
        if let Some(on_day) = self.on_day {
            parts.push(("on_day".to_string(), on_day.to_string()));
        }
        if self.jitter > 0 {
            parts.push(("jitter".to_string(), self.jitter.to_string()));
        }
        parts
    }
}

/// `on_day` needs whole weeks; `at_time` needs whole days or weeks
fn check_unit_rules(unit: IntervalUnit, amount: f64, at_time: bool, on_day: bool) -> std::result::Result<(), String> {
    if on_day {
        if unit != IntervalUnit::Weeks {
            return Err("`on_day` can only be used with `weeks` unit".to_string());
        }
        if amount.fract() != 0.0 {
            return Err("`on_day` requires a whole number of weeks".to_string());
        }
    }
    if at_time {
        if !matches!(unit, IntervalUnit::Days | IntervalUnit::Weeks) {
            return Err("`at_time` can only be used with `days` or `weeks` unit".to_string());
        }
        if amount.fract() != 0.0 {
            return Err("`at_time` requires a whole number of days or weeks".to_string());
        }
    }
    Ok(())
}

/// Unit rules of a raw `interval:` block, for config validation.
///
/// Blocks without exactly one numeric unit pass; the schema reports those.
pub(crate) fn check_interval_config(spec: &Map<String, Value>) -> std::result::Result<(), String> {
    let units: Vec<(IntervalUnit, f64)> = IntervalUnit::ALL
        .iter()
        .filter_map(|u| spec.get(u.as_str()).and_then(Value::as_f64).map(|a| (*u, a)))
        .collect();
    match units.as_slice() {
        [(unit, amount)] => check_unit_rules(
            *unit,
            *amount,
            spec.contains_key("at_time"),
            spec.contains_key("on_day"),
        ),
        _ => Ok(()),
    }
}

/// When a trigger fires
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Every N units
    Interval(IntervalSpec),
    /// Cron-like calendar schedule
    Cron {
        /// Config as written
        spec: CronSpec,
        /// Parsed schedule
        schedule: CronSchedule,
    },
}

impl Schedule {
    /// Build a cron schedule
    pub fn cron(spec: CronSpec) -> Result<Self> {
        let schedule = spec.to_schedule()?;
        Ok(Self::Cron { spec, schedule })
    }

    fn uid_parts(&self) -> Vec<(String, String)> {
        match self {
            Self::Interval(interval) => interval.uid_parts(),
            Self::Cron { spec, .. } => ["year", "month", "day", "week", "day_of_week", "hour", "minute"]
                .iter()
                .filter_map(|f| spec.field(f).map(|v| (f.to_string(), v.to_string())))
                .collect(),
        }
    }
}

/// A set of tasks run on a schedule
#[derive(Debug, Clone)]
pub struct Trigger {
    tasks: Vec<String>,
    schedule: Schedule,
    uid: String,
    last_run: Option<DateTime<Utc>>,
    run_at: DateTime<Utc>,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec: Vec<String> = self
            .schedule
            .uid_parts()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "<Trigger(tasks={}, {})>", self.tasks.join(","), spec.join(", "))
    }
}

impl Trigger {
    /// Create a trigger that has never run
    #[must_use]
    pub fn new(tasks: Vec<String>, schedule: Schedule, now: DateTime<Utc>) -> Self {
        let uid = compute_uid(&tasks, &schedule);
        let mut trigger = Self {
            tasks,
            schedule,
            uid,
            last_run: None,
            run_at: now,
        };
        trigger.schedule_next_run(now);
        trigger
    }

    /// Read one entry of the `schedules` list
    pub fn from_config(config: &Value, now: DateTime<Utc>) -> Result<Self> {
        let invalid = |msg: &str| SchedulerError::InvalidSchedule(msg.to_string());
        let config = config.as_object().ok_or_else(|| invalid("schedule must be a mapping"))?;
        let tasks = match config.get("tasks") {
            Some(Value::String(task)) => vec![task.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => return Err(invalid("schedule must list `tasks`")),
        };
        let schedule = match (config.get("interval"), config.get("schedule")) {
            (Some(Value::Object(interval)), None) => Schedule::Interval(IntervalSpec::from_config(interval)?),
            (None, Some(Value::Object(cron))) => Schedule::cron(CronSpec::from_config(cron)?)?,
            _ => return Err(invalid("Either `schedule` or `interval` must be defined.")),
        };
        Ok(Self::new(tasks, schedule, now))
    }

    /// Stable id from the schedule and the task list, both order independent
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Task names or glob patterns
    #[must_use]
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    /// The schedule
    #[must_use]
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Last recorded run
    #[must_use]
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Next run time
    #[must_use]
    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    /// Restore the last run from `store` and reschedule
    pub async fn load_last_run(&mut self, store: &dyn TriggerStore, now: DateTime<Utc>) -> Result<()> {
        self.last_run = store.get(&self.uid).await?;
        self.schedule_next_run(now);
        Ok(())
    }

    /// Compute `run_at` from the last run
    pub fn schedule_next_run(&mut self, now: DateTime<Utc>) {
        self.run_at = match &self.schedule {
            Schedule::Interval(interval) => interval.next_run(self.last_run, now),
            Schedule::Cron { schedule, .. } => schedule
                .next_after(self.last_run.unwrap_or(now))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        debug!(trigger = %self, run_at = %self.run_at, "Scheduled next run");
    }

    /// Whether the trigger is due
    #[must_use]
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        now >= self.run_at
    }

    /// Record a run at `now`, persist it and schedule the next one.
    ///
    /// The next run is scheduled even when persisting fails.
    pub async fn trigger(&mut self, store: &dyn TriggerStore, now: DateTime<Utc>) -> Result<()> {
        self.last_run = Some(now);
        self.schedule_next_run(now);
        store.upsert(&self.uid, now).await
    }
}

fn compute_uid(tasks: &[String], schedule: &Schedule) -> String {
    let mut spec = schedule.uid_parts();
    spec.sort();
    let mut tasks = tasks.to_vec();
    tasks.sort();

    let kind = match schedule {
        Schedule::Interval(_) => "interval",
        Schedule::Cron { .. } => "schedule",
    };
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    for (key, value) in &spec {
        hasher.update(format!("{}={};", key, value).as_bytes());
    }
    hasher.update(b"|");
    hasher.update(tasks.join(",").as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests;
