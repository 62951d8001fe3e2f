//! Cron schedules with APScheduler-style field defaulting
//!
//! Fields more significant than the least significant one given default to
//! `*`; less significant ones default to their minimum. `{hour: 3}` fires
//! daily at 03:00:00, `{day: 1}` at midnight on the first of each month.
//! `day_of_week` counts from 0 = monday.

use chrono::{DateTime, Datelike, Local, Utc};
use cron::Schedule;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::{Result, SchedulerError};

/// Config keys, most significant first
const FIELDS: [&str; 7] = ["year", "month", "day", "week", "day_of_week", "hour", "minute"];

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Iterations searched for a time in an allowed ISO week
const MAX_WEEK_SEARCH: usize = 1000;

/// A `schedule:` config block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    values: BTreeMap<&'static str, String>,
}

/// A parsed cron spec ready to compute fire times
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: Schedule,
    weeks: Option<Vec<u32>>,
}

impl CronSpec {
    /// Read the config block; values may be integers or strings
    pub fn from_config(spec: &Map<String, Value>) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (key, value) in spec {
            let Some(field) = FIELDS.iter().find(|f| **f == key.as_str()) else {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "unknown schedule field `{}`",
                    key
                )));
            };
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "invalid value `{}` for `{}`",
                        other, key
                    )))
                }
            };
            values.insert(*field, text);
        }
        if values.is_empty() {
            return Err(SchedulerError::InvalidSchedule(
                "schedule needs at least one field".to_string(),
            ));
        }
        Ok(Self { values })
    }

    /// Value of a field as written in the config
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Every field with defaults applied, most significant first, plus second
    fn resolved(&self) -> Vec<(&'static str, String)> {
        let minimums = ["*", "1", "1", "*", "*", "0", "0"];
        let last_given = FIELDS
            .iter()
            .rposition(|f| self.values.contains_key(f))
            .unwrap_or(0);
        let mut out: Vec<(&'static str, String)> = FIELDS
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = match self.values.get(name) {
                    Some(v) => v.clone(),
                    None if i > last_given => minimums[i].to_string(),
                    None => "*".to_string(),
                };
                (*name, value)
            })
            .collect();
        out.push(("second", "0".to_string()));
        out
    }

    /// Expression in the `cron` crate layout: `sec min hour dom month dow year`
    pub fn expression(&self) -> Result<String> {
        let resolved: BTreeMap<&str, String> = self.resolved().into_iter().collect();
        let get = |name: &str| resolved.get(name).cloned().unwrap_or_else(|| "*".to_string());
        Ok(format!(
            "{} {} {} {} {} {} {}",
            get("second"),
            get("minute"),
            get("hour"),
            get("day"),
            get("month"),
            day_of_week_names(&get("day_of_week"))?,
            get("year"),
        ))
    }

    /// Validate every field and build the schedule
    pub fn to_schedule(&self) -> Result<CronSchedule> {
        for (name, value) in &self.values {
            check_field(name, value)?;
        }
        let weeks = match self.values.get("week") {
            Some(expr) if expr != "*" => Some(expand_field(expr, 1, 53)?),
            _ => None,
        };
        let expression = self.expression()?;
        let schedule = Schedule::from_str(&expression).map_err(|e| {
            SchedulerError::InvalidSchedule(format!("invalid schedule `{}`: {}", expression, e))
        })?;
        Ok(CronSchedule { schedule, weeks })
    }
}

impl CronSchedule {
    /// First fire time strictly after `after`, evaluated in local time
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&Local);
        let mut upcoming = self.schedule.after(&local);
        match &self.weeks {
            None => upcoming.next(),
            Some(weeks) => upcoming
                .take(MAX_WEEK_SEARCH)
                .find(|t| weeks.contains(&t.iso_week().week())),
        }
        .map(|t| t.with_timezone(&Utc))
    }
}

/// Check one field on its own so errors name the offending key
fn check_field(name: &str, value: &str) -> Result<()> {
    let invalid = |message: String| {
        SchedulerError::InvalidSchedule(format!(
            "invalid value `{}` for `{}`: {}",
            value, name, message
        ))
    };
    if name == "week" {
        return expand_field(value, 1, 53).map(|_| ()).map_err(|e| invalid(e.to_string()));
    }
    let mut parts = ["0", "*", "*", "*", "*", "*", "*"].map(str::to_string);
    let slot = match name {
        "minute" => 1,
        "hour" => 2,
        "day" => 3,
        "month" => 4,
        "day_of_week" => 5,
        _ => 6,
    };
    parts[slot] = if name == "day_of_week" {
        day_of_week_names(value).map_err(|e| invalid(e.to_string()))?
    } else {
        value.to_string()
    };
    Schedule::from_str(&parts.join(" "))
        .map(|_| ())
        .map_err(|e| invalid(e.to_string()))
}

/// Rewrite numeric weekdays (0 = monday) as names the `cron` crate reads
fn day_of_week_names(expr: &str) -> Result<String> {
    let convert = |token: &str| -> Result<String> {
        match token.parse::<usize>() {
            Ok(n) => WEEKDAYS
                .get(n)
                .map(|d| d.to_string())
                .ok_or_else(|| SchedulerError::InvalidSchedule(format!("weekday `{}` out of range 0-6", n))),
            Err(_) => Ok(token.to_string()),
        }
    };
    expr.split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let range = match range.split_once('-') {
                Some((start, end)) => format!("{}-{}", convert(start.trim())?, convert(end.trim())?),
                None => convert(range.trim())?,
            };
            Ok(match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.join(","))
}

/// Expand `*`, `a`, `a-b`, `*/n`, `a-b/n` and comma lists into values
fn expand_field(expr: &str, min: u32, max: u32) -> Result<Vec<u32>> {
    let invalid = || SchedulerError::InvalidSchedule(format!("invalid expression `{}`", expr));
    let number = |s: &str| -> Result<u32> {
        s.trim()
            .parse::<u32>()
            .ok()
            .filter(|n| (min..=max).contains(n))
            .ok_or_else(invalid)
    };
    let mut values = Vec::new();
    for part in expr.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, step.trim().parse::<u32>().ok().filter(|s| *s > 0).ok_or_else(invalid)?),
            None => (part, 1),
        };
        let (start, end) = match range.trim() {
            "*" => (min, max),
            single if !single.contains('-') => {
                let n = number(single)?;
                (n, if step > 1 { max } else { n })
            }
            span => {
                let (a, b) = span.split_once('-').ok_or_else(invalid)?;
                (number(a)?, number(b)?)
            }
        };
        if start > end {
            return Err(invalid());
        }
        values.extend((start..=end).step_by(step as usize));
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}
