//! Parse helpers for human friendly config values
//!
//! Each helper tries the formats it knows about in turn and returns a
//! descriptive [`ParseError`] when none of them match.

use chrono::{Duration, NaiveTime};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::ParseError;

const TIME_FORMATS: &[&str] = &["%I:%M %p", "%I:%M%p", "%H:%M", "%H:%M:%S"];

/// Parse a wall-clock time such as `23:30`, `11:30 PM` or `07:00:15`.
pub fn parse_time(input: &str) -> Result<NaiveTime, ParseError> {
    let trimmed = input.trim();
    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(trimmed, format) {
            return Ok(time);
        }
    }
    Err(ParseError::new(format!("invalid time `{}`", input)))
}

fn interval_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+) (second|minute|hour|day|week)s?$").expect("interval regex is valid")
    })
}

/// Parse an interval such as `3 days` or `1 hour`.
pub fn parse_interval(input: &str) -> Result<Duration, ParseError> {
    let lowered = input.trim().to_lowercase();
    let caps = interval_regex().captures(&lowered).ok_or_else(|| {
        ParseError::new(format!(
            "`{}` is not a valid interval (e.g. `3 days`, `1 hour`)",
            input
        ))
    })?;
    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| ParseError::new(format!("interval amount too large in `{}`", input)))?;
    let duration = match &caps[2] {
        "second" => Duration::try_seconds(amount),
        "minute" => Duration::try_minutes(amount),
        "hour" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        _ => Duration::try_weeks(amount),
    };
    duration.ok_or_else(|| ParseError::new(format!("interval `{}` is out of range", input)))
}

/// Parse a percentage such as `50%` or `12.5`.
pub fn parse_percent(input: &str) -> Result<f64, ParseError> {
    input
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .map_err(|_| ParseError::new("should be in format '0-x%'"))
}

fn size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d+(?:[.,]\d+)?)\s*([KMGTP]i?)?B?$").expect("size regex is valid")
    })
}

const SIZE_PREFIXES: &[char] = &['K', 'M', 'G', 'T', 'P'];

/// Parse a file size into bytes.
///
/// Accepts bare integers (bytes) and amounts with a `K`, `M`, `G`, `T` or `P`
/// unit, optionally followed by `i` and/or `B`. Both unit families use a 1024
/// multiplier.
pub fn parse_size(input: &Value) -> Result<u64, ParseError> {
    match input {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ParseError::new(format!("{} does not look like a file size", n))),
        Value::String(s) => parse_size_str(s),
        other => Err(ParseError::new(format!(
            "{} does not look like a file size",
            other
        ))),
    }
}

/// String form of [`parse_size`]
pub fn parse_size_str(input: &str) -> Result<u64, ParseError> {
    let trimmed = input.trim();
    let caps = size_regex()
        .captures(trimmed)
        .ok_or_else(|| ParseError::new(format!("{} does not look like a file size", input)))?;
    let amount: f64 = caps[1]
        .replace(',', ".")
        .parse()
        .map_err(|_| ParseError::new(format!("{} does not look like a file size", input)))?;

    let Some(unit) = caps.get(2) else {
        return Ok(amount as u64);
    };
    let prefix = unit
        .as_str()
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('K');
    let order = SIZE_PREFIXES
        .iter()
        .position(|p| *p == prefix)
        .map(|i| i as i32 + 1)
        .unwrap_or(1);
    Ok((amount * 1024f64.powi(order)) as u64)
}

/// Kind of episode identifier recognised by [`parse_episode_identifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeIdKind {
    /// `S01E02` / `1x02`
    Episode,
    /// `S01`
    Season,
    /// `2024-01-31`
    Date,
    /// `123`
    Sequence,
}

fn episode_regexes() -> &'static [(Regex, EpisodeIdKind)] {
    static RE: OnceLock<Vec<(Regex, EpisodeIdKind)>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            (r"(?i)^S\d{1,4}E\d{1,4}$", EpisodeIdKind::Episode),
            (r"(?i)^\d{1,4}x\d{1,4}$", EpisodeIdKind::Episode),
            (r"^\d{4}-\d{2}-\d{2}$", EpisodeIdKind::Date),
            (r"^\d{1,5}$", EpisodeIdKind::Sequence),
            (r"(?i)^S\d{1,4}$", EpisodeIdKind::Season),
        ]
        .into_iter()
        .map(|(pattern, kind)| {
            (
                Regex::new(pattern).expect("episode regex is valid"),
                kind,
            )
        })
        .collect()
    })
}

/// Classify an episode identifier; seasons are only accepted when
/// `allow_season` is set.
pub fn parse_episode_identifier(
    input: &Value,
    allow_season: bool,
) -> Result<EpisodeIdKind, ParseError> {
    let text = match input {
        Value::Number(n) if n.is_u64() => return Ok(EpisodeIdKind::Sequence),
        Value::String(s) => s.trim(),
        other => {
            return Err(ParseError::new(format!(
                "`{}` is not a valid episode identifier",
                other
            )))
        }
    };
    for (re, kind) in episode_regexes() {
        if !re.is_match(text) {
            continue;
        }
        if *kind == EpisodeIdKind::Season && !allow_season {
            break;
        }
        if *kind == EpisodeIdKind::Date
            && chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_err()
        {
            break;
        }
        return Ok(*kind);
    }
    let what = if allow_season {
        "episode or season"
    } else {
        "episode"
    };
    Err(ParseError::new(format!(
        "`{}` is not a valid {} identifier",
        text, what
    )))
}
