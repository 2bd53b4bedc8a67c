//! Cron normalization, due-check, cron field and interval parsing helpers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires 6 fields: `sec min hour day-of-month month day-of-week`.
/// Schedules use standard 5-field cron: `min hour day-of-month month day-of-week`.
pub fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Normalize and parse a cron expression.
pub fn parse_cron(expression: &str) -> Result<(String, Schedule), SchedulerError> {
    let normalized = normalize_cron(expression);
    let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
        expression: expression.trim().to_string(),
        reason: e.to_string(),
    })?;
    Ok((normalized, schedule))
}

/// Check if a cron schedule is due at `now`.
///
/// Due means a scheduled tick falls after `since` (exclusive) and at or
/// before `now` (inclusive).
pub fn is_cron_due(schedule: &Schedule, now: DateTime<Utc>, since: DateTime<Utc>) -> bool {
    schedule
        .after(&since)
        .next()
        .is_some_and(|next| next <= now)
}

/// Parse an interval such as "90s", "15m", "1h30m" or "1d".
///
/// Components are `d`, `h`, `m` and `s`. A bare number is seconds. Returns
/// `None` for empty, malformed or zero intervals.
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
            continue;
        }
        let n: u64 = num_buf.parse().ok()?;
        num_buf.clear();
        let unit = match ch {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
        found_unit = true;
    }

    if !num_buf.is_empty() {
        // "30m15" is ambiguous.
        if found_unit {
            return None;
        }
        total_secs = num_buf.parse().ok()?;
    }

    (total_secs > 0).then(|| Duration::from_secs(total_secs))
}

// ── CronFields ──────────────────────────────────────────────────────

/// The five fields of a standard cron expression. Unset fields are `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronFields {
    pub minute: String,
    pub hour: String,
    pub day: String,
    pub month: String,
    pub day_of_week: String,
}

impl Default for CronFields {
    fn default() -> Self {
        Self {
            minute: "*".to_string(),
            hour: "*".to_string(),
            day: "*".to_string(),
            month: "*".to_string(),
            day_of_week: "*".to_string(),
        }
    }
}

impl CronFields {
    pub fn minute(mut self, v: impl Into<String>) -> Self {
        self.minute = v.into();
        self
    }

    pub fn hour(mut self, v: impl Into<String>) -> Self {
        self.hour = v.into();
        self
    }

    pub fn day(mut self, v: impl Into<String>) -> Self {
        self.day = v.into();
        self
    }

    pub fn month(mut self, v: impl Into<String>) -> Self {
        self.month = v.into();
        self
    }

    pub fn day_of_week(mut self, v: impl Into<String>) -> Self {
        self.day_of_week = v.into();
        self
    }
}

impl fmt::Display for CronFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, self.day_of_week
        )
    }
}

impl FromStr for CronFields {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        match fields.as_slice() {
            [minute, hour, day, month, day_of_week] => Ok(Self {
                minute: minute.to_string(),
                hour: hour.to_string(),
                day: day.to_string(),
                month: month.to_string(),
                day_of_week: day_of_week.to_string(),
            }),
            _ => Err(SchedulerError::InvalidCron {
                expression: s.trim().to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            }),
        }
    }
}
