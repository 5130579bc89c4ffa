//! Cron expression normalization and parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// Normalize a standard 5-field cron expression to the 6-field form the
/// `cron` crate expects, by prepending a seconds field. Expressions that
/// already carry 6 or 7 fields pass through untouched.
pub(crate) fn normalize(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(&normalize(expr)).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        message: e.to_string(),
    })
}

/// The first fire time strictly after `after`, or None for a schedule with no
/// future firings.
pub fn next_fire_time(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let schedule = parse_schedule(expr)?;
    Ok(schedule.after(&after).next())
}
