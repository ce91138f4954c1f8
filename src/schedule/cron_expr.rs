//! Cron expression parsing and occurrence math.
//!
//! Accepts the classic 5-field form (`min hour dom month dow`) as well as the
//! seconds-first 6/7-field form understood by the `cron` crate. Validation
//! only checks that the expression parses; an expression that can never fire
//! (`0 5 31 2 *`) is accepted and simply has no upcoming occurrence.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ScheduleError;

/// A parsed cron rule together with the text it was parsed from.
#[derive(Clone)]
pub struct CronExpression {
    source: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::EmptyExpression);
        }

        let invalid = |reason: String| ScheduleError::InvalidExpression {
            expression: trimmed.to_string(),
            reason,
        };

        let normalized = normalize(trimmed).map_err(invalid)?;
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            source: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as written by the caller.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Occurrences from `next_run` up to and including `now`, at most `max`
    /// of them, plus the first occurrence after `now`.
    pub fn due_occurrences(
        &self,
        next_run: DateTime<Utc>,
        now: DateTime<Utc>,
        max: usize,
    ) -> (Vec<DateTime<Utc>>, Option<DateTime<Utc>>) {
        if next_run > now {
            return (Vec::new(), Some(next_run));
        }

        let mut due = vec![next_run];
        due.extend(
            self.schedule
                .after(&next_run)
                .take_while(|t| *t <= now)
                .take(max.saturating_sub(1)),
        );

        (due, self.next_after(now))
    }
}

impl FromStr for CronExpression {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Rewrite a 5-field expression into the seconds-first form.
fn normalize(expression: &str) -> Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let day_of_week = translate_day_of_week(fields[4])?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(format!("expected 5, 6 or 7 fields, found {n}")),
    }
}

/// Classic cron numbers weekdays 0-7 from Sunday (both 0 and 7 are Sunday);
/// the `cron` crate numbers them 1-7 from Sunday. Numeric ranges and steps are
/// expanded in classic numbering before each day is renumbered, so a step that
/// lands on 7 still means Sunday. A lone wildcard and named days pass through.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    let mut named = Vec::new();
    for part in field.split(',') {
        match expand_weekdays(part)? {
            Some(values) => days.extend(values.into_iter().map(shift_weekday)),
            None => named.push(part),
        }
    }

    let mut parts: Vec<String> = days.iter().map(u8::to_string).collect();
    parts.extend(named.into_iter().map(str::to_string));
    Ok(parts.join(","))
}

/// Expand one list element (`N`, `A-B`, `*/S`, `N/S`, `A-B/S`) into classic
/// day numbers. `None` means the element uses day names.
fn expand_weekdays(part: &str) -> Result<Option<Vec<u8>>, String> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step = step
                .parse::<u8>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| format!("invalid day of week step '{step}'"))?;
            (range, Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range == "*" || range == "?" {
        (0, 7)
    } else if let Some((start, end)) = range.split_once('-') {
        match (start.parse::<u8>(), end.parse::<u8>()) {
            (Ok(start), Ok(end)) => (start, end),
            _ => return Ok(None),
        }
    } else {
        match range.parse::<u8>() {
            // `N/S` runs to the end of the week
            Ok(start) if step.is_some() => (start, 7),
            Ok(day) => (day, day),
            Err(_) => return Ok(None),
        }
    };

    if start > 7 || end > 7 {
        return Err(format!("day of week in '{part}' out of range 0-7"));
    }
    if start > end {
        return Err(format!("day of week range '{range}' is reversed"));
    }

    let step = usize::from(step.unwrap_or(1));
    Ok(Some((start..=end).step_by(step).collect()))
}

fn shift_weekday(day: u8) -> u8 {
    match day {
        0 | 7 => 1,
        n => n + 1,
    }
}
