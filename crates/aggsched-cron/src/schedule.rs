//! Cron expression parsing shared by trigger activation and `next_run` bookkeeping.
//!
//! Accepted forms:
//! - 5 fields `min hour dom month dow` (day of week 0-7, 0 and 7 = Sunday)
//! - 6 fields `sec min hour dom month dow`
//! - `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight`, `@hourly`
//!
//! Everything is evaluated in UTC.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

const DAY_NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Parse an expression into a [`Schedule`].
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let normalized = normalize(expression).map_err(|message| invalid(expression, message))?;
    Schedule::from_str(&normalized).map_err(|e| invalid(expression, e.to_string()))
}

/// First fire time strictly after `from`.
pub fn next_fire_time(expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse_schedule(expression)?
        .after(&from)
        .next()
        .ok_or_else(|| invalid(expression, "schedule has no upcoming fire time".to_string()))
}

fn invalid(expression: &str, message: String) -> SchedulerError {
    SchedulerError::InvalidCronExpression {
        expression: expression.to_string(),
        message,
    }
}

/// Rewrite an accepted expression into the 6-field dialect of the `cron` crate.
fn normalize(expression: &str) -> std::result::Result<String, String> {
    let trimmed = expression.trim();
    if let Some(descriptor) = trimmed.strip_prefix('@') {
        let expanded = match descriptor {
            "yearly" | "annually" => "0 0 0 1 1 *",
            "monthly" => "0 0 0 1 * *",
            "weekly" => "0 0 0 * * Sun",
            "daily" | "midnight" => "0 0 0 * * *",
            "hourly" => "0 0 * * * *",
            other => return Err(format!("unknown descriptor @{other}")),
        };
        return Ok(expanded.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let (seconds, rest) = match fields.len() {
        5 => ("0", &fields[..]),
        6 => (fields[0], &fields[1..]),
        n => return Err(format!("expected 5 or 6 fields, found {n}")),
    };
    let day_of_week = translate_day_of_week(rest[4])?;
    Ok(format!(
        "{seconds} {} {} {} {} {day_of_week}",
        rest[0], rest[1], rest[2], rest[3]
    ))
}

/// The `cron` crate numbers days 1-7 from Sunday; conventional cron uses 0-6.
/// Numeric days are rewritten as names, which both dialects agree on.
fn translate_day_of_week(field: &str) -> std::result::Result<String, String> {
    field
        .split(',')
        .map(translate_day_item)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(|items| items.join(","))
}

fn translate_day_item(item: &str) -> std::result::Result<String, String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    let base = match base.split_once('-') {
        Some(("0", "7")) => "*".to_string(),
        Some((start, "7")) if step.is_none() && start != "7" => match day_name(start)?.as_str() {
            "Sat" => "Sat,Sun".to_string(),
            first => format!("{first}-Sat,Sun"),
        },
        Some((start, end)) => format!("{}-{}", day_name(start)?, day_name(end)?),
        None => day_name(base)?,
    };
    Ok(match step {
        Some(step) => format!("{base}/{step}"),
        None => base,
    })
}

fn day_name(token: &str) -> std::result::Result<String, String> {
    match token.parse::<usize>() {
        Ok(n) => DAY_NAMES
            .get(n)
            .map(|name| name.to_string())
            .ok_or_else(|| format!("day of week {n} out of range")),
        Err(_) => Ok(token.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_standard_five_fields() {
        let from = at(2024, 3, 1, 10, 7, 30);
        assert_eq!(
            next_fire_time("*/15 * * * *", from).unwrap(),
            at(2024, 3, 1, 10, 15, 0)
        );
        assert_eq!(next_fire_time("0 2 * * *", from).unwrap(), at(2024, 3, 2, 2, 0, 0));
    }

    #[test]
    fn test_optional_seconds() {
        let from = at(2024, 3, 1, 10, 7, 30);
        assert_eq!(
            next_fire_time("* * * * * *", from).unwrap(),
            at(2024, 3, 1, 10, 7, 31)
        );
        assert_eq!(
            next_fire_time("45 * * * * *", from).unwrap(),
            at(2024, 3, 1, 10, 7, 45)
        );
    }

    #[test]
    fn test_descriptors() {
        let from = at(2024, 3, 1, 10, 7, 30);
        assert_eq!(next_fire_time("@hourly", from).unwrap(), at(2024, 3, 1, 11, 0, 0));
        assert_eq!(next_fire_time("@daily", from).unwrap(), at(2024, 3, 2, 0, 0, 0));
        assert_eq!(next_fire_time("@midnight", from).unwrap(), at(2024, 3, 2, 0, 0, 0));
        assert_eq!(next_fire_time("@monthly", from).unwrap(), at(2024, 4, 1, 0, 0, 0));
        assert_eq!(next_fire_time("@yearly", from).unwrap(), at(2025, 1, 1, 0, 0, 0));
        let weekly = next_fire_time("@weekly", from).unwrap();
        assert_eq!(weekly.weekday(), Weekday::Sun);
        assert_eq!(weekly.hour(), 0);
    }

    #[test]
    fn test_day_of_week_numbering() {
        // 2024-03-02 is a Saturday
        let saturday = at(2024, 3, 2, 12, 0, 0);
        let sunday = next_fire_time("0 0 * * 0", saturday).unwrap();
        assert_eq!(sunday.weekday(), Weekday::Sun);
        assert_eq!(next_fire_time("0 0 * * 7", saturday).unwrap(), sunday);

        let weekday = next_fire_time("30 9 * * 1-5", saturday).unwrap();
        assert_eq!(weekday, at(2024, 3, 4, 9, 30, 0));
        assert_eq!(weekday.weekday(), Weekday::Mon);

        let weekend = next_fire_time("0 8 * * 6-7", at(2024, 3, 2, 9, 0, 0)).unwrap();
        assert_eq!(weekend, at(2024, 3, 3, 8, 0, 0));

        let named = next_fire_time("0 9 * * Mon", saturday).unwrap();
        assert_eq!(named, at(2024, 3, 4, 9, 0, 0));
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in ["", "* * *", "61 * * * *", "* * * * 9", "@every 5m", "a b c d e", "* * * * * * * *"] {
            let err = parse_schedule(expr).unwrap_err();
            assert!(
                matches!(err, SchedulerError::InvalidCronExpression { .. }),
                "expected invalid cron for {expr:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_next_fire_time_is_pure() {
        let from = at(2024, 3, 1, 10, 7, 30);
        assert_eq!(
            next_fire_time("0 */6 * * *", from).unwrap(),
            next_fire_time("0 */6 * * *", from).unwrap()
        );
    }
}
