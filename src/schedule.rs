//! Cron schedule evaluation for backup due-ness decisions.
//!
//! Supports standard 5-field cron expressions:
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12)
//! │ │ │ │ ┌───────────── day of week (0-6, 0 = Sunday)
//! │ │ │ │ │
//! * * * * *
//! ```

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when parsing cron expressions.
#[derive(Debug, Error)]
pub enum ScheduleParseError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),
    #[error("{field}: '{value}' is not a number")]
    BadValue { field: &'static str, value: String },
    #[error("{field}: step '{step}' is invalid")]
    BadStep { field: &'static str, step: String },
    #[error("{field}: range {start}-{end} is reversed")]
    ReversedRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
    #[error("{field}: values must lie within {min}..={max}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
    },
}

/// The set of values one cron field admits.
#[derive(Debug, Clone)]
struct FieldSet {
    values: BTreeSet<u32>,
}

impl FieldSet {
    fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// Parse one field expression (comma list of `*`, values, `a-b` ranges,
/// each with an optional `/step`) into its admitted value set.
fn parse_field(
    expr: &str,
    min: u32,
    max: u32,
    field: &'static str,
) -> Result<FieldSet, ScheduleParseError> {
    let parse_num = |value: &str| {
        value.parse::<u32>().map_err(|_| ScheduleParseError::BadValue {
            field,
            value: value.to_string(),
        })
    };

    let mut values = BTreeSet::new();
    for part in expr.split(',') {
        let part = part.trim();
        let (range, step) = match part.split_once('/') {
            Some((range, step_str)) => {
                let step = step_str.parse::<u32>().ok().filter(|s| *s > 0).ok_or(
                    ScheduleParseError::BadStep {
                        field,
                        step: step_str.to_string(),
                    },
                )?;
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let (start, end) = (parse_num(lo)?, parse_num(hi)?);
            if start > end {
                return Err(ScheduleParseError::ReversedRange { field, start, end });
            }
            (start, end)
        } else {
            let value = parse_num(range)?;
            (value, value)
        };

        if start < min || end > max {
            return Err(ScheduleParseError::OutOfRange { field, min, max });
        }

        values.extend((start..=end).step_by(step as usize));
    }

    Ok(FieldSet { values })
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

impl CronSchedule {
    /// Parse a cron expression string.
    pub fn parse(expr: &str) -> Result<Self, ScheduleParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let &[minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(ScheduleParseError::FieldCount(fields.len()));
        };

        Ok(Self {
            minute: parse_field(minute, 0, 59, "minute")?,
            hour: parse_field(hour, 0, 23, "hour")?,
            day_of_month: parse_field(dom, 1, 31, "day-of-month")?,
            month: parse_field(month, 1, 12, "month")?,
            day_of_week: parse_field(dow, 0, 6, "day-of-week")?,
        })
    }

    /// Check whether a datetime lands on this schedule. All five fields
    /// must match.
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day_of_month.matches(dt.day())
            && self.month.matches(dt.month())
            && self.day_of_week.matches(dt.weekday().num_days_from_sunday())
    }

    /// The earliest schedule-aligned instant strictly after `after`,
    /// at minute resolution.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        // Bounded scan; month- and day-level skips keep it cheap.
        let horizon = t + Duration::days(5 * 366);
        while t < horizon {
            if !self.month.matches(t.month()) {
                t = start_of_next_month(&t)?;
            } else if !self.day_of_month.matches(t.day())
                || !self.day_of_week.matches(t.weekday().num_days_from_sunday())
            {
                t = (t + Duration::days(1)).with_hour(0)?.with_minute(0)?;
            } else if !self.hour.matches(t.hour()) {
                t = (t + Duration::hours(1)).with_minute(0)?;
            } else if !self.minute.matches(t.minute()) {
                t = t + Duration::minutes(1);
            } else {
                return Some(t);
            }
        }

        None
    }
}

fn start_of_next_month(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

/// Decide whether a backup governed by `schedule` is due at `now`, given
/// the time it last ran.
///
/// A backup that has never run is always due. An empty schedule never
/// re-runs, and an unparsable schedule is treated the same way rather than
/// failing the caller. Otherwise the backup is due once `now` is strictly
/// past the first schedule-aligned instant after `last_run`; an instant
/// landing exactly on the schedule waits for the next evaluation.
pub fn is_due(schedule: &str, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(last_run) = last_run else {
        return true;
    };

    if schedule.is_empty() {
        return false;
    }

    let parsed = match CronSchedule::parse(schedule) {
        Ok(parsed) => parsed,
        Err(error) => {
            debug!(schedule = %schedule, error = %error, "Unparsable schedule, never due");
            return false;
        }
    };

    match parsed.next_after(last_run) {
        Some(next_run) => now > next_run,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_wildcard() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(schedule.minute.values.len(), 60);
        assert_eq!(schedule.hour.values.len(), 24);
        assert_eq!(schedule.day_of_week.values.len(), 7);
    }

    #[test]
    fn test_parse_single_value() {
        let schedule = CronSchedule::parse("30 4 * * *").unwrap();
        assert!(schedule.minute.matches(30));
        assert!(!schedule.minute.matches(31));
        assert!(schedule.hour.matches(4));
    }

    #[test]
    fn test_parse_range() {
        let schedule = CronSchedule::parse("0-30 * * * *").unwrap();
        assert_eq!(schedule.minute.values.len(), 31);
        assert!(schedule.minute.matches(30));
        assert!(!schedule.minute.matches(31));
    }

    #[test]
    fn test_parse_step() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(schedule.minute.values.len(), 4);
        assert!(schedule.minute.matches(45));
        assert!(!schedule.minute.matches(50));
    }

    #[test]
    fn test_parse_list() {
        let schedule = CronSchedule::parse("0,15,30,45 9-17 * * 1-5").unwrap();
        assert_eq!(schedule.minute.values.len(), 4);
        assert!(schedule.hour.matches(9));
        assert!(!schedule.hour.matches(8));
        assert!(schedule.day_of_week.matches(5));
        assert!(!schedule.day_of_week.matches(0));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(CronSchedule::parse("* *").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 25 * * *").is_err());
        assert!(CronSchedule::parse("30-10 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("not a cron at all").is_err());
    }

    #[test]
    fn test_matches() {
        let schedule = CronSchedule::parse("30 4 * * *").unwrap();
        assert!(schedule.matches(&utc(2024, 1, 15, 4, 30, 0)));
        assert!(!schedule.matches(&utc(2024, 1, 15, 4, 31, 0)));
    }

    #[test]
    fn test_next_after_hourly() {
        let schedule = CronSchedule::parse("0 * * * *").unwrap();
        let next = schedule.next_after(utc(2024, 1, 15, 14, 30, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 15, 15, 0, 0));
    }

    #[test]
    fn test_next_after_daily() {
        let schedule = CronSchedule::parse("0 3 * * *").unwrap();
        let next = schedule.next_after(utc(2024, 1, 15, 14, 30, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 16, 3, 0, 0));
    }

    #[test]
    fn test_next_after_is_strictly_after() {
        // An instant landing exactly on the schedule is not its own
        // next occurrence.
        let schedule = CronSchedule::parse("0 0 * * *").unwrap();
        let next = schedule.next_after(utc(2024, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 2, 0, 0, 0));
    }

    #[test]
    fn test_next_after_weekday() {
        // 2024-01-05 is a Friday; the next Monday is the 8th.
        let schedule = CronSchedule::parse("0 9 * * 1").unwrap();
        let next = schedule.next_after(utc(2024, 1, 5, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 8, 9, 0, 0));
    }

    #[test]
    fn test_never_run_is_always_due() {
        let now = utc(2024, 1, 2, 0, 0, 1);
        assert!(is_due("0 0 * * *", None, now));
        assert!(is_due("", None, now));
        assert!(is_due("not a cron", None, now));
    }

    #[test]
    fn test_empty_schedule_never_due() {
        assert!(!is_due("", Some(utc(2024, 1, 1, 0, 0, 0)), utc(2030, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn test_invalid_schedule_never_due() {
        assert!(!is_due(
            "not a cron",
            Some(utc(2024, 1, 1, 0, 0, 0)),
            utc(2030, 1, 1, 0, 0, 0)
        ));
    }

    #[test]
    fn test_due_boundary_is_strict() {
        let last = utc(2024, 1, 1, 0, 0, 0);
        // now exactly at the next-run instant: not yet due.
        assert!(!is_due("0 0 * * *", Some(last), utc(2024, 1, 2, 0, 0, 0)));
        // one second past it: due.
        assert!(is_due("0 0 * * *", Some(last), utc(2024, 1, 2, 0, 0, 1)));
    }

    #[test]
    fn test_not_due_again_until_next_slot() {
        // A backup triggered at 00:00:01 must stay quiet until the
        // following midnight has passed.
        let last = utc(2024, 1, 2, 0, 0, 1);
        assert!(!is_due("0 0 * * *", Some(last), utc(2024, 1, 2, 12, 0, 0)));
        assert!(!is_due("0 0 * * *", Some(last), utc(2024, 1, 3, 0, 0, 0)));
        assert!(is_due("0 0 * * *", Some(last), utc(2024, 1, 3, 0, 0, 2)));
    }
}
