// pgsnapd/src/schedule/mod.rs
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::errors::{BackupError, Result};

/// A parsed 5-field cron expression (minute, hour, day-of-month, month,
/// day-of-week), evaluated in UTC.
///
/// Fields accept `*`, explicit values, comma lists, ranges and step values
/// (`*/N`, `a-b/N`). Day-of-month and day-of-week combine with the standard
/// cron rule: when both are restricted, either one matching fires the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

impl FromStr for ScheduleSpec {
    type Err = BackupError;

    fn from_str(expression: &str) -> Result<Self> {
        let invalid = |reason: String| BackupError::InvalidSchedule {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], &MINUTE).map_err(&invalid)?;
        let hours = parse_field(fields[1], &HOUR).map_err(&invalid)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH).map_err(&invalid)?;
        let months = parse_field(fields[3], &MONTH).map_err(&invalid)?;
        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK).map_err(&invalid)?;

        // 7 is an alias for Sunday.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(ScheduleSpec {
            expression: expression.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            // Vixie cron keys restriction on the field starting with `*`,
            // so `*/2` counts as unrestricted for the union rule
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }
}

/// Parses one cron field into a bitmask of allowed values.
fn parse_field(field: &str, spec: &FieldSpec) -> std::result::Result<u64, String> {
    if field.is_empty() {
        return Err(format!("empty {} field", spec.name));
    }
    let mut mask: u64 = 0;
    for term in field.split(',') {
        let (range, step) = match term.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step {:?} in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("step of 0 in {} field", spec.name));
                }
                (range, step)
            }
            None => (term, 1),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = parse_value(a, spec)?;
            let hi = parse_value(b, spec)?;
            if lo > hi {
                return Err(format!("inverted range {:?} in {} field", range, spec.name));
            }
            (lo, hi)
        } else {
            let value = parse_value(range, spec)?;
            if step != 1 {
                // `5/2` style steps only make sense over a range.
                return Err(format!(
                    "step on single value {:?} in {} field",
                    term, spec.name
                ));
            }
            (value, value)
        };

        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn parse_value(text: &str, spec: &FieldSpec) -> std::result::Result<u32, String> {
    let value: u32 = text
        .parse()
        .map_err(|_| format!("invalid value {:?} in {} field", text, spec.name))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} value {} out of range {}-{}",
            spec.name, value, spec.min, spec.max
        ));
    }
    Ok(value)
}

impl ScheduleSpec {
    fn bit(mask: u64, value: u32) -> bool {
        mask & (1 << value) != 0
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom_ok = Self::bit(self.days_of_month, t.day());
        let dow_ok = Self::bit(self.days_of_week, t.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }

    /// The smallest minute-aligned instant strictly after `now` (≥ now + 1
    /// minute) that satisfies all five fields. Fails for expressions that
    /// can never fire (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let never = || BackupError::InvalidSchedule {
            expression: self.expression.clone(),
            reason: "schedule never fires within the next four years".to_string(),
        };

        let floored = now.timestamp() - now.timestamp().rem_euclid(60);
        let mut t = Utc
            .timestamp_opt(floored + 60, 0)
            .single()
            .ok_or_else(never)?;

        let horizon = t + Duration::days(365 * 4 + 1);
        while t < horizon {
            if !Self::bit(self.months, t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc
                    .with_ymd_and_hms(year, month, 1, 0, 0, 0)
                    .single()
                    .ok_or_else(never)?;
                continue;
            }
            if !self.day_matches(t) {
                let next_day = t.date_naive() + Duration::days(1);
                t = next_day
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc())
                    .ok_or_else(never)?;
                continue;
            }
            if !Self::bit(self.hours, t.hour()) {
                t = t
                    .with_minute(0)
                    .map(|dt| dt + Duration::hours(1))
                    .ok_or_else(never)?;
                continue;
            }
            if !Self::bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Ok(t);
        }
        Err(never())
    }
}
