//! rota-cron: five-field cron expression parsing and next-fire computation.
//!
//! Pure computation — the scheduler calls [`CronExpr::next_fire`] on every
//! evaluation cycle, so nothing here touches a clock or any other state.
//!
//! Grammar per field: `*`, literals, `a-b` ranges, `*/n` / `a-b/n` / `a/n`
//! steps, and comma lists. Day-of-week uses 0 = Sunday, with 7 accepted as
//! an alias. When both day-of-month and day-of-week are restricted, a date
//! matching either field fires (conventional cron disjunction); otherwise
//! the restricted field alone decides.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),
}

pub type Result<T> = std::result::Result<T, CronError>;

/// How far `next_fire` searches before giving up on an expression that can
/// never match (e.g. `0 0 30 2 *`). Four years covers every leap-day case.
const SEARCH_HORIZON_DAYS: i64 = 4 * 366;

/// A parsed five-field cron expression.
///
/// Field masks are bitmaps: bit `n` set means value `n` matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    /// Whether the day-of-month field was anything other than `*`.
    dom_restricted: bool,
    /// Whether the day-of-week field was anything other than `*`.
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse a five-field expression: `minute hour day-of-month month
    /// day-of-week`.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::InvalidExpression(format!(
                "expected 5 fields, got {} in {expr:?}",
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, "minute")?;
        let hours = parse_field(fields[1], 0, 23, "hour")? as u32;
        let days_of_month = parse_field(fields[2], 1, 31, "day-of-month")? as u32;
        let months = parse_field(fields[3], 1, 12, "month")? as u16;
        // Day-of-week allows 0-7; bit 7 folds onto bit 0 (both Sunday).
        let dow_raw = parse_field(fields[4], 0, 7, "day-of-week")?;
        let days_of_week = ((dow_raw & 0x7f) | (dow_raw >> 7)) as u8;

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// Validate an expression without keeping the parse.
    pub fn validate(expr: &str) -> Result<()> {
        Self::parse(expr).map(|_| ())
    }

    /// The first fire time strictly after `after`, at minute resolution.
    ///
    /// Returns `None` only when no date within the search horizon matches.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Fires land on whole minutes; start at the minute after `after`.
        let start = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after)
            + Duration::minutes(1);
        let horizon = start.date_naive() + Duration::days(SEARCH_HORIZON_DAYS);

        let mut date = start.date_naive();
        // Time-of-day floor applies only to the first candidate day.
        let (mut from_hour, mut from_min) = (start.hour(), start.minute());

        while date <= horizon {
            if self.month_matches(date.month()) && self.day_matches(date) {
                if let Some((h, m)) = self.first_time_at_or_after(from_hour, from_min) {
                    let fire = date.and_hms_opt(h, m, 0)?.and_utc();
                    return Some(fire);
                }
            }
            date = date.succ_opt()?;
            (from_hour, from_min) = (0, 0);
        }
        None
    }

    fn month_matches(&self, month: u32) -> bool {
        self.months & (1 << month) != 0
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_hit = self.days_of_month & (1 << date.day()) != 0;
        let dow_hit = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        if self.dom_restricted && self.dow_restricted {
            dom_hit || dow_hit
        } else {
            dom_hit && dow_hit
        }
    }

    /// Earliest matching `(hour, minute)` at or after the given time of day.
    fn first_time_at_or_after(&self, from_hour: u32, from_min: u32) -> Option<(u32, u32)> {
        for h in from_hour..24 {
            if self.hours & (1 << h) == 0 {
                continue;
            }
            let min_floor = if h == from_hour { from_min } else { 0 };
            for m in min_floor..60 {
                if self.minutes & (1 << m) != 0 {
                    return Some((h, m));
                }
            }
        }
        None
    }
}

/// Parse one field into a bitmask over `lo..=hi`.
fn parse_field(spec: &str, lo: u32, hi: u32, name: &str) -> Result<u64> {
    let mut mask = 0u64;
    for item in spec.split(',') {
        if item.is_empty() {
            return Err(CronError::InvalidExpression(format!(
                "empty list item in {name} field {spec:?}"
            )));
        }
        mask |= parse_item(item, lo, hi, name)?;
    }
    Ok(mask)
}

/// Parse a single list item: `*`, `a`, `a-b`, optionally with `/step`.
fn parse_item(item: &str, lo: u32, hi: u32, name: &str) -> Result<u64> {
    let (base, step) = match item.split_once('/') {
        Some((base, step_str)) => {
            let step: u32 = step_str.parse().map_err(|_| {
                CronError::InvalidExpression(format!("bad step {step_str:?} in {name} field"))
            })?;
            if step == 0 {
                return Err(CronError::InvalidExpression(format!(
                    "zero step in {name} field"
                )));
            }
            (base, step)
        }
        None => (item, 1),
    };

    let (start, end) = if base == "*" {
        (lo, hi)
    } else if let Some((a, b)) = base.split_once('-') {
        (parse_value(a, lo, hi, name)?, parse_value(b, lo, hi, name)?)
    } else {
        let v = parse_value(base, lo, hi, name)?;
        // A bare value with a step means "from v to the field max".
        if item.contains('/') { (v, hi) } else { (v, v) }
    };

    if start > end {
        return Err(CronError::InvalidExpression(format!(
            "inverted range {base:?} in {name} field"
        )));
    }

    let mut mask = 0u64;
    let mut v = start;
    while v <= end {
        mask |= 1 << v;
        v += step;
    }
    Ok(mask)
}

fn parse_value(s: &str, lo: u32, hi: u32, name: &str) -> Result<u32> {
    let v: u32 = s.parse().map_err(|_| {
        CronError::InvalidExpression(format!("bad value {s:?} in {name} field"))
    })?;
    if v < lo || v > hi {
        return Err(CronError::InvalidExpression(format!(
            "{name} value {v} out of range {lo}-{hi}"
        )));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_minute_is_strictly_after() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let now = at(2024, 9, 3, 10, 7);
        assert_eq!(expr.next_fire(now), Some(at(2024, 9, 3, 10, 8)));
        // Mid-minute reference still rounds forward to the next whole minute.
        let now = Utc.with_ymd_and_hms(2024, 9, 3, 10, 7, 42).unwrap();
        assert_eq!(expr.next_fire(now), Some(at(2024, 9, 3, 10, 8)));
    }

    #[test]
    fn daily_at_time() {
        let expr = CronExpr::parse("30 9 * * *").unwrap();
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 8, 0)),
            Some(at(2024, 9, 3, 9, 30))
        );
        // Already past today's slot: tomorrow.
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 9, 30)),
            Some(at(2024, 9, 4, 9, 30))
        );
    }

    #[test]
    fn step_minutes() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 10, 7)),
            Some(at(2024, 9, 3, 10, 15))
        );
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 10, 45)),
            Some(at(2024, 9, 3, 11, 0))
        );
    }

    #[test]
    fn range_with_step_and_list() {
        let expr = CronExpr::parse("0,30 9-17/2 * * *").unwrap();
        // Hours 9,11,13,15,17 at :00 and :30.
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 9, 30)),
            Some(at(2024, 9, 3, 11, 0))
        );
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 17, 30)),
            Some(at(2024, 9, 4, 9, 0))
        );
    }

    #[test]
    fn weekday_range_skips_weekend() {
        // 2024-09-06 is a Friday.
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        assert_eq!(
            expr.next_fire(at(2024, 9, 6, 10, 0)),
            Some(at(2024, 9, 9, 9, 0)) // Monday
        );
    }

    #[test]
    fn dom_dow_disjunction() {
        // 13th of the month OR Monday. September 2024: the 9th and 16th are
        // Mondays, the 13th is a Friday.
        let expr = CronExpr::parse("0 0 13 * 1").unwrap();
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 12, 0)),
            Some(at(2024, 9, 9, 0, 0))
        );
        assert_eq!(
            expr.next_fire(at(2024, 9, 9, 0, 0)),
            Some(at(2024, 9, 13, 0, 0))
        );
        assert_eq!(
            expr.next_fire(at(2024, 9, 13, 0, 0)),
            Some(at(2024, 9, 16, 0, 0))
        );
    }

    #[test]
    fn single_restricted_day_field_decides_alone() {
        // Only dow restricted: Sundays at noon. 2024-09-08 is a Sunday.
        let expr = CronExpr::parse("0 12 * * 0").unwrap();
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 0, 0)),
            Some(at(2024, 9, 8, 12, 0))
        );
        // Only dom restricted: the 20th.
        let expr = CronExpr::parse("0 12 20 * *").unwrap();
        assert_eq!(
            expr.next_fire(at(2024, 9, 3, 0, 0)),
            Some(at(2024, 9, 20, 12, 0))
        );
    }

    #[test]
    fn seven_is_sunday() {
        let zero = CronExpr::parse("0 12 * * 0").unwrap();
        let seven = CronExpr::parse("0 12 * * 7").unwrap();
        let now = at(2024, 9, 3, 0, 0);
        assert_eq!(zero.next_fire(now), seven.next_fire(now));
    }

    #[test]
    fn month_and_year_rollover() {
        let expr = CronExpr::parse("0 0 1 1 *").unwrap();
        assert_eq!(
            expr.next_fire(at(2024, 3, 15, 0, 0)),
            Some(at(2025, 1, 1, 0, 0))
        );
    }

    #[test]
    fn leap_day() {
        let expr = CronExpr::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            expr.next_fire(at(2023, 3, 1, 0, 0)),
            Some(at(2024, 2, 29, 0, 0))
        );
    }

    #[test]
    fn impossible_date_returns_none() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert_eq!(expr.next_fire(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in [
            "* * * *",        // 4 fields
            "* * * * * *",    // 6 fields
            "60 * * * *",     // minute out of range
            "* 24 * * *",     // hour out of range
            "* * 0 * *",      // dom below range
            "* * * 13 *",     // month out of range
            "* * * * 8",      // dow out of range
            "a * * * *",      // not a number
            "20-10 * * * *",  // inverted range
            "*/0 * * * *",    // zero step
            "1,,2 * * * *",   // empty list item
            "",               // empty
        ] {
            assert!(
                CronExpr::parse(bad).is_err(),
                "expected parse failure for {bad:?}"
            );
        }
    }

    #[test]
    fn accepts_conventional_forms() {
        for ok in [
            "* * * * *",
            "0 * * * *",
            "*/5 * * * *",
            "0 3 * * *",
            "30 9 * * 1-5",
            "0 0 1,15 * *",
            "5/10 * * * *",
            "0 9-17 * * *",
            "0 0 * * 7",
        ] {
            assert!(CronExpr::validate(ok).is_ok(), "expected {ok:?} to parse");
        }
    }

    #[test]
    fn fire_satisfies_field_constraints() {
        let expr = CronExpr::parse("15 6 * 3 *").unwrap();
        let fire = expr.next_fire(at(2024, 9, 1, 0, 0)).unwrap();
        assert_eq!(fire.minute(), 15);
        assert_eq!(fire.hour(), 6);
        assert_eq!(fire.month(), 3);
        assert!(fire > at(2024, 9, 1, 0, 0));
    }
}
