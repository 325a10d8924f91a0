//! Cron expression parsing and next-fire computation.
//!
//! Accepts the POSIX 5-field form (`minute hour day-of-month month
//! day-of-week`) with an optional leading seconds field, plus the descriptor
//! aliases (`@hourly`, `@daily`, ...). All expressions are evaluated in UTC.
//! When both day-of-month and day-of-week are constrained, a firing matches
//! if either matches.

use chrono::{DateTime, Duration, Utc};
use croner::Cron;

use crate::errors::ChronodError;

/// Safety cap on next-fire searches. An expression with no firing inside
/// this window is reported as unreachable rather than searched forever.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

/// A parsed, reusable cron schedule.
pub struct Schedule {
    cron: Cron,
    expr: String,
}

impl Schedule {
    /// Parse and validate a cron expression or descriptor alias.
    pub fn parse(expr: &str) -> Result<Self, ChronodError> {
        let normalized = normalize_descriptor(expr.trim());
        let cron = Cron::new(normalized)
            .with_seconds_optional()
            .parse()
            .map_err(|e| {
                ChronodError::Cron(format!("invalid cron expression '{}': {}", expr, e))
            })?;
        Ok(Self {
            cron,
            expr: expr.to_string(),
        })
    }

    /// The strictly-next firing instant after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, ChronodError> {
        let next = self.cron.find_next_occurrence(&from, false).map_err(|_| {
            ChronodError::ScheduleUnreachable(format!(
                "cron expression '{}' has no future firing",
                self.expr
            ))
        })?;
        if next - from > Duration::days(SEARCH_HORIZON_DAYS) {
            return Err(ChronodError::ScheduleUnreachable(format!(
                "cron expression '{}' has no firing within the search horizon",
                self.expr
            )));
        }
        Ok(next)
    }

    /// Up to `n` successive firing instants after `from`.
    pub fn next_n_after(
        &self,
        from: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, ChronodError> {
        let mut out = Vec::with_capacity(n);
        let mut current = from;
        for _ in 0..n {
            match self.next_after(current) {
                Ok(next) => {
                    out.push(next);
                    current = next;
                }
                Err(_) => break,
            }
        }
        Ok(out)
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }
}

/// Check that an expression parses without keeping the schedule around.
pub fn validate(expr: &str) -> Result<(), ChronodError> {
    Schedule::parse(expr).map(|_| ())
}

/// Map descriptor aliases to their 5-field equivalents.
fn normalize_descriptor(expr: &str) -> &str {
    match expr {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_next_every_5_minutes() {
        let sched = Schedule::parse("*/5 * * * *").unwrap();
        let next = sched.next_after(at(2024, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 12, 5, 0));
    }

    #[test]
    fn test_next_daily_midnight() {
        let sched = Schedule::parse("0 0 * * *").unwrap();
        let next = sched.next_after(at(2024, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 2, 0, 0, 0));
    }

    #[test]
    fn test_next_hourly_descriptor() {
        let sched = Schedule::parse("@hourly").unwrap();
        let next = sched.next_after(at(2024, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 13, 0, 0));
    }

    #[test]
    fn test_descriptor_aliases() {
        let from = at(2024, 6, 15, 10, 30, 0);
        assert_eq!(
            Schedule::parse("@daily").unwrap().next_after(from).unwrap(),
            at(2024, 6, 16, 0, 0, 0)
        );
        assert_eq!(
            Schedule::parse("@midnight").unwrap().next_after(from).unwrap(),
            at(2024, 6, 16, 0, 0, 0)
        );
        // 2024-06-16 is a Sunday
        assert_eq!(
            Schedule::parse("@weekly").unwrap().next_after(from).unwrap(),
            at(2024, 6, 16, 0, 0, 0)
        );
        assert_eq!(
            Schedule::parse("@monthly").unwrap().next_after(from).unwrap(),
            at(2024, 7, 1, 0, 0, 0)
        );
        assert_eq!(
            Schedule::parse("@yearly").unwrap().next_after(from).unwrap(),
            at(2025, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            Schedule::parse("@annually").unwrap().next_after(from).unwrap(),
            at(2025, 1, 1, 0, 0, 0)
        );
    }

    #[test]
    fn test_next_is_strictly_greater_on_boundary() {
        // At exactly a firing instant, the next firing is the following one.
        let sched = Schedule::parse("*/5 * * * *").unwrap();
        let next = sched.next_after(at(2024, 1, 1, 12, 5, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 12, 10, 0));
    }

    #[test]
    fn test_next_n_strictly_increasing() {
        let sched = Schedule::parse("*/15 * * * *").unwrap();
        let fires = sched.next_n_after(at(2024, 1, 1, 0, 0, 0), 8).unwrap();
        assert_eq!(fires.len(), 8);
        for pair in fires.windows(2) {
            assert!(pair[1] > pair[0], "firings must strictly increase");
        }
        assert_eq!(fires[0], at(2024, 1, 1, 0, 15, 0));
        assert_eq!(fires[3], at(2024, 1, 1, 1, 0, 0));
    }

    #[test]
    fn test_seconds_field_supported() {
        let sched = Schedule::parse("*/10 * * * * *").unwrap();
        let next = sched.next_after(at(2024, 1, 1, 12, 0, 3)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 12, 0, 10));
    }

    #[test]
    fn test_ranges_lists_and_steps() {
        let sched = Schedule::parse("0 9-17 * * 1-5").unwrap();
        // Friday 2024-01-05 18:00 -> Monday 2024-01-08 09:00
        let next = sched.next_after(at(2024, 1, 5, 18, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 8, 9, 0, 0));

        let sched = Schedule::parse("0,30 * * * *").unwrap();
        let next = sched.next_after(at(2024, 1, 1, 12, 1, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 12, 30, 0));

        let sched = Schedule::parse("10-50/20 * * * *").unwrap();
        let next = sched.next_after(at(2024, 1, 1, 12, 12, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 1, 12, 30, 0));
    }

    #[test]
    fn test_dom_dow_either_matches() {
        // Day-of-month 13 OR Friday. From Mon 2024-05-06, the next Friday
        // (May 10) comes before the 13th.
        let sched = Schedule::parse("0 0 13 * 5").unwrap();
        let next = sched.next_after(at(2024, 5, 6, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 5, 10, 0, 0, 0));
        // And from Sat May 11, the 13th (a Monday) comes before next Friday.
        let next = sched.next_after(at(2024, 5, 11, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 5, 13, 0, 0, 0));
    }

    #[test]
    fn test_month_boundary() {
        let sched = Schedule::parse("30 23 31 * *").unwrap();
        // April has 30 days; from April 1 the next 31st is May 31.
        let next = sched.next_after(at(2024, 4, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 5, 31, 23, 30, 0));
    }

    #[test]
    fn test_unreachable_expression() {
        // February 30th never exists.
        let sched = Schedule::parse("0 0 30 2 *").unwrap();
        match sched.next_after(at(2024, 1, 1, 0, 0, 0)) {
            Err(ChronodError::ScheduleUnreachable(_)) => {}
            other => panic!("Expected ScheduleUnreachable, got: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_expressions_rejected() {
        for expr in ["not a cron", "* * *", "61 * * * *", "* 25 * * *", ""] {
            assert!(validate(expr).is_err(), "'{}' should be rejected", expr);
        }
    }

    #[test]
    fn test_valid_expressions_accepted() {
        for expr in [
            "* * * * *",
            "*/5 * * * *",
            "0 0 1 1 *",
            "15 2,14 * * 1-5",
            "@hourly",
            "@yearly",
            "0 */6 * * *",
        ] {
            assert!(validate(expr).is_ok(), "'{}' should be accepted", expr);
        }
    }

    #[test]
    fn test_iterated_next_matches_next_n() {
        let sched = Schedule::parse("0 12 * * *").unwrap();
        let from = at(2024, 2, 27, 0, 0, 0);
        let fires = sched.next_n_after(from, 4).unwrap();
        let mut current = from;
        for expected in &fires {
            current = sched.next_after(current).unwrap();
            assert_eq!(current, *expected);
        }
        // Leap year: Feb 29 exists in 2024.
        assert_eq!(fires[2], at(2024, 2, 29, 12, 0, 0));
    }
}
