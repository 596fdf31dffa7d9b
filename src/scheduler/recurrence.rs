//! Recurrence computation for schedules.
//!
//! `advance` is a pure function of the schedule snapshot and the due-check
//! timestamp: given the frequency and cron expression it yields the next due
//! time and active state after a dispatch. All timestamps are UTC.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::errors::SchedulerError;
use crate::models::{Frequency, Schedule};

/// Fixed 30-day offset for monthly schedules. Not calendar-month arithmetic;
/// a schedule created on the 31st will drift.
const MONTHLY_OFFSET_DAYS: i64 = 30;

/// Result of advancing a schedule past a dispatch at `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceOutcome {
    pub next_run_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl AdvanceOutcome {
    fn deactivated() -> Self {
        Self {
            next_run_at: None,
            is_active: false,
        }
    }
}

/// Parse a cron expression, accepting both the six/seven-field syntax of the
/// `cron` crate and the classic five-field form (normalized by prepending a
/// seconds field).
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, SchedulerError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };

    cron::Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCronExpression {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

/// Compute the schedule state after a dispatch at `now`.
///
/// - `once`: fired, never again.
/// - `daily`/`weekly`: fixed offset from `now`.
/// - `monthly`: fixed 30-day offset from `now` (see [`MONTHLY_OFFSET_DAYS`]).
/// - `cron`: first occurrence strictly after `now`; a missing or unparseable
///   expression deactivates the schedule instead of leaving it due forever.
pub fn advance(schedule: &Schedule, now: DateTime<Utc>) -> AdvanceOutcome {
    match schedule.frequency {
        Frequency::Once => AdvanceOutcome::deactivated(),
        Frequency::Daily => AdvanceOutcome {
            next_run_at: Some(now + Duration::days(1)),
            is_active: schedule.is_active,
        },
        Frequency::Weekly => AdvanceOutcome {
            next_run_at: Some(now + Duration::days(7)),
            is_active: schedule.is_active,
        },
        Frequency::Monthly => AdvanceOutcome {
            next_run_at: Some(now + Duration::days(MONTHLY_OFFSET_DAYS)),
            is_active: schedule.is_active,
        },
        Frequency::Cron => match schedule.cron_expression.as_deref() {
            Some(expression) => match parse_cron(expression) {
                Ok(parsed) => match parsed.after(&now).next() {
                    Some(next) => AdvanceOutcome {
                        next_run_at: Some(next),
                        is_active: schedule.is_active,
                    },
                    // Expressions with a year field can run out of occurrences.
                    None => AdvanceOutcome::deactivated(),
                },
                Err(_) => AdvanceOutcome::deactivated(),
            },
            None => AdvanceOutcome::deactivated(),
        },
    }
}

/// First due time for a newly created schedule when the client did not
/// provide one. `once` has no derivable first run and returns None.
pub fn first_run_at(
    frequency: Frequency,
    cron_expression: Option<&str>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match frequency {
        Frequency::Once => None,
        Frequency::Daily => Some(now + Duration::days(1)),
        Frequency::Weekly => Some(now + Duration::days(7)),
        Frequency::Monthly => Some(now + Duration::days(MONTHLY_OFFSET_DAYS)),
        Frequency::Cron => parse_cron(cron_expression?)
            .ok()
            .and_then(|parsed| parsed.after(&now).next()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn schedule(frequency: Frequency, cron_expression: Option<&str>) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            task_config_id: Uuid::new_v4(),
            frequency,
            cron_expression: cron_expression.map(String::from),
            next_run_at: Some(now),
            last_run_at: None,
            is_active: true,
            dispatch_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn once_deactivates_after_single_dispatch() {
        let outcome = advance(&schedule(Frequency::Once, None), Utc::now());
        assert_eq!(outcome.next_run_at, None);
        assert!(!outcome.is_active);
    }

    #[test]
    fn daily_advances_exactly_one_day_from_now() {
        let now = at(2024, 1, 1, 0, 5, 0);
        let outcome = advance(&schedule(Frequency::Daily, None), now);
        assert_eq!(outcome.next_run_at, Some(at(2024, 1, 2, 0, 5, 0)));
        assert!(outcome.is_active);
    }

    #[test]
    fn weekly_advances_exactly_seven_days() {
        let now = at(2024, 1, 1, 12, 0, 0);
        let outcome = advance(&schedule(Frequency::Weekly, None), now);
        assert_eq!(outcome.next_run_at, Some(at(2024, 1, 8, 12, 0, 0)));
        assert!(outcome.is_active);
    }

    #[test]
    fn monthly_is_a_fixed_thirty_day_offset() {
        let now = at(2024, 1, 31, 9, 0, 0);
        let outcome = advance(&schedule(Frequency::Monthly, None), now);
        // 30 days, not "next month": Jan 31 + 30d = Mar 1 (2024 is a leap year).
        assert_eq!(outcome.next_run_at, Some(at(2024, 3, 1, 9, 0, 0)));
    }

    #[test]
    fn cron_advances_to_first_occurrence_strictly_after_now() {
        let now = at(2024, 1, 1, 9, 0, 0);
        // Daily at 09:00:00 — now is exactly on the boundary, so the next
        // occurrence must be tomorrow, not now itself.
        let outcome = advance(&schedule(Frequency::Cron, Some("0 0 9 * * *")), now);
        let next = outcome.next_run_at.unwrap();
        assert!(next > now);
        assert_eq!(next, at(2024, 1, 2, 9, 0, 0));
        assert!(outcome.is_active);
    }

    #[test]
    fn cron_matches_library_next_occurrence() {
        let now = at(2024, 6, 15, 10, 30, 0);
        let expression = "0 */15 * * * *";
        let outcome = advance(&schedule(Frequency::Cron, Some(expression)), now);
        let expected = parse_cron(expression).unwrap().after(&now).next().unwrap();
        assert_eq!(outcome.next_run_at, Some(expected));
    }

    #[test]
    fn five_field_cron_is_normalized() {
        let parsed = parse_cron("30 9 * * *").unwrap();
        let now = at(2024, 1, 1, 0, 0, 0);
        assert_eq!(parsed.after(&now).next(), Some(at(2024, 1, 1, 9, 30, 0)));
    }

    #[test]
    fn cron_without_expression_deactivates() {
        let outcome = advance(&schedule(Frequency::Cron, None), Utc::now());
        assert_eq!(outcome.next_run_at, None);
        assert!(!outcome.is_active);
    }

    #[test]
    fn cron_with_invalid_expression_deactivates() {
        let outcome = advance(&schedule(Frequency::Cron, Some("every tuesday")), Utc::now());
        assert_eq!(outcome.next_run_at, None);
        assert!(!outcome.is_active);
    }

    #[test]
    fn advance_is_pure() {
        let now = at(2024, 5, 5, 5, 5, 5);
        let s = schedule(Frequency::Daily, None);
        assert_eq!(advance(&s, now), advance(&s, now));

        let c = schedule(Frequency::Cron, Some("0 0 12 * * *"));
        assert_eq!(advance(&c, now), advance(&c, now));
    }

    #[test]
    fn first_run_for_once_must_be_explicit() {
        assert_eq!(first_run_at(Frequency::Once, None, Utc::now()), None);
    }

    #[test]
    fn first_run_for_daily_is_one_day_out() {
        let now = at(2024, 1, 1, 0, 0, 0);
        assert_eq!(
            first_run_at(Frequency::Daily, None, now),
            Some(at(2024, 1, 2, 0, 0, 0))
        );
    }
}
