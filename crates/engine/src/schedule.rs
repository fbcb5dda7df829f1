//! Recurrence-rule interpreter for time-based triggers.
//!
//! Rules are evaluated against an injected `now` so the scheduler and the
//! tests never depend on the wall clock. A rule "fires" when its most recent
//! occurrence at or before `now` has not been acted on yet (i.e. the last
//! recorded run predates that occurrence).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// When a time-triggered workflow should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Recurring rule, if any.
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    /// One-shot instant, if any. A schedule may carry both.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A recurrence rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "freq", rename_all = "snake_case")]
pub enum Recurrence {
    /// Every day at the given time of day (UTC).
    Daily { at: NaiveTime },
    /// Every week on the given weekday (0 = Monday … 6 = Sunday).
    Weekly { weekday: u8, at: NaiveTime },
    /// Every month on the given day (1–31, clamped to the month's length).
    Monthly { day: u32, at: NaiveTime },
    /// Every `minutes` minutes, anchored on the previous run.
    Interval { minutes: i64 },
}

impl Schedule {
    /// Whether the schedule should fire given the last recorded run.
    pub fn fires(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let one_shot = self
            .scheduled_at
            .is_some_and(|at| at <= now && last_run.is_none_or(|l| l < at));
        let recurring = self
            .recurrence
            .as_ref()
            .is_some_and(|r| r.fires(last_run, now));
        one_shot || recurring
    }
}

impl Recurrence {
    /// Whether the rule fires at `now`, given the last recorded run.
    pub fn fires(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Interval { minutes } => last_run
                .is_none_or(|l| now - l >= Duration::minutes((*minutes).max(1))),
            _ => match self.previous_occurrence(now) {
                Some(occurrence) => last_run.is_none_or(|l| l < occurrence),
                None => false,
            },
        }
    }

    /// Most recent scheduled instant at or before `now`.
    ///
    /// `Interval` rules have no fixed occurrences and return `None`.
    pub fn previous_occurrence(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        match self {
            Self::Daily { at } => {
                let candidate = today.and_time(*at).and_utc();
                Some(if candidate <= now { candidate } else { candidate - Duration::days(1) })
            }
            Self::Weekly { weekday, at } => {
                let back = (today.weekday().num_days_from_monday() as i64
                    - i64::from(*weekday))
                .rem_euclid(7);
                let candidate = (today - Duration::days(back)).and_time(*at).and_utc();
                Some(if candidate <= now { candidate } else { candidate - Duration::days(7) })
            }
            Self::Monthly { day, at } => {
                let candidate = clamped_date(today.year(), today.month(), *day)
                    .and_time(*at)
                    .and_utc();
                if candidate <= now {
                    Some(candidate)
                } else {
                    let (year, month) = if today.month() == 1 {
                        (today.year() - 1, 12)
                    } else {
                        (today.year(), today.month() - 1)
                    };
                    Some(clamped_date(year, month, *day).and_time(*at).and_utc())
                }
            }
            Self::Interval { .. } => None,
        }
    }
}

/// Day-of-month, clamped to the last day of the month when out of range.
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day.max(1)).unwrap_or_else(|| {
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        // First of the following month always exists; its predecessor is the
        // last day of this month.
        NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or_default()
    })
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_fires_once_per_day() {
        let rule = Recurrence::Daily { at: at(9, 0) };
        let now = utc(2026, 3, 10, 10, 0);

        // Never run before: fires.
        assert!(rule.fires(None, now));

        // Already ran after today's 09:00 occurrence: does not fire again.
        assert!(!rule.fires(Some(utc(2026, 3, 10, 10, 0)), now));

        // Last ran yesterday: fires.
        assert!(rule.fires(Some(utc(2026, 3, 9, 9, 30)), now));
    }

    #[test]
    fn daily_does_not_fire_before_time_of_day() {
        let rule = Recurrence::Daily { at: at(9, 0) };
        let now = utc(2026, 3, 10, 8, 0);
        // The most recent occurrence is yesterday 09:00, which yesterday's
        // run already covered.
        assert!(!rule.fires(Some(utc(2026, 3, 9, 9, 5)), now));
    }

    #[test]
    fn weekly_fires_on_the_right_weekday() {
        // 2026-03-10 is a Tuesday (weekday 1).
        let rule = Recurrence::Weekly { weekday: 1, at: at(8, 0) };
        let now = utc(2026, 3, 10, 9, 0);

        assert!(rule.fires(Some(utc(2026, 3, 3, 8, 5)), now));
        assert!(!rule.fires(Some(utc(2026, 3, 10, 8, 5)), now));

        // Before 08:00 on the day: most recent occurrence is last week.
        let early = utc(2026, 3, 10, 7, 0);
        assert!(!rule.fires(Some(utc(2026, 3, 3, 8, 5)), early));
    }

    #[test]
    fn monthly_clamps_to_short_months() {
        let rule = Recurrence::Monthly { day: 31, at: at(0, 0) };
        // February 2026 has 28 days, so the occurrence clamps to the 28th.
        let occurrence = rule.previous_occurrence(utc(2026, 3, 1, 0, 0)).unwrap();
        assert_eq!(occurrence, utc(2026, 2, 28, 0, 0));
    }

    #[test]
    fn interval_anchors_on_last_run() {
        let rule = Recurrence::Interval { minutes: 30 };
        let now = utc(2026, 3, 10, 12, 0);

        assert!(rule.fires(None, now));
        assert!(rule.fires(Some(utc(2026, 3, 10, 11, 30)), now));
        assert!(!rule.fires(Some(utc(2026, 3, 10, 11, 45)), now));
    }

    #[test]
    fn one_shot_schedule_fires_exactly_once() {
        let schedule = Schedule {
            recurrence: None,
            scheduled_at: Some(utc(2026, 3, 10, 9, 0)),
        };

        assert!(!schedule.fires(None, utc(2026, 3, 10, 8, 59)));
        assert!(schedule.fires(None, utc(2026, 3, 10, 9, 0)));
        // Once a run at/after the instant is recorded it never fires again.
        assert!(!schedule.fires(Some(utc(2026, 3, 10, 9, 0)), utc(2026, 3, 11, 9, 0)));
    }

    #[test]
    fn evaluation_is_deterministic_for_a_fixed_now() {
        let rule = Recurrence::Daily { at: at(9, 0) };
        let now = utc(2026, 3, 10, 10, 0);
        let last = Some(utc(2026, 3, 9, 9, 0));
        assert_eq!(rule.fires(last, now), rule.fires(last, now));
    }
}
