//! Recurrence expansion: rule + date window → due dates.
//!
//! Pure calendar arithmetic on `NaiveDate`; wall-clock time is attached
//! only by `occurrence_bounds`, so DST never shifts a date.

use chrono::{Datelike, Days, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};

use super::error::EngineError;
use crate::models::{Frequency, RecurrenceRule};

/// Check a rule's shape. Called at template creation/update and again on
/// every expansion.
pub fn validate_rule(rule: &RecurrenceRule) -> Result<(), EngineError> {
    if rule.interval < 1 {
        return Err(EngineError::InvalidRecurrence(
            "interval must be at least 1".into(),
        ));
    }
    if rule.start_date > rule.end_date {
        return Err(EngineError::InvalidRecurrence(format!(
            "start date {} is after end date {}",
            rule.start_date, rule.end_date
        )));
    }
    if rule.frequency == Frequency::Weekly {
        if rule.days_of_week.is_empty() {
            return Err(EngineError::InvalidRecurrence(
                "weekly rule needs at least one day of week".into(),
            ));
        }
        if let Some(bad) = rule.days_of_week.iter().find(|d| !(1..=7).contains(*d)) {
            return Err(EngineError::InvalidRecurrence(format!(
                "day of week {bad} is outside 1-7"
            )));
        }
    }
    Ok(())
}

/// Copy of `rule` with the weekday set cleared for non-weekly frequencies.
pub fn normalize_rule(mut rule: RecurrenceRule) -> RecurrenceRule {
    if rule.frequency != Frequency::Weekly {
        rule.days_of_week.clear();
    }
    rule
}

/// Every due date of `rule` inside `[window_start, window_end]`, ascending.
pub fn expand(
    rule: &RecurrenceRule,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> Result<Vec<NaiveDate>, EngineError> {
    validate_rule(rule)?;

    let lo = window_start.max(rule.start_date);
    let hi = window_end.min(rule.end_date);
    if lo > hi {
        return Ok(Vec::new());
    }

    let dates = match rule.frequency {
        Frequency::Daily => expand_daily(rule, lo, hi),
        Frequency::Weekly => expand_weekly(rule, lo, hi),
        Frequency::Monthly => expand_monthly(rule, lo, hi),
    };
    Ok(dates)
}

fn expand_daily(rule: &RecurrenceRule, lo: NaiveDate, hi: NaiveDate) -> Vec<NaiveDate> {
    let step = u64::from(rule.interval);
    let offset = (lo - rule.start_date).num_days().unsigned_abs();
    // first multiple of `step` at or after `lo`
    let skip = offset.div_ceil(step);
    let mut next = skip
        .checked_mul(step)
        .and_then(|days| rule.start_date.checked_add_days(Days::new(days)));

    let mut out = Vec::new();
    while let Some(date) = next.filter(|d| *d <= hi) {
        out.push(date);
        next = date.checked_add_days(Days::new(step));
    }
    out
}

fn monday_of(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
}

fn expand_weekly(rule: &RecurrenceRule, lo: NaiveDate, hi: NaiveDate) -> Vec<NaiveDate> {
    let matches = |d: NaiveDate| rule.days_of_week.contains(&d.weekday().number_from_monday());

    // Anchor week: the one holding the first matching date on or after start.
    let Some(first) = (0..7)
        .filter_map(|i| rule.start_date.checked_add_days(Days::new(i)))
        .find(|d| matches(*d))
    else {
        return Vec::new();
    };
    let Some(anchor) = monday_of(first) else {
        return Vec::new();
    };
    let interval = i64::from(rule.interval);

    let mut out = Vec::new();
    let mut next = Some(lo);
    while let Some(date) = next.filter(|d| *d <= hi) {
        let in_phase = monday_of(date)
            .map(|monday| ((monday - anchor).num_days() / 7) % interval == 0)
            .unwrap_or(false);
        if date >= first && in_phase && matches(date) {
            out.push(date);
        }
        next = date.succ_opt();
    }
    out
}

/// `anchor_day` in the month `months` after `start`, clamped to the month's last day.
fn nth_month_clamped(start: NaiveDate, months: u32, anchor_day: u32) -> Option<NaiveDate> {
    let first_of_month = start.with_day(1)?.checked_add_months(Months::new(months))?;
    let last_day = last_day_of_month(first_of_month)?;
    first_of_month.with_day(anchor_day.min(last_day))
}

fn last_day_of_month(first_of_month: NaiveDate) -> Option<u32> {
    let next = first_of_month.checked_add_months(Months::new(1))?;
    Some((next - Duration::days(1)).day())
}

fn expand_monthly(rule: &RecurrenceRule, lo: NaiveDate, hi: NaiveDate) -> Vec<NaiveDate> {
    let anchor_day = rule.start_date.day();
    let mut out = Vec::new();
    let mut k: u32 = 0;
    loop {
        let Some(months) = k.checked_mul(rule.interval) else {
            break;
        };
        let Some(date) = nth_month_clamped(rule.start_date, months, anchor_day) else {
            break;
        };
        if date > hi {
            break;
        }
        if date >= lo {
            out.push(date);
        }
        k += 1;
    }
    out
}

/// Scheduled start and end of the occurrence on `date`.
pub fn occurrence_bounds(
    date: NaiveDate,
    time_of_day: NaiveTime,
    grace_minutes: i64,
) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(time_of_day);
    (start, start + Duration::minutes(grace_minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn daily_five_days() {
        let rule = RecurrenceRule::daily(d(2025, 1, 1), d(2025, 1, 5));
        let dates = expand(&rule, d(2025, 1, 1), d(2025, 1, 5)).unwrap();
        assert_eq!(
            dates,
            vec![d(2025, 1, 1), d(2025, 1, 2), d(2025, 1, 3), d(2025, 1, 4), d(2025, 1, 5)]
        );
    }

    #[test]
    fn daily_interval_keeps_phase_inside_window() {
        let rule = RecurrenceRule::daily(d(2025, 1, 1), d(2025, 1, 31)).every(3);
        // phase: 1, 4, 7, 10, 13 ...
        let dates = expand(&rule, d(2025, 1, 5), d(2025, 1, 14)).unwrap();
        assert_eq!(dates, vec![d(2025, 1, 7), d(2025, 1, 10), d(2025, 1, 13)]);
    }

    #[test]
    fn window_outside_range_is_empty() {
        let rule = RecurrenceRule::daily(d(2025, 1, 1), d(2025, 1, 5));
        assert!(expand(&rule, d(2025, 2, 1), d(2025, 2, 5)).unwrap().is_empty());
        assert!(expand(&rule, d(2025, 1, 5), d(2025, 1, 1)).unwrap().is_empty());
    }

    #[test]
    fn huge_daily_interval_yields_only_the_start() {
        let rule = RecurrenceRule::daily(d(2025, 1, 1), d(2025, 12, 31)).every(u32::MAX);
        assert_eq!(expand(&rule, d(2025, 1, 1), d(2025, 12, 31)).unwrap(), vec![d(2025, 1, 1)]);
        assert!(expand(&rule, d(2025, 1, 2), d(2025, 12, 31)).unwrap().is_empty());
    }

    #[test]
    fn huge_weekly_interval_yields_only_the_first_week() {
        let rule = RecurrenceRule::weekly(d(2025, 1, 6), d(2025, 3, 31), [1, 3]).every(u32::MAX);
        let dates = expand(&rule, d(2025, 1, 1), d(2025, 3, 31)).unwrap();
        assert_eq!(dates, vec![d(2025, 1, 6), d(2025, 1, 8)]);
    }

    #[test]
    fn expansion_up_to_the_last_representable_date_stops() {
        let rule = RecurrenceRule::daily(NaiveDate::MAX - Duration::days(2), NaiveDate::MAX);
        assert_eq!(expand(&rule, NaiveDate::MIN, NaiveDate::MAX).unwrap().len(), 3);
        let rule = RecurrenceRule::weekly(NaiveDate::MAX - Duration::days(13), NaiveDate::MAX, [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(expand(&rule, NaiveDate::MIN, NaiveDate::MAX).unwrap().len(), 14);
    }

    #[test]
    fn weekly_mon_wed_fri_two_weeks() {
        let rule = RecurrenceRule::weekly(d(2025, 1, 1), d(2025, 1, 14), [1, 3, 5]);
        let dates = expand(&rule, d(2025, 1, 1), d(2025, 1, 14)).unwrap();
        assert_eq!(
            dates,
            vec![
                d(2025, 1, 1),
                d(2025, 1, 3),
                d(2025, 1, 6),
                d(2025, 1, 8),
                d(2025, 1, 10),
                d(2025, 1, 13)
            ]
        );
        for date in &dates {
            assert!([1, 3, 5].contains(&date.weekday().number_from_monday()));
        }
    }

    #[test]
    fn weekly_interval_skips_whole_weeks() {
        // 2025-01-06 is a Monday.
        let rule = RecurrenceRule::weekly(d(2025, 1, 6), d(2025, 2, 2), [1, 4]).every(2);
        let dates = expand(&rule, d(2025, 1, 1), d(2025, 2, 28)).unwrap();
        assert_eq!(
            dates,
            vec![d(2025, 1, 6), d(2025, 1, 9), d(2025, 1, 20), d(2025, 1, 23)]
        );
    }

    #[test]
    fn weekly_anchor_is_first_matching_week() {
        // Starts on a Wednesday with only Mondays selected: first match is
        // the following Monday, and that week is the anchor.
        let rule = RecurrenceRule::weekly(d(2025, 1, 1), d(2025, 2, 28), [1]).every(2);
        let dates = expand(&rule, d(2025, 1, 1), d(2025, 1, 31)).unwrap();
        assert_eq!(dates, vec![d(2025, 1, 6), d(2025, 1, 20)]);
    }

    #[test]
    fn weekly_window_midway_keeps_week_phase() {
        let rule = RecurrenceRule::weekly(d(2025, 1, 6), d(2025, 3, 31), [1]).every(2);
        let from_start = expand(&rule, d(2025, 1, 1), d(2025, 3, 31)).unwrap();
        let resumed = expand(&rule, d(2025, 2, 1), d(2025, 3, 31)).unwrap();
        let tail: Vec<_> = from_start.into_iter().filter(|x| *x >= d(2025, 2, 1)).collect();
        assert_eq!(resumed, tail);
    }

    #[test]
    fn monthly_clamps_to_last_day() {
        let rule = RecurrenceRule::monthly(d(2025, 1, 31), d(2025, 5, 31));
        let dates = expand(&rule, d(2025, 1, 1), d(2025, 12, 31)).unwrap();
        assert_eq!(
            dates,
            vec![d(2025, 1, 31), d(2025, 2, 28), d(2025, 3, 31), d(2025, 4, 30), d(2025, 5, 31)]
        );
    }

    #[test]
    fn monthly_clamps_to_leap_day() {
        let rule = RecurrenceRule::monthly(d(2024, 1, 30), d(2024, 3, 31));
        let dates = expand(&rule, d(2024, 1, 1), d(2024, 3, 31)).unwrap();
        assert_eq!(dates, vec![d(2024, 1, 30), d(2024, 2, 29), d(2024, 3, 30)]);
    }

    #[test]
    fn monthly_interval_across_year_end() {
        let rule = RecurrenceRule::monthly(d(2024, 11, 15), d(2025, 6, 30)).every(3);
        let dates = expand(&rule, d(2024, 1, 1), d(2025, 12, 31)).unwrap();
        assert_eq!(dates, vec![d(2024, 11, 15), d(2025, 2, 15), d(2025, 5, 15)]);
    }

    #[test]
    fn expansion_is_restartable() {
        let rule = RecurrenceRule::daily(d(2025, 1, 1), d(2025, 1, 20)).every(2);
        let whole = expand(&rule, d(2025, 1, 1), d(2025, 1, 20)).unwrap();
        let mut pieces = expand(&rule, d(2025, 1, 1), d(2025, 1, 9)).unwrap();
        pieces.extend(expand(&rule, d(2025, 1, 10), d(2025, 1, 20)).unwrap());
        assert_eq!(whole, pieces);
        assert_eq!(whole, expand(&rule, d(2025, 1, 1), d(2025, 1, 20)).unwrap());
    }

    #[test]
    fn weekly_without_days_is_rejected() {
        let rule = RecurrenceRule::weekly(d(2025, 1, 1), d(2025, 1, 14), []);
        assert!(matches!(
            expand(&rule, d(2025, 1, 1), d(2025, 1, 14)),
            Err(EngineError::InvalidRecurrence(_))
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let rule = RecurrenceRule::daily(d(2025, 1, 1), d(2025, 1, 14)).every(0);
        assert!(matches!(validate_rule(&rule), Err(EngineError::InvalidRecurrence(_))));
    }

    #[test]
    fn out_of_range_weekday_is_rejected() {
        let rule = RecurrenceRule::weekly(d(2025, 1, 1), d(2025, 1, 14), [0, 3]);
        assert!(validate_rule(&rule).is_err());
        let rule = RecurrenceRule::weekly(d(2025, 1, 1), d(2025, 1, 14), [8]);
        assert!(validate_rule(&rule).is_err());
    }

    #[test]
    fn start_after_end_is_rejected() {
        let rule = RecurrenceRule::daily(d(2025, 2, 1), d(2025, 1, 1));
        assert!(validate_rule(&rule).is_err());
    }

    #[test]
    fn normalize_drops_days_for_daily() {
        let mut rule = RecurrenceRule::daily(d(2025, 1, 1), d(2025, 1, 2));
        rule.days_of_week = BTreeSet::from([2, 4]);
        let rule = normalize_rule(rule);
        assert!(rule.days_of_week.is_empty());
    }

    #[test]
    fn bounds_attach_time_and_grace() {
        let (start, end) = occurrence_bounds(d(2025, 1, 1), NaiveTime::from_hms_opt(8, 0, 0).unwrap(), 30);
        assert_eq!(start, d(2025, 1, 1).and_hms_opt(8, 0, 0).unwrap());
        assert_eq!(end, d(2025, 1, 1).and_hms_opt(8, 30, 0).unwrap());
    }
}
