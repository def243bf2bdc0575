//! Adherence aggregation: read-time projections over schedule events.
//!
//! Nothing here is stored. Each query is one SELECT, and the numbers are
//! derived in memory from that single consistent read.

use chrono::NaiveDate;
use rusqlite::Connection;
use uuid::Uuid;

use super::error::EngineError;
use super::recurrence::expand;
use crate::db::repository::{self, EventOutcome};
use crate::models::{
    AdherenceSnapshot, DateWindow, EventStatus, MissedCounts, MissedEvent, MissedEventsReport,
    OwnerType, ScheduleEvent, TemplateProgress, Trend, VitalType,
};

fn check_window(window: &DateWindow) -> Result<(), EngineError> {
    if window.is_valid() {
        Ok(())
    } else {
        Err(EngineError::InvalidWindow {
            start: window.start,
            end: window.end,
        })
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Compare the two halves of the window. Tolerance is relative to the first
/// half's magnitude, floored at 1.0 so values near zero do not flap.
pub fn compute_trend(first: &[f64], second: &[f64], tolerance: f64) -> Trend {
    let (Some(a), Some(b)) = (mean(first), mean(second)) else {
        return Trend::Stable;
    };
    let band = tolerance.abs() * a.abs().max(1.0);
    let delta = b - a;
    if delta > band {
        Trend::Up
    } else if delta < -band {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Completed values split at the window midpoint, or `None` when they mix
/// vital types and cannot be averaged together.
fn split_values(outcomes: &[EventOutcome], midpoint: NaiveDate) -> Option<(Vec<f64>, Vec<f64>)> {
    let mut kinds: Option<VitalType> = None;
    let mut first = Vec::new();
    let mut second = Vec::new();

    for o in outcomes.iter().filter(|o| o.status == EventStatus::Completed) {
        let Some(value) = o.numeric_value else { continue };
        match (kinds, o.vital_type) {
            (Some(k), Some(v)) if k != v => return None,
            (None, v) => kinds = v,
            _ => {}
        }
        if o.occurrence_date < midpoint {
            first.push(value);
        } else {
            second.push(value);
        }
    }
    Some((first, second))
}

pub fn get_stats(
    conn: &Connection,
    patient_id: &Uuid,
    category: OwnerType,
    vital_type: Option<VitalType>,
    window: &DateWindow,
    trend_tolerance: f64,
) -> Result<AdherenceSnapshot, EngineError> {
    check_window(window)?;
    let vital_type = vital_type.filter(|_| category == OwnerType::Vital);

    let outcomes = repository::window_outcomes(conn, patient_id, category, vital_type, window)?;

    let count = |s: EventStatus| outcomes.iter().filter(|o| o.status == s).count() as u32;
    let completed_count = count(EventStatus::Completed);
    let expired_count = count(EventStatus::Expired);
    let cancelled_count = count(EventStatus::Cancelled);

    let resolved = completed_count + expired_count + cancelled_count;
    let completion_rate = if resolved == 0 {
        0.0
    } else {
        completed_count as f64 / resolved as f64
    };

    let (average_value, trend) = match category {
        OwnerType::Vital => match split_values(&outcomes, window.midpoint()) {
            Some((first, second)) => {
                let all: Vec<f64> = first.iter().chain(second.iter()).copied().collect();
                (mean(&all), compute_trend(&first, &second, trend_tolerance))
            }
            None => (None, Trend::Stable),
        },
        _ => (None, Trend::Stable),
    };

    tracing::debug!(
        patient_id = %patient_id,
        category = %category,
        total = outcomes.len(),
        completed_count,
        expired_count,
        "Adherence stats computed"
    );

    Ok(AdherenceSnapshot {
        patient_id: *patient_id,
        category,
        vital_type,
        window_start: window.start,
        window_end: window.end,
        total_count: outcomes.len() as u32,
        completed_count,
        expired_count,
        cancelled_count,
        completion_rate,
        average_value,
        trend,
    })
}

fn to_missed(event: ScheduleEvent) -> MissedEvent {
    MissedEvent {
        event_id: event.id,
        template_id: event.template_id,
        owner_type: event.owner_type,
        vital_type: event.vital_type,
        occurrence_date: event.occurrence_date,
        scheduled_start: event.scheduled_start,
        scheduled_end: event.scheduled_end,
        critical: event.critical,
    }
}

/// Expired events grouped by category, newest first. Lists are capped at
/// `cap_per_category`; counts are not.
pub fn list_missed(
    conn: &Connection,
    patient_id: &Uuid,
    category: Option<OwnerType>,
    window: &DateWindow,
    cap_per_category: usize,
) -> Result<MissedEventsReport, EngineError> {
    check_window(window)?;
    let expired = repository::list_expired(conn, patient_id, category, window)?;

    let mut report = MissedEventsReport::default();
    for event in expired {
        let (list, counter) = match event.owner_type {
            OwnerType::Medication => (&mut report.medications, &mut report.counts.medications),
            OwnerType::Appointment => (&mut report.appointments, &mut report.counts.appointments),
            OwnerType::Vital => (&mut report.vitals, &mut report.counts.vitals),
        };
        *counter += 1;
        if list.len() < cap_per_category {
            list.push(to_missed(event));
        }
    }
    let MissedCounts {
        medications,
        appointments,
        vitals,
        ..
    } = report.counts;
    report.counts.total = medications + appointments + vitals;
    Ok(report)
}

pub fn template_progress(conn: &Connection, template_id: &Uuid) -> Result<TemplateProgress, EngineError> {
    let template = repository::get_template(conn, template_id)?
        .ok_or(EngineError::TemplateNotFound(*template_id))?;
    let end = template.effective_end();
    let expected_total = expand(&template.rule, template.rule.start_date, end)?.len() as u32;
    let counts = repository::template_status_counts(conn, template_id, None)?;
    // Events past a retirement date were cancelled by the retirement and are
    // not part of the expected schedule.
    let scheduled = repository::template_status_counts(conn, template_id, Some(end))?;

    let resolved = scheduled.completed + scheduled.expired + scheduled.cancelled;
    Ok(TemplateProgress {
        template_id: template.id,
        expected_total,
        materialized: counts.total,
        completed: counts.completed,
        expired: counts.expired,
        cancelled: counts.cancelled,
        remaining: expected_total.saturating_sub(resolved),
        materialized_through: template.last_materialized_through,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::engine::lifecycle::{cancel_event, complete_event};
    use crate::engine::materializer::materialize;
    use crate::engine::signals::NoopDispatcher;
    use crate::engine::sweeper::sweep_expired;
    use crate::models::*;
    use chrono::{NaiveDateTime, NaiveTime};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn noon(day: u32) -> NaiveDateTime {
        d(2025, 1, day).and_hms_opt(12, 0, 0).unwrap()
    }

    fn seed(
        conn: &Connection,
        patient_id: Uuid,
        owner_type: OwnerType,
        vital_type: Option<VitalType>,
        days: u32,
    ) -> (RecurrenceTemplate, Vec<Uuid>) {
        let t = RecurrenceTemplate {
            id: Uuid::new_v4(),
            owner_type,
            owner_id: Uuid::new_v4(),
            patient_id,
            vital_type,
            rule: RecurrenceRule::daily(d(2025, 1, 1), d(2025, 1, days)),
            time_of_day: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            critical: false,
            last_materialized_through: None,
            retired_on: None,
            created_at: noon(1),
        };
        repository::insert_template(conn, &t).unwrap();
        let ids = materialize(conn, &t.id, d(2025, 1, days), 30, noon(1)).unwrap();
        (t, ids)
    }

    fn reading(value: f64, unit: &str) -> CompletionPayload {
        CompletionPayload::Vital {
            value,
            unit: unit.into(),
            secondary_value: None,
        }
    }

    fn window(days: u32) -> DateWindow {
        DateWindow::new(d(2025, 1, 1), d(2025, 1, days))
    }

    #[test]
    fn empty_window_has_zero_rate() {
        let conn = open_memory_database().unwrap();
        let stats = get_stats(&conn, &Uuid::new_v4(), OwnerType::Medication, None, &window(10), 0.05).unwrap();
        assert_eq!(stats.total_count, 0);
        assert_eq!(stats.completion_rate, 0.0);
        assert_eq!(stats.trend, Trend::Stable);
        assert_eq!(stats.average_value, None);
    }

    #[test]
    fn inverted_window_is_rejected() {
        let conn = open_memory_database().unwrap();
        let w = DateWindow::new(d(2025, 2, 1), d(2025, 1, 1));
        assert!(matches!(
            get_stats(&conn, &Uuid::new_v4(), OwnerType::Vital, None, &w, 0.05),
            Err(EngineError::InvalidWindow { .. })
        ));
        assert!(matches!(
            list_missed(&conn, &Uuid::new_v4(), None, &w, 50),
            Err(EngineError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn accounting_identity_holds() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        let (_, ids) = seed(&conn, patient, OwnerType::Medication, None, 6);
        let taken = CompletionPayload::Medication {
            taken: true,
            taken_at: None,
        };
        complete_event(&conn, &ids[0], &taken, noon(1), &NoopDispatcher).unwrap();
        complete_event(&conn, &ids[1], &taken, noon(2), &NoopDispatcher).unwrap();
        cancel_event(&conn, &ids[2], "hospitalised", noon(2)).unwrap();
        // Days 4 and 5 lapse; day 6 is still open at the sweep.
        sweep_expired(&conn, d(2025, 1, 6).and_hms_opt(0, 0, 0).unwrap(), 500, &NoopDispatcher).unwrap();

        let stats = get_stats(&conn, &patient, OwnerType::Medication, None, &window(6), 0.05).unwrap();
        assert_eq!(stats.total_count, 6);
        assert_eq!(stats.completed_count, 2);
        assert_eq!(stats.cancelled_count, 1);
        assert_eq!(stats.expired_count, 2);
        assert!(stats.completed_count + stats.expired_count + stats.cancelled_count <= stats.total_count);
        assert!((stats.completion_rate - 0.4).abs() < 1e-9);

        let missed = list_missed(&conn, &patient, None, &window(6), 50).unwrap();
        assert_eq!(missed.counts.total, stats.expired_count);
        assert_eq!(missed.medications.len(), 2);
        assert_eq!(missed.medications[0].occurrence_date, d(2025, 1, 5));
    }

    #[test]
    fn missed_lists_are_capped_but_counts_are_not() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        seed(&conn, patient, OwnerType::Medication, None, 10);
        seed(&conn, patient, OwnerType::Appointment, None, 3);
        sweep_expired(&conn, noon(20), 500, &NoopDispatcher).unwrap();

        let report = list_missed(&conn, &patient, None, &window(10), 4).unwrap();
        assert_eq!(report.medications.len(), 4);
        assert_eq!(report.appointments.len(), 3);
        assert!(report.vitals.is_empty());
        assert_eq!(report.counts.medications, 10);
        assert_eq!(report.counts.total, 13);

        let only_appts = list_missed(&conn, &patient, Some(OwnerType::Appointment), &window(10), 50).unwrap();
        assert!(only_appts.medications.is_empty());
        assert_eq!(only_appts.counts.total, 3);
    }

    #[test]
    fn rising_vitals_trend_up() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        let (_, ids) = seed(&conn, patient, OwnerType::Vital, Some(VitalType::Weight), 4);
        for (i, value) in [70.0, 70.0, 80.0, 80.0].into_iter().enumerate() {
            complete_event(&conn, &ids[i], &reading(value, "kg"), noon(20), &NoopDispatcher).unwrap();
        }

        let stats = get_stats(&conn, &patient, OwnerType::Vital, Some(VitalType::Weight), &window(4), 0.05).unwrap();
        assert_eq!(stats.average_value, Some(75.0));
        assert_eq!(stats.trend, Trend::Up);
        assert_eq!(stats.completion_rate, 1.0);
    }

    #[test]
    fn falling_and_flat_trends() {
        assert_eq!(compute_trend(&[100.0], &[90.0], 0.05), Trend::Down);
        assert_eq!(compute_trend(&[100.0], &[103.0], 0.05), Trend::Stable);
        assert_eq!(compute_trend(&[], &[103.0], 0.05), Trend::Stable);
        // Magnitude floor: 0.0 -> 0.04 stays inside 5% of 1.0.
        assert_eq!(compute_trend(&[0.0], &[0.04], 0.05), Trend::Stable);
    }

    #[test]
    fn mixed_vital_types_are_not_averaged() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        let (_, weights) = seed(&conn, patient, OwnerType::Vital, Some(VitalType::Weight), 2);
        let (_, pulses) = seed(&conn, patient, OwnerType::Vital, Some(VitalType::HeartRate), 2);
        complete_event(&conn, &weights[0], &reading(70.0, "kg"), noon(20), &NoopDispatcher).unwrap();
        complete_event(&conn, &pulses[1], &reading(72.0, "bpm"), noon(20), &NoopDispatcher).unwrap();

        let all = get_stats(&conn, &patient, OwnerType::Vital, None, &window(2), 0.05).unwrap();
        assert_eq!(all.average_value, None);
        assert_eq!(all.trend, Trend::Stable);
        assert_eq!(all.completed_count, 2);

        let pulse = get_stats(&conn, &patient, OwnerType::Vital, Some(VitalType::HeartRate), &window(2), 0.05).unwrap();
        assert_eq!(pulse.average_value, Some(72.0));
        assert_eq!(pulse.total_count, 2);
    }

    #[test]
    fn progress_tracks_remaining() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        let t = RecurrenceTemplate {
            id: Uuid::new_v4(),
            owner_type: OwnerType::Medication,
            owner_id: Uuid::new_v4(),
            patient_id: patient,
            vital_type: None,
            rule: RecurrenceRule::daily(d(2025, 1, 1), d(2025, 1, 10)),
            time_of_day: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            critical: false,
            last_materialized_through: None,
            retired_on: None,
            created_at: noon(1),
        };
        repository::insert_template(&conn, &t).unwrap();
        let ids = materialize(&conn, &t.id, d(2025, 1, 3), 30, noon(1)).unwrap();
        let taken = CompletionPayload::Medication {
            taken: true,
            taken_at: None,
        };
        complete_event(&conn, &ids[0], &taken, noon(1), &NoopDispatcher).unwrap();

        let progress = template_progress(&conn, &t.id).unwrap();
        assert_eq!(progress.expected_total, 10);
        assert_eq!(progress.materialized, 3);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.remaining, 9);
        assert_eq!(progress.materialized_through, Some(d(2025, 1, 3)));
    }

    #[test]
    fn retirement_cancellations_do_not_use_up_remaining() {
        let conn = open_memory_database().unwrap();
        let (t, _) = seed(&conn, Uuid::new_v4(), OwnerType::Medication, None, 10);

        assert!(repository::retire_template(&conn, &t.id, d(2025, 1, 3)).unwrap());
        let cancelled = repository::cancel_open_after(&conn, &t.id, d(2025, 1, 3), "template retired", noon(1)).unwrap();
        assert_eq!(cancelled, 7);

        let progress = template_progress(&conn, &t.id).unwrap();
        assert_eq!(progress.expected_total, 3);
        assert_eq!(progress.materialized, 10);
        assert_eq!(progress.cancelled, 7);
        assert_eq!(progress.remaining, 3);
    }
}
