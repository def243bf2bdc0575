//! Event materialization: template expansion into persisted occurrences.
//!
//! Inserts are insert-if-absent against the (template_id, occurrence_date)
//! unique index, and the watermark only advances forward, so any number of
//! triggers (template creation, nightly batch, manual re-run) may overlap.
//! Each insert re-checks the stored template, so a retirement or re-time
//! committed mid-run is honoured by the rows written after it.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::error::EngineError;
use super::recurrence::{expand, occurrence_bounds};
use crate::db::repository;
use crate::models::{EventStatus, RecurrenceTemplate, ScheduleEvent, TemplateFilter};

/// Build the pending occurrence of `template` on `date`.
pub fn new_occurrence(
    template: &RecurrenceTemplate,
    date: NaiveDate,
    status: EventStatus,
    grace_minutes: i64,
    now: NaiveDateTime,
) -> ScheduleEvent {
    let (scheduled_start, scheduled_end) = occurrence_bounds(date, template.time_of_day, grace_minutes);
    ScheduleEvent {
        id: Uuid::new_v4(),
        template_id: template.id,
        patient_id: template.patient_id,
        owner_type: template.owner_type,
        vital_type: template.vital_type,
        occurrence_date: date,
        scheduled_start,
        scheduled_end,
        status,
        started_at: None,
        completed_at: None,
        completion_payload: None,
        value_flag: None,
        cancel_reason: None,
        critical: template.critical,
        created_at: now,
        updated_at: now,
    }
}

/// Materialize every occurrence of `template_id` up to `through`.
///
/// Returns the ids this call created; a repeat call returns an empty list.
/// If an insert fails, the watermark is advanced only through the last date
/// that was handled and `MaterializationPartialFailure` carries the ids
/// created so far.
pub fn materialize(
    conn: &Connection,
    template_id: &Uuid,
    through: NaiveDate,
    grace_minutes: i64,
    now: NaiveDateTime,
) -> Result<Vec<Uuid>, EngineError> {
    let template = repository::get_template(conn, template_id)?
        .ok_or(EngineError::TemplateNotFound(*template_id))?;

    let window_start = match template.last_materialized_through {
        Some(w) => match w.succ_opt() {
            Some(next) => next,
            None => return Ok(Vec::new()),
        },
        None => template.rule.start_date,
    };
    let window_end = through.min(template.effective_end());

    if window_start > window_end {
        tracing::debug!(
            template_id = %template.id,
            through = %through,
            "Nothing to materialize"
        );
        return Ok(Vec::new());
    }

    let dates = expand(&template.rule, window_start, window_end)?;

    let mut created = Vec::new();
    let mut last_done: Option<NaiveDate> = None;
    for date in dates {
        let event = new_occurrence(&template, date, EventStatus::Pending, grace_minutes, now);
        match repository::insert_occurrence(conn, &event) {
            Ok(true) => created.push(event.id),
            Ok(false) => {}
            Err(source) => {
                // Only dates strictly before the failing one are known good.
                let resume_through = date.pred_opt().filter(|d| *d >= window_start);
                if let Some(good) = resume_through.or(last_done) {
                    if let Err(e) = repository::advance_watermark(conn, &template.id, good) {
                        tracing::warn!(
                            template_id = %template.id,
                            through = %good,
                            error = %e,
                            "Could not record partial watermark"
                        );
                    }
                }
                tracing::warn!(
                    template_id = %template.id,
                    failed_date = %date,
                    created = created.len(),
                    error = %source,
                    "Materialization stopped mid-batch"
                );
                let materialized_through = repository::get_template(conn, &template.id)
                    .ok()
                    .flatten()
                    .and_then(|t| t.last_materialized_through);
                return Err(EngineError::MaterializationPartialFailure {
                    template_id: template.id,
                    materialized_through,
                    created,
                    source,
                });
            }
        }
        last_done = Some(date);
    }

    repository::advance_watermark(conn, &template.id, window_end)?;

    tracing::info!(
        template_id = %template.id,
        from = %window_start,
        through = %window_end,
        created = created.len(),
        "Materialized occurrences"
    );
    Ok(created)
}

/// Outcome of a batch run over all active templates.
#[derive(Debug, Default, Serialize)]
pub struct BatchMaterialization {
    pub templates_processed: u32,
    pub events_created: u32,
    pub failures: Vec<(Uuid, String)>,
}

/// Nightly batch: materialize every non-retired template through `through`.
/// A failing template is recorded and the batch moves on.
pub fn materialize_all_active(
    conn: &Connection,
    through: NaiveDate,
    grace_minutes: i64,
    now: NaiveDateTime,
) -> Result<BatchMaterialization, EngineError> {
    let templates = repository::list_templates(conn, &TemplateFilter::default())?;
    let mut result = BatchMaterialization::default();

    for template in templates {
        result.templates_processed += 1;
        match materialize(conn, &template.id, through, grace_minutes, now) {
            Ok(ids) => result.events_created += ids.len() as u32,
            Err(e) => {
                if let EngineError::MaterializationPartialFailure { created, .. } = &e {
                    result.events_created += created.len() as u32;
                }
                tracing::warn!(template_id = %template.id, error = %e, "Template skipped in batch");
                result.failures.push((template.id, e.to_string()));
            }
        }
    }

    tracing::info!(
        templates = result.templates_processed,
        created = result.events_created,
        failed = result.failures.len(),
        "Batch materialization finished"
    );
    Ok(result)
}
