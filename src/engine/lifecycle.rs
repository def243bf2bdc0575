//! Event lifecycle transitions.
//!
//! ```text
//! pending -> started | completed | cancelled
//! started -> completed | cancelled
//! prior   -> completed | cancelled
//! pending/started -> expired   (sweeper)
//! prior -> expired             (prior reconciliation)
//! ```
//!
//! Every transition is a single guarded UPDATE. A caller that affects zero
//! rows lost: the event is re-read only to report why.

use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use super::error::EngineError;
use super::signals::{emit, EngineSignal};
use super::traits::SignalDispatcher;
use crate::db::repository;
use crate::models::{AbnormalFlag, CompletionPayload, EventStatus, ScheduleEvent};

pub const START_SOURCES: &[EventStatus] = &[EventStatus::Pending];
pub const COMPLETE_SOURCES: &[EventStatus] =
    &[EventStatus::Pending, EventStatus::Started, EventStatus::Prior];
pub const CANCEL_SOURCES: &[EventStatus] =
    &[EventStatus::Pending, EventStatus::Started, EventStatus::Prior];

/// Check `payload` against the event's category and compute the range flag
/// for vitals.
pub fn validate_payload(
    event: &ScheduleEvent,
    payload: &CompletionPayload,
    now: NaiveDateTime,
) -> Result<Option<AbnormalFlag>, EngineError> {
    if payload.owner_type() != event.owner_type {
        return Err(EngineError::InvalidPayload(format!(
            "{} payload for a {} event",
            payload.owner_type(),
            event.owner_type
        )));
    }

    match payload {
        CompletionPayload::Medication { taken, taken_at } => {
            if let Some(at) = taken_at {
                if !taken {
                    return Err(EngineError::InvalidPayload(
                        "taken_at given for a dose marked not taken".into(),
                    ));
                }
                if *at > now {
                    return Err(EngineError::InvalidPayload(format!(
                        "taken_at {at} is in the future"
                    )));
                }
            }
            Ok(None)
        }
        CompletionPayload::Vital {
            value,
            unit,
            secondary_value,
        } => {
            let vital = event.vital_type.ok_or_else(|| {
                EngineError::InvalidPayload("vital event has no vital type".into())
            })?;
            if !value.is_finite() || secondary_value.is_some_and(|v| !v.is_finite()) {
                return Err(EngineError::InvalidPayload("measurement must be a finite number".into()));
            }
            if !vital.accepts_unit(unit) {
                return Err(EngineError::InvalidPayload(format!(
                    "unit '{unit}' does not match {} (expected {})",
                    vital.as_str(),
                    vital.default_unit()
                )));
            }
            Ok(Some(vital.classify(*value)))
        }
        CompletionPayload::Appointment { .. } => Ok(None),
    }
}

/// Explain a lost conditional update.
fn lost_transition(conn: &Connection, id: &Uuid, to: EventStatus) -> EngineError {
    match repository::get_event_status(conn, id) {
        Ok(Some(from)) => EngineError::InvalidStateTransition {
            event_id: *id,
            from,
            to,
        },
        Ok(None) => EngineError::EventNotFound(*id),
        Err(e) => EngineError::Database(e),
    }
}

fn reload(conn: &Connection, id: &Uuid) -> Result<ScheduleEvent, EngineError> {
    repository::get_event(conn, id)?.ok_or(EngineError::EventNotFound(*id))
}

pub fn start_event(conn: &Connection, id: &Uuid, now: NaiveDateTime) -> Result<ScheduleEvent, EngineError> {
    if !repository::mark_started(conn, id, START_SOURCES, now)? {
        return Err(lost_transition(conn, id, EventStatus::Started));
    }
    tracing::debug!(event_id = %id, "Event started");
    reload(conn, id)
}

pub fn complete_event(
    conn: &Connection,
    id: &Uuid,
    payload: &CompletionPayload,
    now: NaiveDateTime,
    dispatcher: &dyn SignalDispatcher,
) -> Result<ScheduleEvent, EngineError> {
    let event = reload(conn, id)?;
    if !COMPLETE_SOURCES.contains(&event.status) {
        return Err(EngineError::InvalidStateTransition {
            event_id: *id,
            from: event.status,
            to: EventStatus::Completed,
        });
    }
    let flag = validate_payload(&event, payload, now)?;

    // The status read above is advisory; the guarded UPDATE decides.
    if !repository::mark_completed(conn, id, COMPLETE_SOURCES, payload, flag, now)? {
        return Err(lost_transition(conn, id, EventStatus::Completed));
    }

    let completed = reload(conn, id)?;
    tracing::info!(
        event_id = %id,
        owner_type = %completed.owner_type,
        value_flag = ?completed.value_flag,
        "Event completed"
    );
    emit(dispatcher, EngineSignal::completed(&completed));
    Ok(completed)
}

pub fn cancel_event(
    conn: &Connection,
    id: &Uuid,
    reason: &str,
    now: NaiveDateTime,
) -> Result<ScheduleEvent, EngineError> {
    if !repository::mark_cancelled(conn, id, CANCEL_SOURCES, reason, now)? {
        return Err(lost_transition(conn, id, EventStatus::Cancelled));
    }
    tracing::info!(event_id = %id, reason, "Event cancelled");
    reload(conn, id)
}
