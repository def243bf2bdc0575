use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::*;
use crate::db::DatabaseError;
use crate::models::*;

const EVENT_COLUMNS: &str = "id, template_id, patient_id, owner_type, vital_type, occurrence_date,
     scheduled_start, scheduled_end, status, started_at, completed_at, completion_payload,
     value_flag, cancel_reason, critical, created_at, updated_at";

/// SQL list literal for a set of statuses, e.g. `'pending','started'`.
/// Built from the enum's static strings only.
fn status_list(statuses: &[EventStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Insert an occurrence unless one already exists for its template and date,
/// or the template no longer schedules that date.
///
/// The row is written from the template's current state in the same
/// statement: nothing is inserted past its end or retirement date, and
/// `scheduled_start`/`scheduled_end` use its current time of day with the
/// window length of `ev`. Returns `true` when this call created the row.
/// Concurrent callers racing on the same (template_id, occurrence_date)
/// resolve inside SQLite's unique index; exactly one of them sees `true`.
pub fn insert_occurrence(conn: &Connection, ev: &ScheduleEvent) -> Result<bool, DatabaseError> {
    let payload = ev
        .completion_payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let numeric = ev.completion_payload.as_ref().and_then(|p| p.numeric_value());
    let window = format!("{:+} seconds", (ev.scheduled_end - ev.scheduled_start).num_seconds());

    let affected = conn.execute(
        "INSERT INTO schedule_events (id, template_id, patient_id, owner_type, vital_type,
         occurrence_date, scheduled_start, scheduled_end, status, started_at, completed_at,
         completion_payload, numeric_value, value_flag, cancel_reason, critical, created_at, updated_at)
         SELECT ?1, t.id, ?3, ?4, ?5, ?6, ?6 || ' ' || t.time_of_day,
                datetime(?6 || ' ' || t.time_of_day, ?7),
                ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17
         FROM recurrence_templates t
         WHERE t.id = ?2 AND t.end_date >= ?6 AND (t.retired_on IS NULL OR t.retired_on >= ?6)
         ON CONFLICT (template_id, occurrence_date) DO NOTHING",
        params![
            ev.id.to_string(),
            ev.template_id.to_string(),
            ev.patient_id.to_string(),
            ev.owner_type.as_str(),
            ev.vital_type.map(|v| v.as_str()),
            format_date(ev.occurrence_date),
            window,
            ev.status.as_str(),
            ev.started_at.map(format_datetime),
            ev.completed_at.map(format_datetime),
            payload,
            numeric,
            ev.value_flag.map(|f| f.as_str()),
            ev.cancel_reason,
            ev.critical as i32,
            format_datetime(ev.created_at),
            format_datetime(ev.updated_at),
        ],
    )?;
    Ok(affected == 1)
}

pub fn get_event(conn: &Connection, id: &Uuid) -> Result<Option<ScheduleEvent>, DatabaseError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM schedule_events WHERE id = ?1");
    let event = conn
        .query_row(&sql, params![id.to_string()], row_to_event)
        .optional()?;
    Ok(event)
}

/// Current status only; used to explain a lost conditional update.
pub fn get_event_status(conn: &Connection, id: &Uuid) -> Result<Option<EventStatus>, DatabaseError> {
    let status = conn
        .query_row(
            "SELECT status FROM schedule_events WHERE id = ?1",
            params![id.to_string()],
            |row| col_enum::<EventStatus>(row, 0),
        )
        .optional()?;
    Ok(status)
}

pub fn get_event_by_occurrence(
    conn: &Connection,
    template_id: &Uuid,
    occurrence_date: NaiveDate,
) -> Result<Option<ScheduleEvent>, DatabaseError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM schedule_events WHERE template_id = ?1 AND occurrence_date = ?2"
    );
    let event = conn
        .query_row(
            &sql,
            params![template_id.to_string(), format_date(occurrence_date)],
            row_to_event,
        )
        .optional()?;
    Ok(event)
}

pub fn list_events(conn: &Connection, filter: &EventFilter) -> Result<Vec<ScheduleEvent>, DatabaseError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(patient_id) = filter.patient_id {
        clauses.push("patient_id = ?");
        values.push(Value::Text(patient_id.to_string()));
    }
    if let Some(template_id) = filter.template_id {
        clauses.push("template_id = ?");
        values.push(Value::Text(template_id.to_string()));
    }
    if let Some(owner_type) = filter.owner_type {
        clauses.push("owner_type = ?");
        values.push(Value::Text(owner_type.as_str().to_string()));
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(window) = filter.window {
        clauses.push("occurrence_date >= ? AND occurrence_date <= ?");
        values.push(Value::Text(format_date(window.start)));
        values.push(Value::Text(format_date(window.end)));
    }

    let mut sql = format!("SELECT {EVENT_COLUMNS} FROM schedule_events");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY scheduled_start ASC, id ASC");
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(i64::from(limit)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), row_to_event)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

// ═══════════════════════════════════════════
// Conditional transitions
// ═══════════════════════════════════════════
//
// Each function is one UPDATE guarded by the allowed source statuses and
// returns whether this caller won. Zero rows means another writer already
// moved the event (or it does not exist).

pub fn mark_started(
    conn: &Connection,
    id: &Uuid,
    from: &[EventStatus],
    at: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE schedule_events SET status = 'started', started_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status IN ({})",
        status_list(from)
    );
    let affected = conn.execute(&sql, params![id.to_string(), format_datetime(at)])?;
    Ok(affected == 1)
}

pub fn mark_completed(
    conn: &Connection,
    id: &Uuid,
    from: &[EventStatus],
    payload: &CompletionPayload,
    flag: Option<AbnormalFlag>,
    at: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE schedule_events
         SET status = 'completed', completed_at = ?2, completion_payload = ?3,
             numeric_value = ?4, value_flag = ?5, updated_at = ?2
         WHERE id = ?1 AND status IN ({})",
        status_list(from)
    );
    let affected = conn.execute(
        &sql,
        params![
            id.to_string(),
            format_datetime(at),
            serde_json::to_string(payload)?,
            payload.numeric_value(),
            flag.map(|f| f.as_str()),
        ],
    )?;
    Ok(affected == 1)
}

pub fn mark_cancelled(
    conn: &Connection,
    id: &Uuid,
    from: &[EventStatus],
    reason: &str,
    at: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE schedule_events SET status = 'cancelled', cancel_reason = ?2, updated_at = ?3
         WHERE id = ?1 AND status IN ({})",
        status_list(from)
    );
    let affected = conn.execute(&sql, params![id.to_string(), reason, format_datetime(at)])?;
    Ok(affected == 1)
}

pub fn mark_expired(
    conn: &Connection,
    id: &Uuid,
    from: &[EventStatus],
    at: NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE schedule_events SET status = 'expired', updated_at = ?2
         WHERE id = ?1 AND status IN ({})",
        status_list(from)
    );
    let affected = conn.execute(&sql, params![id.to_string(), format_datetime(at)])?;
    Ok(affected == 1)
}

/// Events in any of `statuses` whose window closed before `now`, oldest first.
pub fn find_overdue(
    conn: &Connection,
    statuses: &[EventStatus],
    now: NaiveDateTime,
    limit: u32,
) -> Result<Vec<ScheduleEvent>, DatabaseError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM schedule_events
         WHERE status IN ({}) AND scheduled_end < ?1
         ORDER BY scheduled_end ASC
         LIMIT ?2",
        status_list(statuses)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![format_datetime(now), limit], row_to_event)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Re-time still-pending occurrences on or after `from_date`.
pub fn reschedule_pending(
    conn: &Connection,
    template_id: &Uuid,
    from_date: NaiveDate,
    time_of_day: NaiveTime,
    grace_minutes: i64,
    at: NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE schedule_events
         SET scheduled_start = occurrence_date || ' ' || ?3,
             scheduled_end = datetime(occurrence_date || ' ' || ?3, ?4),
             updated_at = ?5
         WHERE template_id = ?1 AND occurrence_date >= ?2 AND status = 'pending'",
        params![
            template_id.to_string(),
            format_date(from_date),
            format_time(time_of_day),
            format!("+{grace_minutes} minutes"),
            format_datetime(at),
        ],
    )?;
    Ok(affected)
}

/// Cancel every unresolved occurrence dated after `after`.
pub fn cancel_open_after(
    conn: &Connection,
    template_id: &Uuid,
    after: NaiveDate,
    reason: &str,
    at: NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE schedule_events SET status = 'cancelled', cancel_reason = ?3, updated_at = ?4
         WHERE template_id = ?1 AND occurrence_date > ?2 AND status IN ('pending', 'started')",
        params![
            template_id.to_string(),
            format_date(after),
            reason,
            format_datetime(at),
        ],
    )?;
    Ok(affected)
}

// ═══════════════════════════════════════════
// Aggregation reads
// ═══════════════════════════════════════════

/// The slice of an event the aggregator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    pub occurrence_date: NaiveDate,
    pub status: EventStatus,
    pub numeric_value: Option<f64>,
    pub vital_type: Option<VitalType>,
}

/// Every event of one patient and category dated inside `window`, read in a
/// single statement.
pub fn window_outcomes(
    conn: &Connection,
    patient_id: &Uuid,
    owner_type: OwnerType,
    vital_type: Option<VitalType>,
    window: &DateWindow,
) -> Result<Vec<EventOutcome>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT occurrence_date, status, numeric_value, vital_type
         FROM schedule_events
         WHERE patient_id = ?1 AND owner_type = ?2
           AND (?3 IS NULL OR vital_type = ?3)
           AND occurrence_date >= ?4 AND occurrence_date <= ?5
         ORDER BY occurrence_date ASC",
    )?;
    let rows = stmt.query_map(
        params![
            patient_id.to_string(),
            owner_type.as_str(),
            vital_type.map(|v| v.as_str()),
            format_date(window.start),
            format_date(window.end),
        ],
        |row| {
            Ok(EventOutcome {
                occurrence_date: col_date(row, 0)?,
                status: col_enum(row, 1)?,
                numeric_value: row.get(2)?,
                vital_type: col_opt_enum(row, 3)?,
            })
        },
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Expired events for a patient, newest first.
pub fn list_expired(
    conn: &Connection,
    patient_id: &Uuid,
    owner_type: Option<OwnerType>,
    window: &DateWindow,
) -> Result<Vec<ScheduleEvent>, DatabaseError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM schedule_events
         WHERE patient_id = ?1 AND status = 'expired'
           AND (?2 IS NULL OR owner_type = ?2)
           AND occurrence_date >= ?3 AND occurrence_date <= ?4
         ORDER BY occurrence_date DESC, scheduled_start DESC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            patient_id.to_string(),
            owner_type.map(|o| o.as_str()),
            format_date(window.start),
            format_date(window.end),
        ],
        row_to_event,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Per-status totals for one template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: u32,
    pub pending: u32,
    pub started: u32,
    pub completed: u32,
    pub expired: u32,
    pub cancelled: u32,
    pub prior: u32,
}

/// Per-status totals for one template's events. `through` limits the count
/// to occurrences dated on or before it.
pub fn template_status_counts(
    conn: &Connection,
    template_id: &Uuid,
    through: Option<NaiveDate>,
) -> Result<StatusCounts, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM schedule_events
         WHERE template_id = ?1 AND (?2 IS NULL OR occurrence_date <= ?2)
         GROUP BY status",
    )?;
    let rows = stmt.query_map(params![template_id.to_string(), through.map(format_date)], |row| {
        Ok((col_enum::<EventStatus>(row, 0)?, row.get::<_, u32>(1)?))
    })?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let (status, n) = row?;
        counts.total += n;
        match status {
            EventStatus::Pending => counts.pending = n,
            EventStatus::Started => counts.started = n,
            EventStatus::Completed => counts.completed = n,
            EventStatus::Expired => counts.expired = n,
            EventStatus::Cancelled => counts.cancelled = n,
            EventStatus::Prior => counts.prior = n,
        }
    }
    Ok(counts)
}

fn row_to_event(row: &rusqlite::Row) -> Result<ScheduleEvent, rusqlite::Error> {
    let payload_json: Option<String> = row.get(11)?;
    let completion_payload = payload_json
        .map(|s| serde_json::from_str::<CompletionPayload>(&s).map_err(|e| conversion_failure(11, e)))
        .transpose()?;

    Ok(ScheduleEvent {
        id: col_uuid(row, 0)?,
        template_id: col_uuid(row, 1)?,
        patient_id: col_uuid(row, 2)?,
        owner_type: col_enum(row, 3)?,
        vital_type: col_opt_enum(row, 4)?,
        occurrence_date: col_date(row, 5)?,
        scheduled_start: col_datetime(row, 6)?,
        scheduled_end: col_datetime(row, 7)?,
        status: col_enum(row, 8)?,
        started_at: col_opt_datetime(row, 9)?,
        completed_at: col_opt_datetime(row, 10)?,
        completion_payload,
        value_flag: col_opt_enum(row, 12)?,
        cancel_reason: row.get(13)?,
        critical: row.get::<_, i32>(14)? != 0,
        created_at: col_datetime(row, 15)?,
        updated_at: col_datetime(row, 16)?,
    })
}
