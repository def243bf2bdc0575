use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::*;
use crate::db::DatabaseError;
use crate::models::*;

const TEMPLATE_COLUMNS: &str = "id, owner_type, owner_id, patient_id, vital_type, start_date, end_date,
     frequency, interval, days_of_week, time_of_day, critical, last_materialized_through,
     retired_on, created_at";

pub fn insert_template(conn: &Connection, t: &RecurrenceTemplate) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO recurrence_templates (id, owner_type, owner_id, patient_id, vital_type,
         start_date, end_date, frequency, interval, days_of_week, time_of_day, critical,
         last_materialized_through, retired_on, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            t.id.to_string(),
            t.owner_type.as_str(),
            t.owner_id.to_string(),
            t.patient_id.to_string(),
            t.vital_type.map(|v| v.as_str()),
            format_date(t.rule.start_date),
            format_date(t.rule.end_date),
            t.rule.frequency.as_str(),
            t.rule.interval,
            t.rule.days_as_csv(),
            format_time(t.time_of_day),
            t.critical as i32,
            t.last_materialized_through.map(format_date),
            t.retired_on.map(format_date),
            format_datetime(t.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_template(conn: &Connection, id: &Uuid) -> Result<Option<RecurrenceTemplate>, DatabaseError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM recurrence_templates WHERE id = ?1");
    let template = conn
        .query_row(&sql, params![id.to_string()], row_to_template)
        .optional()?;
    Ok(template)
}

pub fn list_templates(
    conn: &Connection,
    filter: &TemplateFilter,
) -> Result<Vec<RecurrenceTemplate>, DatabaseError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(patient_id) = filter.patient_id {
        values.push(Value::Text(patient_id.to_string()));
        clauses.push("patient_id = ?");
    }
    if let Some(owner_type) = filter.owner_type {
        values.push(Value::Text(owner_type.as_str().to_string()));
        clauses.push("owner_type = ?");
    }
    if !filter.include_retired {
        clauses.push("retired_on IS NULL");
    }

    let mut sql = format!("SELECT {TEMPLATE_COLUMNS} FROM recurrence_templates");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at ASC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), row_to_template)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Move the materialization watermark forward to `through`.
///
/// Only applies when the stored watermark is unset or strictly older, so a
/// slower concurrent run can never move it backwards. Returns whether the
/// row changed.
pub fn advance_watermark(
    conn: &Connection,
    template_id: &Uuid,
    through: NaiveDate,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE recurrence_templates
         SET last_materialized_through = ?2
         WHERE id = ?1
           AND (last_materialized_through IS NULL OR last_materialized_through < ?2)",
        params![template_id.to_string(), format_date(through)],
    )?;
    Ok(affected == 1)
}

/// Push `end_date` later. Retired templates and earlier dates are left alone.
pub fn extend_end_date(
    conn: &Connection,
    template_id: &Uuid,
    new_end: NaiveDate,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE recurrence_templates
         SET end_date = ?2
         WHERE id = ?1 AND retired_on IS NULL AND end_date < ?2",
        params![template_id.to_string(), format_date(new_end)],
    )?;
    Ok(affected == 1)
}

pub fn update_time_of_day(
    conn: &Connection,
    template_id: &Uuid,
    time_of_day: NaiveTime,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE recurrence_templates SET time_of_day = ?2 WHERE id = ?1 AND retired_on IS NULL",
        params![template_id.to_string(), format_time(time_of_day)],
    )?;
    Ok(affected == 1)
}

/// Soft-retire a template. A template is retired at most once.
pub fn retire_template(
    conn: &Connection,
    template_id: &Uuid,
    on: NaiveDate,
) -> Result<bool, DatabaseError> {
    let affected = conn.execute(
        "UPDATE recurrence_templates SET retired_on = ?2 WHERE id = ?1 AND retired_on IS NULL",
        params![template_id.to_string(), format_date(on)],
    )?;
    Ok(affected == 1)
}

fn parse_days(csv: &str) -> Result<BTreeSet<u32>, std::num::ParseIntError> {
    csv.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| part.trim().parse::<u32>())
        .collect()
}

fn row_to_template(row: &rusqlite::Row) -> Result<RecurrenceTemplate, rusqlite::Error> {
    let days_csv: String = row.get(9)?;
    let days_of_week = parse_days(&days_csv).map_err(|e| conversion_failure(9, e))?;

    Ok(RecurrenceTemplate {
        id: col_uuid(row, 0)?,
        owner_type: col_enum(row, 1)?,
        owner_id: col_uuid(row, 2)?,
        patient_id: col_uuid(row, 3)?,
        vital_type: col_opt_enum(row, 4)?,
        rule: RecurrenceRule {
            frequency: col_enum(row, 7)?,
            interval: row.get(8)?,
            days_of_week,
            start_date: col_date(row, 5)?,
            end_date: col_date(row, 6)?,
        },
        time_of_day: col_time(row, 10)?,
        critical: row.get::<_, i32>(11)? != 0,
        last_materialized_through: col_opt_date(row, 12)?,
        retired_on: col_opt_date(row, 13)?,
        created_at: col_datetime(row, 14)?,
    })
}
