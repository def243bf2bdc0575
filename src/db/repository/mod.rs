//! Repository layer: entity-scoped database operations.
//!
//! Plain functions over `&Connection`, one sub-module per table. Every
//! state change is a single statement so callers on separate connections
//! cannot interleave a read and a write.

mod schedule_event;
mod template;

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

use super::DatabaseError;

pub use schedule_event::*;
pub use template::*;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const TIME_FORMAT: &str = "%H:%M:%S";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn format_time(t: NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

// ═══════════════════════════════════════════
// Column decoding
// ═══════════════════════════════════════════

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn col_uuid(row: &Row, idx: usize) -> Result<Uuid, rusqlite::Error> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_failure(idx, e))
}

fn col_date(row: &Row, idx: usize) -> Result<NaiveDate, rusqlite::Error> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_failure(idx, e))
}

fn col_opt_date(row: &Row, idx: usize) -> Result<Option<NaiveDate>, rusqlite::Error> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_failure(idx, e)))
        .transpose()
}

fn col_datetime(row: &Row, idx: usize) -> Result<NaiveDateTime, rusqlite::Error> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(|e| conversion_failure(idx, e))
}

fn col_opt_datetime(row: &Row, idx: usize) -> Result<Option<NaiveDateTime>, rusqlite::Error> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(|e| conversion_failure(idx, e))
    })
    .transpose()
}

fn col_time(row: &Row, idx: usize) -> Result<NaiveTime, rusqlite::Error> {
    let s: String = row.get(idx)?;
    NaiveTime::parse_from_str(&s, TIME_FORMAT).map_err(|e| conversion_failure(idx, e))
}

fn col_enum<T>(row: &Row, idx: usize) -> Result<T, rusqlite::Error>
where
    T: FromStr<Err = DatabaseError>,
{
    let s: String = row.get(idx)?;
    T::from_str(&s).map_err(|e| conversion_failure(idx, e))
}

fn col_opt_enum<T>(row: &Row, idx: usize) -> Result<Option<T>, rusqlite::Error>
where
    T: FromStr<Err = DatabaseError>,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|s| T::from_str(&s).map_err(|e| conversion_failure(idx, e)))
        .transpose()
}
