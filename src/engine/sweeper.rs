//! Expiry sweep: overdue pending/started events become expired.

use chrono::NaiveDateTime;
use rusqlite::Connection;

use super::error::EngineError;
use super::signals::{emit, EngineSignal};
use super::traits::SignalDispatcher;
use crate::db::repository;
use crate::models::EventStatus;

pub const SWEEP_SOURCES: &[EventStatus] = &[EventStatus::Pending, EventStatus::Started];
const PRIOR_SOURCES: &[EventStatus] = &[EventStatus::Prior];

/// Expire every event in `sources` whose window closed before `now`.
///
/// Rows are claimed one at a time with a guarded UPDATE, so a completion
/// committed between the SELECT and the UPDATE keeps its event. Returns the
/// number of events this call expired.
fn expire_overdue(
    conn: &Connection,
    sources: &[EventStatus],
    now: NaiveDateTime,
    batch_size: u32,
    dispatcher: Option<&dyn SignalDispatcher>,
) -> Result<u32, EngineError> {
    let batch_size = batch_size.max(1);
    let mut expired = 0u32;

    loop {
        let batch = repository::find_overdue(conn, sources, now, batch_size)?;
        let fetched = batch.len();
        let mut won_in_batch = 0usize;

        for mut event in batch {
            if !repository::mark_expired(conn, &event.id, sources, now)? {
                tracing::debug!(event_id = %event.id, "Overdue event resolved elsewhere");
                continue;
            }
            won_in_batch += 1;
            event.status = EventStatus::Expired;
            event.updated_at = now;
            if let Some(dispatcher) = dispatcher {
                emit(dispatcher, EngineSignal::missed(&event));
            }
        }

        expired += won_in_batch as u32;
        // A short batch means the backlog is drained. A batch where every row
        // was taken by another writer also ends the run, so the next SELECT
        // cannot keep returning the same rows.
        if fetched < batch_size as usize || won_in_batch == 0 {
            break;
        }
    }

    Ok(expired)
}

/// One sweep pass. Emits `event.missed` for each event it expired.
pub fn sweep_expired(
    conn: &Connection,
    now: NaiveDateTime,
    batch_size: u32,
    dispatcher: &dyn SignalDispatcher,
) -> Result<u32, EngineError> {
    let start = std::time::Instant::now();
    let expired = expire_overdue(conn, SWEEP_SOURCES, now, batch_size, Some(dispatcher))?;
    if expired > 0 {
        tracing::info!(
            expired,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Expiry sweep finished"
        );
    }
    Ok(expired)
}

/// Expire imported `prior` occurrences whose window has closed. These are
/// history, so no signal is raised.
pub fn reconcile_prior(conn: &Connection, now: NaiveDateTime, batch_size: u32) -> Result<u32, EngineError> {
    let expired = expire_overdue(conn, PRIOR_SOURCES, now, batch_size, None)?;
    if expired > 0 {
        tracing::info!(expired, "Reconciled prior occurrences");
    }
    Ok(expired)
}
