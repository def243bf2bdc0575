//! Engine error taxonomy.
//!
//! Separate from `DatabaseError` so callers can tell a rejected request
//! (bad rule, lost race, wrong payload) from a storage fault.

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::EventStatus;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),

    #[error("Event {event_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        event_id: Uuid,
        from: EventStatus,
        to: EventStatus,
    },

    #[error(
        "Materialization of template {template_id} stopped after {} new events (through {materialized_through:?}): {source}",
        .created.len()
    )]
    MaterializationPartialFailure {
        template_id: Uuid,
        /// Watermark left in place; a retry resumes after this date.
        materialized_through: Option<NaiveDate>,
        created: Vec<Uuid>,
        #[source]
        source: DatabaseError,
    },

    #[error("Invalid completion payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid window: {start} is after {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("Template not found: {0}")]
    TemplateNotFound(Uuid),

    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Template {0} is retired")]
    TemplateRetired(Uuid),
}

impl EngineError {
    /// Whether retrying the same call later can succeed without the caller
    /// changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Database(_) | EngineError::MaterializationPartialFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_both_states() {
        let err = EngineError::InvalidStateTransition {
            event_id: Uuid::nil(),
            from: EventStatus::Completed,
            to: EventStatus::Cancelled,
        };
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("cancelled"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn partial_failure_is_retryable() {
        let err = EngineError::MaterializationPartialFailure {
            template_id: Uuid::nil(),
            materialized_through: None,
            created: vec![],
            source: DatabaseError::ConstraintViolation("disk full".into()),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("disk full"));
    }
}
