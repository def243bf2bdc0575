//! `CareEngine`: the public façade.
//!
//! Holds no connection: every call opens its own, so the engine can be
//! shared across threads behind an `Arc` and used next to the background
//! sweeper without any locking of its own.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use uuid::Uuid;

use super::adherence;
use super::background::{start_background_sweeper, SweeperHandle};
use super::error::EngineError;
use super::lifecycle;
use super::materializer::{self, BatchMaterialization};
use super::recurrence::{expand, normalize_rule, validate_rule};
use super::signals::NoopDispatcher;
use super::sweeper;
use super::traits::{Clock, SignalDispatcher, SystemClock};
use crate::config::EngineConfig;
use crate::db::repository;
use crate::db::sqlite::open_database;
use crate::db::DatabaseError;
use crate::models::{
    AdherenceSnapshot, CompletionPayload, DateWindow, EventFilter, EventStatus, MissedEventsReport,
    OwnerType, RecurrenceTemplate, ScheduleEvent, TemplateFilter, TemplateProgress, TemplateSpec,
    VitalType,
};

const RETIRED_REASON: &str = "template retired";

pub struct CareEngine {
    db_path: PathBuf,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn SignalDispatcher>,
}

impl CareEngine {
    /// Engine over the database at `db_path`, using the system clock and
    /// dropping signals until a dispatcher is attached.
    pub fn new(db_path: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            db_path: db_path.into(),
            config,
            clock: Arc::new(SystemClock),
            dispatcher: Arc::new(NoopDispatcher),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn SignalDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection, EngineError> {
        Ok(open_database(&self.db_path)?)
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    fn load_template(conn: &Connection, id: &Uuid) -> Result<RecurrenceTemplate, EngineError> {
        repository::get_template(conn, id)?.ok_or(EngineError::TemplateNotFound(*id))
    }

    /// Load a template that must still be active.
    fn load_active_template(conn: &Connection, id: &Uuid) -> Result<RecurrenceTemplate, EngineError> {
        let template = Self::load_template(conn, id)?;
        if template.is_retired() {
            return Err(EngineError::TemplateRetired(*id));
        }
        Ok(template)
    }

    // ═══════════════════════════════════════════
    // Templates
    // ═══════════════════════════════════════════

    /// Validate and store a template, then materialize its first
    /// `materialize_horizon_days`. A failure in that first materialization
    /// is logged and left to the nightly batch; the template is kept.
    pub fn create_template(&self, spec: TemplateSpec) -> Result<Uuid, EngineError> {
        validate_rule(&spec.rule)?;
        match (spec.owner_type, spec.vital_type) {
            (OwnerType::Vital, None) => {
                return Err(EngineError::InvalidRecurrence(
                    "vital templates need a vital type".into(),
                ))
            }
            (OwnerType::Medication | OwnerType::Appointment, Some(_)) => {
                return Err(EngineError::InvalidRecurrence(format!(
                    "{} templates cannot carry a vital type",
                    spec.owner_type
                )))
            }
            _ => {}
        }

        let now = self.now();
        let template = RecurrenceTemplate {
            id: Uuid::new_v4(),
            owner_type: spec.owner_type,
            owner_id: spec.owner_id,
            patient_id: spec.patient_id,
            vital_type: spec.vital_type,
            rule: normalize_rule(spec.rule),
            time_of_day: spec.time_of_day,
            critical: spec.critical,
            last_materialized_through: None,
            retired_on: None,
            created_at: now,
        };

        let conn = self.open()?;
        repository::insert_template(&conn, &template)?;
        tracing::info!(
            template_id = %template.id,
            owner_type = %template.owner_type,
            frequency = %template.rule.frequency,
            "Template created"
        );

        let horizon = now.date() + Duration::days(self.config.materialize_horizon_days);
        if let Err(e) = materializer::materialize(
            &conn,
            &template.id,
            horizon,
            self.config.grace_window_minutes,
            now,
        ) {
            tracing::warn!(template_id = %template.id, error = %e, "Initial materialization incomplete");
        }

        Ok(template.id)
    }

    pub fn get_template(&self, id: &Uuid) -> Result<RecurrenceTemplate, EngineError> {
        let conn = self.open()?;
        Self::load_template(&conn, id)
    }

    pub fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<RecurrenceTemplate>, EngineError> {
        let conn = self.open()?;
        Ok(repository::list_templates(&conn, filter)?)
    }

    /// Move the end date later. Shortening a template is retirement.
    pub fn extend_template(&self, id: &Uuid, new_end: NaiveDate) -> Result<RecurrenceTemplate, EngineError> {
        let conn = self.open()?;
        let template = Self::load_active_template(&conn, id)?;
        if new_end <= template.rule.end_date {
            return Err(EngineError::InvalidRecurrence(format!(
                "new end {new_end} is not after current end {}",
                template.rule.end_date
            )));
        }

        if !repository::extend_end_date(&conn, id, new_end)? {
            // Retired or extended further by someone else in between.
            let current = Self::load_active_template(&conn, id)?;
            return Err(EngineError::InvalidRecurrence(format!(
                "new end {new_end} is not after current end {}",
                current.rule.end_date
            )));
        }
        tracing::info!(template_id = %id, new_end = %new_end, "Template extended");
        Self::load_template(&conn, id)
    }

    /// Change the time of day. Pending occurrences dated on or after
    /// `effective_from` are re-timed in the same transaction; returns how
    /// many were moved.
    pub fn reschedule_template(
        &self,
        id: &Uuid,
        time_of_day: NaiveTime,
        effective_from: NaiveDate,
    ) -> Result<usize, EngineError> {
        let mut conn = self.open()?;
        let now = self.now();
        let tx = conn.transaction().map_err(DatabaseError::from)?;

        if !repository::update_time_of_day(&tx, id, time_of_day)? {
            Self::load_active_template(&tx, id)?;
        }
        let moved = repository::reschedule_pending(
            &tx,
            id,
            effective_from,
            time_of_day,
            self.config.grace_window_minutes,
            now,
        )?;
        tx.commit().map_err(DatabaseError::from)?;

        tracing::info!(
            template_id = %id,
            time_of_day = %time_of_day,
            effective_from = %effective_from,
            moved,
            "Template rescheduled"
        );
        Ok(moved)
    }

    /// Soft-retire. Nothing is materialized after `on`, and unresolved
    /// occurrences dated after it are cancelled. Returns how many.
    pub fn retire_template(&self, id: &Uuid, on: NaiveDate) -> Result<usize, EngineError> {
        let mut conn = self.open()?;
        let now = self.now();
        let tx = conn.transaction().map_err(DatabaseError::from)?;

        if !repository::retire_template(&tx, id, on)? {
            Self::load_active_template(&tx, id)?;
        }
        let cancelled = repository::cancel_open_after(&tx, id, on, RETIRED_REASON, now)?;
        tx.commit().map_err(DatabaseError::from)?;

        tracing::info!(template_id = %id, on = %on, cancelled, "Template retired");
        Ok(cancelled)
    }

    pub fn template_progress(&self, id: &Uuid) -> Result<TemplateProgress, EngineError> {
        let conn = self.open()?;
        adherence::template_progress(&conn, id)
    }

    // ═══════════════════════════════════════════
    // Materialization
    // ═══════════════════════════════════════════

    pub fn materialize_range(&self, template_id: &Uuid, through: NaiveDate) -> Result<Vec<Uuid>, EngineError> {
        let conn = self.open()?;
        materializer::materialize(
            &conn,
            template_id,
            through,
            self.config.grace_window_minutes,
            self.now(),
        )
    }

    pub fn materialize_all_active(&self, through: NaiveDate) -> Result<BatchMaterialization, EngineError> {
        let conn = self.open()?;
        materializer::materialize_all_active(&conn, through, self.config.grace_window_minutes, self.now())
    }

    /// Import a historical occurrence as `prior`. `date` must be one the
    /// template's rule produces. Returns the id of the stored event, which
    /// is the existing one when the date was already materialized.
    pub fn record_prior_occurrence(&self, template_id: &Uuid, date: NaiveDate) -> Result<Uuid, EngineError> {
        let conn = self.open()?;
        let template = Self::load_template(&conn, template_id)?;
        if date > template.effective_end() || expand(&template.rule, date, date)?.is_empty() {
            return Err(EngineError::InvalidRecurrence(format!(
                "{date} is not an occurrence of template {template_id}"
            )));
        }

        let now = self.now();
        let event = materializer::new_occurrence(
            &template,
            date,
            EventStatus::Prior,
            self.config.grace_window_minutes,
            now,
        );
        if repository::insert_occurrence(&conn, &event)? {
            tracing::info!(template_id = %template_id, date = %date, "Prior occurrence recorded");
            return Ok(event.id);
        }

        // Nothing inserted: either the date is already stored or the
        // template was retired before it in the meantime.
        let existing = repository::get_event_by_occurrence(&conn, template_id, date)?
            .ok_or(EngineError::TemplateRetired(*template_id))?;
        Ok(existing.id)
    }

    // ═══════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════

    pub fn start_event(&self, id: &Uuid) -> Result<ScheduleEvent, EngineError> {
        let conn = self.open()?;
        lifecycle::start_event(&conn, id, self.now())
    }

    pub fn complete_event(&self, id: &Uuid, payload: &CompletionPayload) -> Result<ScheduleEvent, EngineError> {
        let conn = self.open()?;
        lifecycle::complete_event(&conn, id, payload, self.now(), self.dispatcher.as_ref())
    }

    pub fn cancel_event(&self, id: &Uuid, reason: &str) -> Result<ScheduleEvent, EngineError> {
        let conn = self.open()?;
        lifecycle::cancel_event(&conn, id, reason, self.now())
    }

    pub fn get_event(&self, id: &Uuid) -> Result<ScheduleEvent, EngineError> {
        let conn = self.open()?;
        repository::get_event(&conn, id)?.ok_or(EngineError::EventNotFound(*id))
    }

    pub fn list_events(&self, filter: &EventFilter) -> Result<Vec<ScheduleEvent>, EngineError> {
        if let Some(window) = &filter.window {
            if !window.is_valid() {
                return Err(EngineError::InvalidWindow {
                    start: window.start,
                    end: window.end,
                });
            }
        }
        let conn = self.open()?;
        Ok(repository::list_events(&conn, filter)?)
    }

    // ═══════════════════════════════════════════
    // Sweeping
    // ═══════════════════════════════════════════

    pub fn sweep_expired(&self, now: NaiveDateTime) -> Result<u32, EngineError> {
        let conn = self.open()?;
        sweeper::sweep_expired(&conn, now, self.config.sweep_batch_size, self.dispatcher.as_ref())
    }

    pub fn reconcile_prior(&self, now: NaiveDateTime) -> Result<u32, EngineError> {
        let conn = self.open()?;
        sweeper::reconcile_prior(&conn, now, self.config.sweep_batch_size)
    }

    /// Run `sweep_expired` every `sweep_interval_secs` on a background
    /// thread until the handle is dropped.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        start_background_sweeper(
            self.db_path.clone(),
            self.config.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.dispatcher),
        )
    }

    // ═══════════════════════════════════════════
    // Adherence
    // ═══════════════════════════════════════════

    pub fn get_adherence_stats(
        &self,
        patient_id: &Uuid,
        category: OwnerType,
        vital_type: Option<VitalType>,
        window: &DateWindow,
    ) -> Result<AdherenceSnapshot, EngineError> {
        let conn = self.open()?;
        adherence::get_stats(
            &conn,
            patient_id,
            category,
            vital_type,
            window,
            self.config.trend_tolerance,
        )
    }

    pub fn list_missed_events(
        &self,
        patient_id: &Uuid,
        category: Option<OwnerType>,
        window: &DateWindow,
    ) -> Result<MissedEventsReport, EngineError> {
        let conn = self.open()?;
        adherence::list_missed(
            &conn,
            patient_id,
            category,
            window,
            self.config.missed_cap_per_category,
        )
    }
}
