use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AbnormalFlag, AppointmentOutcome, EventStatus, OwnerType};
use super::vital_sign::VitalType;

/// One dated occurrence of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub id: Uuid,
    pub template_id: Uuid,
    pub patient_id: Uuid,
    pub owner_type: OwnerType,
    pub vital_type: Option<VitalType>,
    pub occurrence_date: NaiveDate,
    pub scheduled_start: NaiveDateTime,
    pub scheduled_end: NaiveDateTime,
    pub status: EventStatus,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub completion_payload: Option<CompletionPayload>,
    pub value_flag: Option<AbnormalFlag>,
    pub cancel_reason: Option<String>,
    pub critical: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// What the patient reported when honoring an occurrence. The variant must
/// match the owning template's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionPayload {
    Medication {
        taken: bool,
        #[serde(default)]
        taken_at: Option<NaiveDateTime>,
    },
    Vital {
        value: f64,
        unit: String,
        /// Diastolic for blood pressure.
        #[serde(default)]
        secondary_value: Option<f64>,
    },
    Appointment {
        outcome: AppointmentOutcome,
        #[serde(default)]
        notes: Option<String>,
    },
}

impl CompletionPayload {
    pub fn owner_type(&self) -> OwnerType {
        match self {
            CompletionPayload::Medication { .. } => OwnerType::Medication,
            CompletionPayload::Vital { .. } => OwnerType::Vital,
            CompletionPayload::Appointment { .. } => OwnerType::Appointment,
        }
    }

    /// Primary numeric value, for the categories that have one.
    pub fn numeric_value(&self) -> Option<f64> {
        match self {
            CompletionPayload::Vital { value, .. } => Some(*value),
            _ => None,
        }
    }
}
