use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Frequency, OwnerType};
use super::vital_sign::VitalType;

/// The recurrence half of a template: which calendar dates are due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// ISO weekday numbers, Monday = 1 .. Sunday = 7. Only meaningful for weekly rules.
    #[serde(default)]
    pub days_of_week: BTreeSet<u32>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    pub fn daily(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            frequency: Frequency::Daily,
            interval: 1,
            days_of_week: BTreeSet::new(),
            start_date,
            end_date,
        }
    }

    pub fn weekly(start_date: NaiveDate, end_date: NaiveDate, days: impl IntoIterator<Item = u32>) -> Self {
        Self {
            frequency: Frequency::Weekly,
            interval: 1,
            days_of_week: days.into_iter().collect(),
            start_date,
            end_date,
        }
    }

    pub fn monthly(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            frequency: Frequency::Monthly,
            interval: 1,
            days_of_week: BTreeSet::new(),
            start_date,
            end_date,
        }
    }

    pub fn every(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    /// Storage form of the weekday set, e.g. "1,3,5".
    pub fn days_as_csv(&self) -> String {
        self.days_of_week
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A prescribed recurring obligation as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceTemplate {
    pub id: Uuid,
    pub owner_type: OwnerType,
    pub owner_id: Uuid,
    pub patient_id: Uuid,
    pub vital_type: Option<VitalType>,
    pub rule: RecurrenceRule,
    pub time_of_day: NaiveTime,
    pub critical: bool,
    pub last_materialized_through: Option<NaiveDate>,
    pub retired_on: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

impl RecurrenceTemplate {
    /// Last date on which the template can still produce an occurrence.
    pub fn effective_end(&self) -> NaiveDate {
        match self.retired_on {
            Some(retired) => retired.min(self.rule.end_date),
            None => self.rule.end_date,
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired_on.is_some()
    }
}

/// Caller input for creating a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub owner_type: OwnerType,
    pub owner_id: Uuid,
    pub patient_id: Uuid,
    #[serde(default)]
    pub vital_type: Option<VitalType>,
    pub rule: RecurrenceRule,
    pub time_of_day: NaiveTime,
    #[serde(default)]
    pub critical: bool,
}
