use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{OwnerType, Trend};
use super::vital_sign::VitalType;

/// Inclusive range of occurrence dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// First day of the second half. Odd-length windows give the middle day
    /// to the second half.
    pub fn midpoint(&self) -> NaiveDate {
        self.start + chrono::Duration::days(self.days() / 2)
    }
}

/// Read-time adherence projection for one patient, category and window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdherenceSnapshot {
    pub patient_id: Uuid,
    pub category: OwnerType,
    pub vital_type: Option<VitalType>,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub total_count: u32,
    pub completed_count: u32,
    pub expired_count: u32,
    pub cancelled_count: u32,
    pub completion_rate: f64,
    pub average_value: Option<f64>,
    pub trend: Trend,
}

/// A missed (expired) occurrence as listed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissedEvent {
    pub event_id: Uuid,
    pub template_id: Uuid,
    pub owner_type: OwnerType,
    pub vital_type: Option<VitalType>,
    pub occurrence_date: NaiveDate,
    pub scheduled_start: NaiveDateTime,
    pub scheduled_end: NaiveDateTime,
    pub critical: bool,
}

/// Uncapped expired totals per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedCounts {
    pub medications: u32,
    pub appointments: u32,
    pub vitals: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissedEventsReport {
    pub medications: Vec<MissedEvent>,
    pub appointments: Vec<MissedEvent>,
    pub vitals: Vec<MissedEvent>,
    pub counts: MissedCounts,
}

/// Remaining/total bookkeeping for one template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateProgress {
    pub template_id: Uuid,
    /// Occurrences the full rule produces up to the effective end date.
    pub expected_total: u32,
    pub materialized: u32,
    pub completed: u32,
    pub expired: u32,
    pub cancelled: u32,
    /// Expected occurrences, dated on or before the effective end, not yet
    /// resolved (completed, expired or cancelled).
    pub remaining: u32,
    pub materialized_through: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn window_days_are_inclusive() {
        let w = DateWindow::new(d(2025, 1, 1), d(2025, 1, 10));
        assert_eq!(w.days(), 10);
        assert_eq!(w.midpoint(), d(2025, 1, 6));
    }

    #[test]
    fn single_day_window_midpoint_is_start() {
        let w = DateWindow::new(d(2025, 3, 3), d(2025, 3, 3));
        assert_eq!(w.midpoint(), d(2025, 3, 3));
        assert!(w.contains(d(2025, 3, 3)));
    }

    #[test]
    fn inverted_window_is_invalid() {
        assert!(!DateWindow::new(d(2025, 2, 1), d(2025, 1, 1)).is_valid());
    }
}
