use serde::{Deserialize, Serialize};

use super::enums::{str_enum, AbnormalFlag};
use crate::db::DatabaseError;

str_enum!(VitalType {
    Temperature => "temperature",
    BloodPressure => "blood_pressure",
    Weight => "weight",
    Height => "height",
    HeartRate => "heart_rate",
    BloodGlucose => "blood_glucose",
    OxygenSaturation => "oxygen_saturation",
});

impl VitalType {
    /// Unit a submitted measurement must carry.
    pub fn default_unit(self) -> &'static str {
        match self {
            VitalType::Temperature => "°C",
            VitalType::BloodPressure => "mmHg",
            VitalType::Weight => "kg",
            VitalType::Height => "cm",
            VitalType::HeartRate => "bpm",
            VitalType::BloodGlucose => "mg/dL",
            VitalType::OxygenSaturation => "%",
        }
    }

    /// Declared adult reference range. Blood pressure is judged on the
    /// systolic (primary) value.
    pub fn reference_range(self) -> VitalRange {
        match self {
            VitalType::Temperature => VitalRange::new(36.1, 37.8, 35.0, 40.0),
            VitalType::BloodPressure => VitalRange::new(90.0, 130.0, 80.0, 180.0),
            VitalType::HeartRate => VitalRange::new(60.0, 100.0, 40.0, 130.0),
            VitalType::BloodGlucose => VitalRange::new(70.0, 140.0, 54.0, 250.0),
            VitalType::OxygenSaturation => VitalRange::new(95.0, 100.0, 90.0, 100.0),
            VitalType::Weight | VitalType::Height => VitalRange::UNBOUNDED,
        }
    }

    /// Flag a measurement against this type's reference range.
    pub fn classify(self, value: f64) -> AbnormalFlag {
        self.reference_range().classify(value)
    }

    /// Whether `unit` names this type's unit (case-insensitive, "C" accepted for °C).
    pub fn accepts_unit(self, unit: &str) -> bool {
        let unit = unit.trim();
        if unit.eq_ignore_ascii_case(self.default_unit()) {
            return true;
        }
        matches!(self, VitalType::Temperature) && unit.eq_ignore_ascii_case("C")
    }
}

/// Normal and critical bounds for a vital type. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalRange {
    pub normal_low: Option<f64>,
    pub normal_high: Option<f64>,
    pub critical_low: Option<f64>,
    pub critical_high: Option<f64>,
}

impl VitalRange {
    pub const UNBOUNDED: VitalRange = VitalRange {
        normal_low: None,
        normal_high: None,
        critical_low: None,
        critical_high: None,
    };

    const fn new(normal_low: f64, normal_high: f64, critical_low: f64, critical_high: f64) -> Self {
        Self {
            normal_low: Some(normal_low),
            normal_high: Some(normal_high),
            critical_low: Some(critical_low),
            critical_high: Some(critical_high),
        }
    }

    pub fn classify(&self, value: f64) -> AbnormalFlag {
        if self.critical_low.is_some_and(|b| value < b) {
            AbnormalFlag::CriticalLow
        } else if self.critical_high.is_some_and(|b| value > b) {
            AbnormalFlag::CriticalHigh
        } else if self.normal_low.is_some_and(|b| value < b) {
            AbnormalFlag::Low
        } else if self.normal_high.is_some_and(|b| value > b) {
            AbnormalFlag::High
        } else {
            AbnormalFlag::Normal
        }
    }
}
