use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
pub(crate) use str_enum;

str_enum!(OwnerType {
    Medication => "medication",
    Vital => "vital",
    Appointment => "appointment",
});

impl OwnerType {
    pub const ALL: [OwnerType; 3] = [OwnerType::Medication, OwnerType::Vital, OwnerType::Appointment];
}

str_enum!(Frequency {
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
});

str_enum!(EventStatus {
    Pending => "pending",
    Started => "started",
    Completed => "completed",
    Expired => "expired",
    Cancelled => "cancelled",
    Prior => "prior",
});

impl EventStatus {
    /// Completed and cancelled events accept no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Cancelled)
    }

    /// Resolved events count toward adherence (completed, expired, cancelled).
    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Expired | EventStatus::Cancelled
        )
    }
}

str_enum!(AbnormalFlag {
    Normal => "normal",
    Low => "low",
    High => "high",
    CriticalLow => "critical_low",
    CriticalHigh => "critical_high",
});

impl AbnormalFlag {
    pub fn is_critical(self) -> bool {
        matches!(self, AbnormalFlag::CriticalLow | AbnormalFlag::CriticalHigh)
    }
}

str_enum!(AppointmentOutcome {
    Attended => "attended",
    AttendedLate => "attended_late",
    LeftEarly => "left_early",
    Telehealth => "telehealth",
});

str_enum!(Trend {
    Up => "up",
    Down => "down",
    Stable => "stable",
});
