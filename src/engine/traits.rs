//! Seams to the engine's external collaborators.
//!
//! - Clock: the wall-clock source (`now()`), fixed in tests
//! - SignalDispatcher: fire-and-forget outbound notifications

use chrono::{NaiveDateTime, Utc};

use super::signals::{DispatchError, EngineSignal};

/// Wall-clock source. All engine timestamps are naive UTC.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Receives `event.missed` / `event.completed` signals.
///
/// Delivery is the dispatcher's concern: the engine logs a returned error
/// and carries on, it never retries or rolls back.
pub trait SignalDispatcher: Send + Sync {
    fn dispatch(&self, signal: EngineSignal) -> Result<(), DispatchError>;
}
