//! Schedule engine.
//!
//! - recurrence: pure rule expansion into occurrence dates
//! - materializer: idempotent, resumable event creation
//! - lifecycle: guarded start / complete / cancel transitions
//! - sweeper + background: expiry of lapsed occurrences
//! - adherence: read-time statistics and missed-event reports
//! - service: `CareEngine`, the façade tying them together

pub mod adherence;
pub mod background;
pub mod error;
pub mod lifecycle;
pub mod materializer;
pub mod recurrence;
pub mod service;
pub mod signals;
pub mod sweeper;
pub mod traits;

pub use background::SweeperHandle;
pub use error::EngineError;
pub use materializer::BatchMaterialization;
pub use service::CareEngine;
pub use signals::{ChannelDispatcher, DispatchError, EngineSignal, NoopDispatcher};
pub use traits::{Clock, FixedClock, SignalDispatcher, SystemClock};
