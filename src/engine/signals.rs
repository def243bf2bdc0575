//! Outbound signals and the stock dispatchers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use super::traits::SignalDispatcher;
use crate::models::{AbnormalFlag, OwnerType, ScheduleEvent};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Signal channel closed")]
    ChannelClosed,

    #[error("Dispatch failed: {0}")]
    Failed(String),
}

/// Notification-worthy facts the engine emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineSignal {
    #[serde(rename = "event.missed")]
    EventMissed {
        event_id: Uuid,
        template_id: Uuid,
        patient_id: Uuid,
        owner_type: OwnerType,
        occurrence_date: NaiveDate,
        critical: bool,
    },
    #[serde(rename = "event.completed")]
    EventCompleted {
        event_id: Uuid,
        template_id: Uuid,
        patient_id: Uuid,
        owner_type: OwnerType,
        occurrence_date: NaiveDate,
        critical: bool,
        value_flag: Option<AbnormalFlag>,
    },
}

impl EngineSignal {
    pub fn missed(event: &ScheduleEvent) -> Self {
        EngineSignal::EventMissed {
            event_id: event.id,
            template_id: event.template_id,
            patient_id: event.patient_id,
            owner_type: event.owner_type,
            occurrence_date: event.occurrence_date,
            critical: event.critical,
        }
    }

    pub fn completed(event: &ScheduleEvent) -> Self {
        EngineSignal::EventCompleted {
            event_id: event.id,
            template_id: event.template_id,
            patient_id: event.patient_id,
            owner_type: event.owner_type,
            occurrence_date: event.occurrence_date,
            critical: event.critical,
            value_flag: event.value_flag,
        }
    }

    /// Wire name of the signal.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineSignal::EventMissed { .. } => "event.missed",
            EngineSignal::EventCompleted { .. } => "event.completed",
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            EngineSignal::EventMissed { event_id, .. } | EngineSignal::EventCompleted { event_id, .. } => {
                *event_id
            }
        }
    }

    /// Whether the signal should page someone: a missed critical
    /// obligation, or a completed reading outside critical bounds.
    pub fn is_alert(&self) -> bool {
        match self {
            EngineSignal::EventMissed { critical, .. } => *critical,
            EngineSignal::EventCompleted { value_flag, .. } => {
                value_flag.is_some_and(|f| f.is_critical())
            }
        }
    }
}

/// Hand `signal` to `dispatcher`, logging instead of failing.
pub(crate) fn emit(dispatcher: &dyn SignalDispatcher, signal: EngineSignal) {
    let kind = signal.kind();
    let event_id = signal.event_id();
    if let Err(e) = dispatcher.dispatch(signal) {
        tracing::warn!(%event_id, kind, error = %e, "Signal dispatch failed");
    }
}

/// Drops every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl SignalDispatcher for NoopDispatcher {
    fn dispatch(&self, _signal: EngineSignal) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Forwards signals into a tokio channel for an async consumer.
///
/// Sending never blocks, so it is safe from the sweeper thread and from
/// synchronous request handlers alike.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: UnboundedSender<EngineSignal>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, UnboundedReceiver<EngineSignal>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SignalDispatcher for ChannelDispatcher {
    fn dispatch(&self, signal: EngineSignal) -> Result<(), DispatchError> {
        self.tx.send(signal).map_err(|_| DispatchError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missed(critical: bool) -> EngineSignal {
        EngineSignal::EventMissed {
            event_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            owner_type: OwnerType::Medication,
            occurrence_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            critical,
        }
    }

    #[test]
    fn signal_serializes_with_wire_name() {
        let json = serde_json::to_value(missed(false)).unwrap();
        assert_eq!(json["type"], "event.missed");
        assert_eq!(json["owner_type"], "medication");
    }

    #[test]
    fn alerting_follows_critical_flags() {
        assert!(missed(true).is_alert());
        assert!(!missed(false).is_alert());
    }

    #[tokio::test]
    async fn channel_dispatcher_delivers_to_async_consumer() {
        let (dispatcher, mut rx) = ChannelDispatcher::new();
        let signal = missed(true);
        dispatcher.dispatch(signal.clone()).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, signal);
    }

    #[test]
    fn closed_channel_reports_error_and_emit_swallows_it() {
        let (dispatcher, rx) = ChannelDispatcher::new();
        drop(rx);
        assert!(matches!(
            dispatcher.dispatch(missed(false)),
            Err(DispatchError::ChannelClosed)
        ));
        emit(&dispatcher, missed(false));
    }
}
