//! DeliveryEventSink port - where terminal delivery failures surface.
//!
//! Delivery errors never escape the engine as faults. Events that end up
//! Exhausted or Failed are reported here instead, for alerting or manual
//! intervention.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::{EventId, EventType, ExhaustReason};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum DeliveryNotice {
    /// Gave up on the event (receiver rejected it or retries ran out).
    Exhausted {
        event_id: EventId,
        event_type: EventType,
        attempts: u32,
        reason: ExhaustReason,
        last_error: String,
    },

    /// The event could not be turned into a request.
    Failed {
        event_id: EventId,
        event_type: EventType,
        error: String,
    },
}

impl DeliveryNotice {
    pub fn event_id(&self) -> &EventId {
        match self {
            DeliveryNotice::Exhausted { event_id, .. } | DeliveryNotice::Failed { event_id, .. } => {
                event_id
            }
        }
    }
}

pub trait DeliveryEventSink: Send + Sync {
    fn emit(&self, notice: DeliveryNotice);
}

/// Logs notices at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DeliveryEventSink for TracingSink {
    fn emit(&self, notice: DeliveryNotice) {
        match &notice {
            DeliveryNotice::Exhausted {
                event_id,
                event_type,
                attempts,
                reason,
                last_error,
            } => tracing::error!(
                target: "hookline::delivery",
                event_id = %event_id,
                event_type = %event_type,
                attempts,
                reason = ?reason,
                last_error = %last_error,
                "webhook event exhausted, manual intervention required"
            ),
            DeliveryNotice::Failed {
                event_id,
                event_type,
                error,
            } => tracing::error!(
                target: "hookline::delivery",
                event_id = %event_id,
                event_type = %event_type,
                error = %error,
                "webhook event could not be built into a request"
            ),
        }
    }
}

/// Forwards notices into a channel (alert pipeline, tests).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DeliveryNotice>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeliveryNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DeliveryEventSink for ChannelSink {
    fn emit(&self, notice: DeliveryNotice) {
        if self.tx.send(notice).is_err() {
            tracing::debug!(target: "hookline::delivery", "notice receiver dropped");
        }
    }
}
