//! EventIntake - channel hand-off from producers into the outbox.
//!
//! Producers hold a cheap `IntakeHandle` and never touch the outbox or the
//! delivery path. Each submission waits for the outbox to accept the event,
//! so a returned id means the event is staged.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::domain::{EventId, NewEvent};
use crate::outbox::{Outbox, OutboxError};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum IntakeError {
    #[error("event intake is closed")]
    Closed,

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

struct Submission {
    event: NewEvent,
    reply: oneshot::Sender<Result<EventId, OutboxError>>,
}

#[derive(Debug, Clone)]
pub struct IntakeHandle {
    tx: mpsc::Sender<Submission>,
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("event_id", &self.event.id)
            .finish_non_exhaustive()
    }
}

impl IntakeHandle {
    /// Stage `event`. Waits for channel capacity, then for the outbox.
    pub async fn submit(&self, event: NewEvent) -> Result<EventId, IntakeError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Submission { event, reply })
            .await
            .map_err(|_| IntakeError::Closed)?;
        let id = response.await.map_err(|_| IntakeError::Closed)??;
        Ok(id)
    }
}

pub struct EventIntake;

impl EventIntake {
    /// Start the intake task. It ends once every handle is dropped and the
    /// queue is drained.
    pub fn spawn(outbox: Arc<dyn Outbox>, capacity: usize) -> (IntakeHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Submission>(capacity.max(1));
        let join = tokio::spawn(async move {
            while let Some(Submission { event, reply }) = rx.recv().await {
                let event_id = event.id.clone();
                let result = outbox.enqueue(event).await;
                if let Err(e) = &result {
                    tracing::warn!(target: "hookline::intake", event_id = %event_id, error = %e, "event refused");
                }
                // submitter may have given up waiting
                let _ = reply.send(result);
            }
            tracing::debug!(target: "hookline::intake", "intake closed");
        });
        (IntakeHandle { tx }, join)
    }
}
