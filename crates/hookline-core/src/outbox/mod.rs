//! Outbox module: durable staging queue for outbound webhook events.
//!
//! The outbox owns every `WebhookEvent` until it reaches a terminal state.
//! Workers `lease` due events, attempt delivery, then report back with
//! `ack` / `nack` / `reject` / `fail` (or `release` when shutting down),
//! always presenting the `LeaseId` they were given. Terminal events are
//! kept for an idempotency window and then pruned.

mod file;
mod memory;
mod retry;

pub use file::FileOutbox;
pub use memory::InMemoryOutbox;
pub use retry::RetryPolicy;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EventId, LeaseGrant, LeaseId, NewEvent, WebhookEvent};
use crate::observability::OutboxCounts;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OutboxError {
    #[error("event not found: {0}")]
    NotFound(EventId),

    /// The caller's lease expired and was reaped, or the event was re-leased.
    #[error("lease lost for event {0}")]
    LeaseLost(EventId),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("outbox storage error: {0}")]
    Storage(String),
}

/// An event handed to a worker together with its lease.
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedEvent {
    /// Snapshot taken at lease time.
    pub event: WebhookEvent,
    pub grant: LeaseGrant,
}

impl LeasedEvent {
    pub fn id(&self) -> &EventId {
        &self.event.id
    }

    pub fn lease_id(&self) -> LeaseId {
        self.grant.lease_id
    }
}

/// What the worker observed during one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptReport {
    pub started_at: Option<DateTime<Utc>>,
    /// HTTP status, if a response came back.
    pub status: Option<u16>,
    pub error: Option<String>,
    /// Response body (kept for rejected deliveries).
    pub body: Option<String>,
}

impl AttemptReport {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Result of a `nack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Back to Pending; leasable again at `next_attempt_at`.
    Rescheduled {
        next_attempt_at: DateTime<Utc>,
        attempt_count: u32,
    },

    /// Retry budget spent.
    Exhausted { attempt_count: u32 },
}

/// Outbox port.
/// `InMemoryOutbox` and `FileOutbox` implement it; the delivery engine only
/// sees this trait.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Stage an event. Enqueuing an id that already exists is a no-op that
    /// returns the existing id.
    async fn enqueue(&self, event: NewEvent) -> Result<EventId, OutboxError>;

    /// Take up to `n` due Pending events, oldest `next_attempt_at` first, and
    /// move them to InFlight. Two callers never receive the same event.
    async fn lease(&self, n: usize) -> Result<Vec<LeasedEvent>, OutboxError>;

    /// InFlight -> Delivered.
    async fn ack(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError>;

    /// InFlight -> Pending with backoff, or -> Exhausted when the retry budget
    /// is spent.
    async fn nack(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<NackOutcome, OutboxError>;

    /// InFlight -> Exhausted; the receiver refused the event.
    async fn reject(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError>;

    /// InFlight -> Failed; no request could be built.
    async fn fail(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError>;

    /// InFlight -> Pending without consuming an attempt.
    async fn release(&self, id: &EventId, lease: LeaseId) -> Result<(), OutboxError>;

    /// Revert every InFlight event whose lease has expired. Returns how many.
    async fn reap_expired_leases(&self) -> Result<usize, OutboxError>;

    /// Drop Delivered, Failed and Exhausted events last touched before
    /// `older_than`. Returns how many. A pruned id can be enqueued again.
    async fn prune_terminal(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError>;

    async fn get(&self, id: &EventId) -> Result<Option<WebhookEvent>, OutboxError>;

    async fn counts(&self) -> Result<OutboxCounts, OutboxError>;

    /// Park until something may be leasable, or `max_wait` elapses.
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}
