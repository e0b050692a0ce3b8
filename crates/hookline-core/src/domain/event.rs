//! Webhook event record: metadata + payload + delivery state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::attempt::AttemptRecord;
use super::ids::{EventId, LeaseId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery state of an event.
///
/// State transitions:
/// - Pending -> InFlight -> Delivered
/// - Pending -> InFlight -> Pending (retry, attempt_count + 1, loop until max_attempts)
/// - Pending -> InFlight -> Exhausted (max attempts reached, or receiver rejected it)
/// - Pending -> InFlight -> Failed (request could not be built from the event)
/// - Pending -> InFlight -> Pending (lease expired or released; no attempt consumed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Waiting for `next_attempt_at`.
    Pending,

    /// Leased by a worker.
    InFlight,

    /// Receiver answered 2xx.
    Delivered,

    /// Could not be turned into a request (bad payload). Not retried.
    Failed,

    /// Gave up: see `ExhaustReason`.
    Exhausted,
}

impl EventState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventState::Delivered | EventState::Failed | EventState::Exhausted
        )
    }
}

/// Why an event reached `Exhausted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExhaustReason {
    /// Receiver answered a non-retryable 4xx.
    Rejected { status: u16, body: Option<String> },

    /// Retry budget spent.
    MaxAttempts { attempts: u32 },
}

/// Active lease on an InFlight event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub lease_id: LeaseId,
    pub expires_at: DateTime<Utc>,
}

/// What a producer hands to the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub id: EventId,
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(id: EventId, event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id,
            event_type,
            payload,
        }
    }
}

/// The outbox's single source of truth for one event.
///
/// All state transitions happen through the methods below; the outbox decides
/// *when* to call them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: EventId,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: EventState,

    /// Completed delivery attempts (success or failure). Never decreases.
    pub attempt_count: u32,

    /// Earliest time the event may be leased again.
    pub next_attempt_at: DateTime<Utc>,

    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<LeaseGrant>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhaust_reason: Option<ExhaustReason>,

    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

impl WebhookEvent {
    pub fn new(event: NewEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type,
            payload: event.payload,
            created_at: now,
            updated_at: now,
            state: EventState::Pending,
            attempt_count: 0,
            next_attempt_at: now,
            last_error: None,
            lease: None,
            exhaust_reason: None,
            attempts: Vec::new(),
        }
    }

    /// Pending and due?
    pub fn is_leasable(&self, now: DateTime<Utc>) -> bool {
        self.state == EventState::Pending && self.next_attempt_at <= now
    }

    /// Does `lease_id` still own this event?
    pub fn holds_lease(&self, lease_id: LeaseId) -> bool {
        self.state == EventState::InFlight
            && self.lease.is_some_and(|grant| grant.lease_id == lease_id)
    }

    /// Pending -> InFlight.
    pub fn start_lease(&mut self, grant: LeaseGrant, now: DateTime<Utc>) {
        self.state = EventState::InFlight;
        self.lease = Some(grant);
        self.updated_at = now;
    }

    /// InFlight -> Delivered.
    pub fn mark_delivered(&mut self, attempt: AttemptRecord, now: DateTime<Utc>) {
        self.finish_attempt(attempt);
        self.state = EventState::Delivered;
        self.last_error = None;
        self.updated_at = now;
    }

    /// InFlight -> Pending with backoff.
    pub fn schedule_retry(
        &mut self,
        attempt: AttemptRecord,
        next_attempt_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) {
        self.finish_attempt(attempt);
        self.state = EventState::Pending;
        self.next_attempt_at = next_attempt_at;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// InFlight -> Exhausted.
    pub fn mark_exhausted(
        &mut self,
        attempt: AttemptRecord,
        reason: ExhaustReason,
        error: String,
        now: DateTime<Utc>,
    ) {
        self.finish_attempt(attempt);
        self.state = EventState::Exhausted;
        self.exhaust_reason = Some(reason);
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// InFlight -> Failed.
    pub fn mark_failed(&mut self, attempt: AttemptRecord, error: String, now: DateTime<Utc>) {
        self.finish_attempt(attempt);
        self.state = EventState::Failed;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// InFlight -> Pending without consuming an attempt (abandoned or lease expired).
    pub fn revert_to_pending(&mut self, note: String, now: DateTime<Utc>) {
        self.state = EventState::Pending;
        self.lease = None;
        self.next_attempt_at = now;
        self.last_error = Some(note);
        self.updated_at = now;
    }

    fn finish_attempt(&mut self, attempt: AttemptRecord) {
        self.attempt_count += 1;
        self.lease = None;
        self.attempts.push(attempt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attempt::AttemptResult;
    use crate::domain::ids::AttemptId;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn new_event() -> WebhookEvent {
        WebhookEvent::new(
            NewEvent::new(
                EventId::new("req-1"),
                EventType::new("play.confirmation"),
                serde_json::json!({"request_id": "req-1"}),
            ),
            at(0),
        )
    }

    fn grant(expires: i64) -> LeaseGrant {
        LeaseGrant {
            lease_id: LeaseId::from_ulid(Ulid::new()),
            expires_at: at(expires),
        }
    }

    fn attempt(number: u32, result: AttemptResult) -> AttemptRecord {
        AttemptRecord {
            attempt_id: AttemptId::from_ulid(Ulid::new()),
            number,
            started_at: at(0),
            finished_at: at(1),
            status: None,
            result,
            error: None,
        }
    }

    #[test]
    fn new_event_is_pending_and_due() {
        let ev = new_event();
        assert_eq!(ev.state, EventState::Pending);
        assert_eq!(ev.attempt_count, 0);
        assert!(ev.is_leasable(at(0)));
    }

    #[test]
    fn only_current_lease_holds_event() {
        let mut ev = new_event();
        let g = grant(60);
        ev.start_lease(g, at(0));

        assert!(ev.holds_lease(g.lease_id));
        assert!(!ev.holds_lease(LeaseId::from_ulid(Ulid::new())));
        assert!(!ev.is_leasable(at(0)));
    }

    #[test]
    fn retry_keeps_counting_attempts() {
        let mut ev = new_event();
        ev.start_lease(grant(60), at(0));
        ev.schedule_retry(attempt(1, AttemptResult::Retry), at(30), "500".into(), at(1));

        assert_eq!(ev.state, EventState::Pending);
        assert_eq!(ev.attempt_count, 1);
        assert!(ev.lease.is_none());
        assert!(!ev.is_leasable(at(29)));
        assert!(ev.is_leasable(at(30)));
    }

    #[test]
    fn revert_does_not_consume_an_attempt() {
        let mut ev = new_event();
        ev.start_lease(grant(60), at(0));
        ev.revert_to_pending("lease expired".into(), at(61));

        assert_eq!(ev.state, EventState::Pending);
        assert_eq!(ev.attempt_count, 0);
        assert!(ev.attempts.is_empty());
    }

    #[test]
    fn terminal_states() {
        assert!(EventState::Delivered.is_terminal());
        assert!(EventState::Exhausted.is_terminal());
        assert!(EventState::Failed.is_terminal());
        assert!(!EventState::Pending.is_terminal());
        assert!(!EventState::InFlight.is_terminal());
    }
}
