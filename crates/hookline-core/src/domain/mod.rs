//! Domain model (ids, events, attempts, payloads, requests).

pub mod attempt;
pub mod event;
pub mod ids;
pub mod payload;
pub mod request;

pub use attempt::{AttemptRecord, AttemptResult};
pub use event::{EventState, EventType, ExhaustReason, LeaseGrant, NewEvent, WebhookEvent};
pub use ids::{AttemptId, EventId, LeaseId};
pub use payload::{ConfirmationStatus, PayloadError, PlayConfirmation, canonical_json};
pub use request::SignedRequest;
