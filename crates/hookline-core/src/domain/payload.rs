//! Play confirmation payload and canonical JSON encoding.
//!
//! The body that goes on the wire is produced here, separately from the signing
//! canonicalizer: `canonical_json` gives compact JSON with object keys sorted at
//! every level, so the bytes that were signed are reproducible from the value.

use serde::{Deserialize, Serialize};

use crate::domain::event::{EventType, NewEvent};
use crate::domain::ids::EventId;

/// Event type used for play confirmations.
pub const PLAY_CONFIRMATION: &str = "play.confirmation";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed json: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Confirmed,
    Rejected,
    Error,
}

/// Confirmation a banca sends back for a registered play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayConfirmation {
    #[serde(alias = "requestId")]
    pub request_id: String,

    #[serde(alias = "playIdBanca")]
    pub play_id_banca: String,

    pub status: ConfirmationStatus,

    #[serde(default, alias = "ticketCode")]
    pub ticket_code: Option<String>,

    #[serde(default, alias = "reason")]
    pub message: Option<String>,

    /// ISO-8601 UTC, as produced by `signing::format_timestamp`.
    pub timestamp: String,
}

impl PlayConfirmation {
    /// Parse and validate a raw body.
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        let confirmation: Self =
            serde_json::from_slice(body).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        confirmation.validate()?;
        Ok(confirmation)
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.request_id.trim().is_empty() {
            return Err(PayloadError::MissingField("request_id"));
        }
        if self.play_id_banca.trim().is_empty() {
            return Err(PayloadError::MissingField("play_id_banca"));
        }
        if self.status == ConfirmationStatus::Confirmed
            && self.ticket_code.as_deref().is_none_or(|t| t.trim().is_empty())
        {
            return Err(PayloadError::InvalidField {
                field: "ticket_code",
                reason: "required when status is confirmed".to_string(),
            });
        }
        chrono::DateTime::parse_from_rfc3339(&self.timestamp).map_err(|e| {
            PayloadError::InvalidField {
                field: "timestamp",
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }

    /// Wrap into an outbox event keyed by the play's request id.
    pub fn into_event(self) -> Result<NewEvent, PayloadError> {
        self.validate()?;
        let payload =
            serde_json::to_value(&self).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        Ok(NewEvent::new(
            EventId::new(self.request_id),
            EventType::new(PLAY_CONFIRMATION),
            payload,
        ))
    }
}

/// Compact JSON with recursively sorted object keys.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&sorted(value))
}

// Rebuild maps in key order; holds whether or not serde_json keeps insertion order.
fn sorted(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sorted).collect())
        }
        other => other,
    }
}
