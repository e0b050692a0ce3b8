//! Attempt history for a webhook event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::AttemptId;

/// How a single delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptResult {
    /// 2xx from the receiver.
    Delivered,

    /// 429, 5xx, timeout or network error.
    Retry,

    /// Non-retryable 4xx from the receiver.
    Rejected,

    /// The request could not be built locally.
    Failed,
}

/// A single delivery attempt.
///
/// Records what the receiver said (status) and what went wrong (error), so an
/// operator can explain why an event ended up Exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,

    /// 1-based attempt number.
    pub number: u32,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// HTTP status, when the receiver answered at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    pub result: AttemptResult,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
