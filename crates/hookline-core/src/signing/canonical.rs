//! Canonical byte encoding of a request for signing.
//!
//! `method ‖ path ‖ timestamp ‖ body` with no separators. Callers own the
//! canonical form of the parts: the timestamp must come from `format_timestamp`
//! and the body from `domain::canonical_json`, or the receiver will compute a
//! different string.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::SignedRequest;

pub fn canonicalize(method: &str, path: &str, timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(method.len() + path.len() + timestamp.len() + body.len());
    out.extend_from_slice(method.as_bytes());
    out.extend_from_slice(path.as_bytes());
    out.extend_from_slice(timestamp.as_bytes());
    out.extend_from_slice(body);
    out
}

pub fn canonicalize_request(request: &SignedRequest) -> Vec<u8> {
    canonicalize(
        &request.method,
        &request.path,
        &request.timestamp,
        &request.body,
    )
}

/// `2025-03-01T09:00:00.000Z`: millisecond precision, `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
