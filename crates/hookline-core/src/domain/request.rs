//! Per-attempt signed request.

/// The four parts covered by a signature.
///
/// Built fresh for every attempt and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: String,
    pub path: String,
    /// ISO-8601 UTC text exactly as sent in `X-Timestamp`.
    pub timestamp: String,
    pub body: Vec<u8>,
}

impl SignedRequest {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        timestamp: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            timestamp: timestamp.into(),
            body,
        }
    }

    pub fn post(path: impl Into<String>, timestamp: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new("POST", path, timestamp, body)
    }
}
