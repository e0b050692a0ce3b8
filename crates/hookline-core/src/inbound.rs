//! Inbound verification contract for the hosting request handler.
//!
//! The handler (routing, business logic) is not ours. It hands over what it
//! received and gets back a `Verdict`; nothing here panics or returns a fault
//! for a bad request. Authentication failures map to 401, payload validation
//! failures to 400.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{PlayConfirmation, SignedRequest};
use crate::ports::Clock;
use crate::replay::{ReplayGuard, TimestampError, validate_timestamp};
use crate::signing::Signer;

/// Raw pieces of an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub body: &'a [u8],
    /// `X-Signature` header, if present.
    pub signature: Option<&'a str>,
    /// `X-Timestamp` header, if present.
    pub timestamp: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("missing X-Signature header")]
    MissingSignature,

    #[error("missing X-Timestamp header")]
    MissingTimestamp,

    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("timestamp out of range: {0}")]
    StaleTimestamp(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("request already processed")]
    Replayed,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl RejectReason {
    /// Authentication failures (everything but payload validation).
    pub fn is_authentication_failure(&self) -> bool {
        !matches!(self, RejectReason::InvalidPayload(_))
    }

    /// HTTP status the handler should answer with.
    pub fn status_code(&self) -> u16 {
        if self.is_authentication_failure() {
            401
        } else {
            400
        }
    }
}

impl From<TimestampError> for RejectReason {
    fn from(err: TimestampError) -> Self {
        match err {
            TimestampError::Missing => RejectReason::MissingTimestamp,
            TimestampError::Malformed(msg) => RejectReason::MalformedTimestamp(msg),
            err @ TimestampError::OutOfWindow { .. } => {
                RejectReason::StaleTimestamp(err.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn into_result(self) -> Result<(), RejectReason> {
        match self {
            Verdict::Accepted => Ok(()),
            Verdict::Rejected(reason) => Err(reason),
        }
    }
}

/// Authenticates inbound webhook calls. Cheap to share behind `Arc`.
pub struct InboundVerifier {
    signer: Arc<Signer>,
    replay: ReplayGuard,
    clock: Arc<dyn Clock>,
    tolerance: Duration,
}

impl InboundVerifier {
    pub fn new(signer: Arc<Signer>, clock: Arc<dyn Clock>, tolerance: Duration) -> Self {
        Self {
            signer,
            replay: ReplayGuard::new(tolerance),
            clock,
            tolerance,
        }
    }

    /// Headers → timestamp window → signature → replay.
    ///
    /// Only a request with a valid signature is recorded in the replay set, so
    /// forged traffic cannot evict or poison it.
    pub fn verify(&self, request: &InboundRequest<'_>) -> Verdict {
        match self.check(request) {
            Ok(()) => Verdict::Accepted,
            Err(reason) => {
                tracing::warn!(
                    target: "hookline::inbound",
                    method = request.method,
                    path = request.path,
                    reason = %reason,
                    "inbound webhook rejected"
                );
                Verdict::Rejected(reason)
            }
        }
    }

    /// Authenticate, then parse and validate the body as a play confirmation.
    pub fn verify_confirmation(
        &self,
        request: &InboundRequest<'_>,
    ) -> Result<PlayConfirmation, RejectReason> {
        self.verify(request).into_result()?;
        PlayConfirmation::from_slice(request.body).map_err(|e| {
            tracing::warn!(
                target: "hookline::inbound",
                path = request.path,
                error = %e,
                "authenticated webhook carried an invalid payload"
            );
            RejectReason::InvalidPayload(e.to_string())
        })
    }

    fn check(&self, request: &InboundRequest<'_>) -> Result<(), RejectReason> {
        let signature = request
            .signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(RejectReason::MissingSignature)?;
        let timestamp = request
            .timestamp
            .filter(|t| !t.trim().is_empty())
            .ok_or(RejectReason::MissingTimestamp)?;

        let now = self.clock.now();
        validate_timestamp(timestamp, now, self.tolerance)?;

        let signed = SignedRequest::new(
            request.method,
            request.path,
            timestamp,
            request.body.to_vec(),
        );
        if !self.signer.verify_request(&signed, signature) {
            return Err(RejectReason::InvalidSignature);
        }

        if self.replay.is_replay(signature.trim(), now) {
            return Err(RejectReason::Replayed);
        }
        Ok(())
    }
}
