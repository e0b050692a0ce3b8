use thiserror::Error;

use crate::app::IntakeError;
use crate::config::ConfigError;
use crate::domain::PayloadError;
use crate::outbox::OutboxError;
use crate::ports::TransportError;
use crate::signing::SigningError;

/// Why a single delivery attempt did not succeed.
///
/// These never leave the delivery engine as faults; they decide whether the
/// event is retried, rejected or failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network failure or timeout. Retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 429 or 5xx. Retried.
    #[error("receiver answered {status}")]
    RetryableStatus { status: u16 },

    /// Any other non-2xx. Not retried.
    #[error("receiver rejected the event with {status}")]
    Permanent { status: u16, body: String },

    /// The event could not be turned into a request.
    #[error("cannot build request: {0}")]
    Build(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Transport(_) | DeliveryError::RetryableStatus { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum HooklineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("{0}")]
    Other(String),
}
