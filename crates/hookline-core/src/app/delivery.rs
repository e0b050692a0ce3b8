//! DeliveryEngine - one signed HTTP attempt per leased event.
//!
//! # Flow
//! 1. Build the body (canonical JSON) and a fresh `X-Timestamp`
//! 2. Sign method ‖ path ‖ timestamp ‖ body
//! 3. POST through the `Transport`, bounded by the attempt timeout
//! 4. Classify the outcome and report it to the outbox
//!    (ack / nack / reject / fail)
//!
//! Delivery failures stay in here. Only Exhausted and Failed events surface,
//! through the `DeliveryEventSink`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::config::{Destination, HooklineConfig};
use crate::domain::{EventId, ExhaustReason, LeaseId, SignedRequest, WebhookEvent, canonical_json};
use crate::error::DeliveryError;
use crate::outbox::{AttemptReport, LeasedEvent, NackOutcome, Outbox, OutboxError};
use crate::ports::{
    Clock, DeliveryEventSink, DeliveryNotice, OutboundRequest, Transport, TransportError,
};
use crate::signing::{SIGNATURE_HEADER, Signer, SigningError, TIMESTAMP_HEADER, format_timestamp};

/// Idempotency key for the receiver.
pub const EVENT_ID_HEADER: &str = "X-Event-Id";
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";

/// How a receiver status is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Delivered,
    Retry,
    Permanent,
}

/// 2xx delivered; 429 and 5xx retried; everything else permanent.
pub fn classify(status: u16) -> Classification {
    match status {
        200..=299 => Classification::Delivered,
        429 | 500..=599 => Classification::Retry,
        _ => Classification::Permanent,
    }
}

/// What happened to one leased event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        status: u16,
    },
    Rescheduled {
        status: Option<u16>,
        attempt_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retry budget spent.
    Exhausted {
        attempt_count: u32,
    },
    /// Receiver refused the event; not retried.
    Rejected {
        status: u16,
    },
    /// No request could be built.
    Failed,
    /// Attempt abandoned before it finished; the lease went back.
    Released,
    /// The outbox refused the result (lease lost, storage error).
    Unrecorded(OutboxError),
}

pub struct DeliveryEngine {
    outbox: Arc<dyn Outbox>,
    transport: Arc<dyn Transport>,
    signer: Arc<Signer>,
    destination: Destination,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn DeliveryEventSink>,
    attempt_timeout: Duration,
}

impl DeliveryEngine {
    pub fn new(
        config: &HooklineConfig,
        outbox: Arc<dyn Outbox>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn DeliveryEventSink>,
    ) -> Result<Self, SigningError> {
        let signer = Arc::new(Signer::new(&config.secret)?);
        Ok(Self {
            outbox,
            transport,
            signer,
            destination: config.destination.clone(),
            clock,
            sink,
            attempt_timeout: config.attempt_timeout,
        })
    }

    pub fn outbox(&self) -> &Arc<dyn Outbox> {
        &self.outbox
    }

    /// Request for one attempt. The timestamp is taken now, not at enqueue
    /// time, so retries stay inside the receiver's tolerance window.
    pub fn build_request(
        &self,
        event: &WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboundRequest, DeliveryError> {
        if !event.payload.is_object() {
            return Err(DeliveryError::Build(
                "payload is not a JSON object".to_string(),
            ));
        }
        let body = canonical_json(&event.payload)
            .map_err(|e| DeliveryError::Build(format!("cannot encode payload: {e}")))?;
        let timestamp = format_timestamp(now);
        let signature = self.signer.sign_request(&SignedRequest::post(
            self.destination.path(),
            timestamp.as_str(),
            body.clone(),
        ));

        Ok(OutboundRequest {
            url: self.destination.url().to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (SIGNATURE_HEADER.to_string(), signature.into_string()),
                (TIMESTAMP_HEADER.to_string(), timestamp),
                (EVENT_ID_HEADER.to_string(), event.id.to_string()),
                (EVENT_TYPE_HEADER.to_string(), event.event_type.to_string()),
            ],
            body,
        })
    }

    /// Attempt delivery of one leased event and record the result.
    pub async fn deliver(&self, leased: LeasedEvent) -> DeliveryOutcome {
        let started_at = self.clock.now();
        let id = leased.id().clone();
        let lease = leased.lease_id();

        let request = match self.build_request(&leased.event, started_at) {
            Ok(request) => request,
            Err(err) => {
                let report = AttemptReport::started(started_at);
                return self.settle(&leased.event, lease, report, err).await;
            }
        };

        let sent = tokio::time::timeout(self.attempt_timeout, self.transport.send(request))
            .await
            .unwrap_or(Err(TransportError::Timeout(self.attempt_timeout)));
        let report = AttemptReport::started(started_at);

        let response = match sent {
            Ok(response) => response,
            Err(err) => return self.settle(&leased.event, lease, report, err.into()).await,
        };

        let status = response.status;
        let report = report.with_status(status);
        let err = match classify(status) {
            Classification::Delivered => {
                return match self.outbox.ack(&id, lease, report).await {
                    Ok(()) => {
                        tracing::info!(
                            target: "hookline::delivery",
                            event_id = %id,
                            status,
                            attempt = leased.event.attempt_count + 1,
                            "webhook delivered"
                        );
                        DeliveryOutcome::Delivered { status }
                    }
                    Err(e) => self.unrecorded(&id, e),
                };
            }
            Classification::Retry => DeliveryError::RetryableStatus { status },
            Classification::Permanent => DeliveryError::Permanent {
                status,
                body: response.body,
            },
        };
        self.settle(&leased.event, lease, report, err).await
    }

    /// Lease up to `batch` events and deliver them concurrently.
    pub async fn run_once(
        self: &Arc<Self>,
        batch: usize,
    ) -> Result<Vec<(EventId, DeliveryOutcome)>, OutboxError> {
        let leased = self.outbox.lease(batch).await?;
        Ok(self.deliver_batch(leased, std::future::pending()).await)
    }

    /// Deliver `leased` concurrently. If `cancel` resolves first, unfinished
    /// attempts are aborted and their leases released.
    pub(crate) async fn deliver_batch<F>(
        self: &Arc<Self>,
        leased: Vec<LeasedEvent>,
        cancel: F,
    ) -> Vec<(EventId, DeliveryOutcome)>
    where
        F: Future<Output = ()>,
    {
        let mut unfinished: HashMap<EventId, LeaseId> = HashMap::with_capacity(leased.len());
        let mut set = JoinSet::new();
        for event in leased {
            unfinished.insert(event.id().clone(), event.lease_id());
            let engine = Arc::clone(self);
            set.spawn(async move {
                let id = event.id().clone();
                (id, engine.deliver(event).await)
            });
        }

        let mut outcomes = Vec::with_capacity(unfinished.len());
        tokio::pin!(cancel);
        loop {
            tokio::select! {
                next = set.join_next() => match next {
                    None => break,
                    Some(Ok((id, outcome))) => {
                        unfinished.remove(&id);
                        outcomes.push((id, outcome));
                    }
                    Some(Err(e)) => {
                        tracing::error!(target: "hookline::delivery", error = %e, "delivery task failed");
                    }
                },
                () = &mut cancel => {
                    set.shutdown().await;
                    break;
                }
            }
        }

        for (id, lease) in unfinished {
            match self.outbox.release(&id, lease).await {
                Ok(()) => {
                    tracing::info!(target: "hookline::delivery", event_id = %id, "attempt abandoned, lease released");
                    outcomes.push((id, DeliveryOutcome::Released));
                }
                Err(e) => {
                    tracing::debug!(target: "hookline::delivery", event_id = %id, error = %e, "release skipped");
                    outcomes.push((id, DeliveryOutcome::Unrecorded(e)));
                }
            }
        }
        outcomes
    }

    async fn retry(
        &self,
        event: &WebhookEvent,
        lease: LeaseId,
        report: AttemptReport,
    ) -> DeliveryOutcome {
        let status = report.status;
        let error = report.error.clone().unwrap_or_default();
        match self.outbox.nack(&event.id, lease, report).await {
            Ok(NackOutcome::Rescheduled {
                next_attempt_at,
                attempt_count,
            }) => {
                tracing::warn!(
                    target: "hookline::delivery",
                    event_id = %event.id,
                    attempt_count,
                    next_attempt_at = %next_attempt_at,
                    error = %error,
                    "delivery failed, retry scheduled"
                );
                DeliveryOutcome::Rescheduled {
                    status,
                    attempt_count,
                    next_attempt_at,
                }
            }
            Ok(NackOutcome::Exhausted { attempt_count }) => {
                self.sink.emit(DeliveryNotice::Exhausted {
                    event_id: event.id.clone(),
                    event_type: event.event_type.clone(),
                    attempts: attempt_count,
                    reason: ExhaustReason::MaxAttempts {
                        attempts: attempt_count,
                    },
                    last_error: error,
                });
                DeliveryOutcome::Exhausted { attempt_count }
            }
            Err(e) => self.unrecorded(&event.id, e),
        }
    }

    /// Record a failed attempt: retry, reject or fail depending on `err`.
    async fn settle(
        &self,
        event: &WebhookEvent,
        lease: LeaseId,
        report: AttemptReport,
        err: DeliveryError,
    ) -> DeliveryOutcome {
        if err.is_retryable() {
            return self.retry(event, lease, report.with_error(err.to_string())).await;
        }
        match err {
            DeliveryError::Permanent { status, body } => {
                self.reject(event, lease, report, status, body).await
            }
            other => self.record_failure(event, lease, report, other).await,
        }
    }

    async fn reject(
        &self,
        event: &WebhookEvent,
        lease: LeaseId,
        report: AttemptReport,
        status: u16,
        body: String,
    ) -> DeliveryOutcome {
        let message = DeliveryError::Permanent {
            status,
            body: body.clone(),
        }
        .to_string();
        let report = report.with_error(message.clone()).with_body(body.clone());
        match self.outbox.reject(&event.id, lease, report).await {
            Ok(()) => {
                self.sink.emit(DeliveryNotice::Exhausted {
                    event_id: event.id.clone(),
                    event_type: event.event_type.clone(),
                    attempts: event.attempt_count + 1,
                    reason: ExhaustReason::Rejected {
                        status,
                        body: Some(body),
                    },
                    last_error: message,
                });
                DeliveryOutcome::Rejected { status }
            }
            Err(e) => self.unrecorded(&event.id, e),
        }
    }

    async fn record_failure(
        &self,
        event: &WebhookEvent,
        lease: LeaseId,
        report: AttemptReport,
        err: DeliveryError,
    ) -> DeliveryOutcome {
        let error = err.to_string();
        let report = report.with_error(error.clone());
        match self.outbox.fail(&event.id, lease, report).await {
            Ok(()) => {
                self.sink.emit(DeliveryNotice::Failed {
                    event_id: event.id.clone(),
                    event_type: event.event_type.clone(),
                    error,
                });
                DeliveryOutcome::Failed
            }
            Err(e) => self.unrecorded(&event.id, e),
        }
    }

    fn unrecorded(&self, id: &EventId, err: OutboxError) -> DeliveryOutcome {
        match &err {
            OutboxError::LeaseLost(_) => tracing::warn!(
                target: "hookline::delivery",
                event_id = %id,
                "lease lost before the result was recorded"
            ),
            _ => tracing::error!(
                target: "hookline::delivery",
                event_id = %id,
                error = %err,
                "failed to record delivery result"
            ),
        }
        DeliveryOutcome::Unrecorded(err)
    }
}
