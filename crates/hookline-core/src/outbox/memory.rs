//! In-memory outbox implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{AttemptReport, LeasedEvent, NackOutcome, Outbox, OutboxError, RetryPolicy};
use crate::domain::{
    AttemptRecord, AttemptResult, EventId, EventState, ExhaustReason, LeaseGrant, LeaseId,
    NewEvent, WebhookEvent,
};
use crate::observability::OutboxCounts;
use crate::ports::{Clock, IdGenerator};

type Slot = Arc<Mutex<WebhookEvent>>;

fn lock(slot: &Slot) -> MutexGuard<'_, WebhookEvent> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory outbox.
///
/// The index lock is only held to find records. Each record sits behind its
/// own mutex, and that mutex is the unit of exclusion: `lease` claims records
/// with `try_lock` and re-checks them, so concurrent leases skip each other
/// instead of serialising on the whole outbox.
pub struct InMemoryOutbox {
    index: RwLock<HashMap<EventId, Slot>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_policy: RetryPolicy,
    lease_timeout: chrono::Duration,
    notify: Notify,
}

impl InMemoryOutbox {
    pub fn new(
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry_policy: RetryPolicy,
        lease_timeout: Duration,
    ) -> Self {
        let lease_timeout =
            chrono::Duration::from_std(lease_timeout).unwrap_or_else(|_| chrono::Duration::seconds(60));
        Self {
            index: RwLock::new(HashMap::new()),
            clock,
            ids,
            retry_policy,
            lease_timeout,
            notify: Notify::new(),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Copy of every record, ordered by creation time.
    pub fn snapshot(&self) -> Vec<WebhookEvent> {
        let mut events: Vec<WebhookEvent> = self.slots().iter().map(|s| lock(s).clone()).collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        events
    }

    /// Load records (e.g. from a snapshot), replacing any with the same id.
    pub fn restore(&self, events: impl IntoIterator<Item = WebhookEvent>) {
        {
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            for event in events {
                index.insert(event.id.clone(), Arc::new(Mutex::new(event)));
            }
        }
        self.notify.notify_waiters();
    }

    fn slots(&self) -> Vec<Slot> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn slot(&self, id: &EventId) -> Result<Slot, OutboxError> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| OutboxError::NotFound(id.clone()))
    }

    /// Lock the record and check that `lease` still owns it, then hand the
    /// record to `f`.
    fn with_lease<T>(
        &self,
        id: &EventId,
        lease: LeaseId,
        f: impl FnOnce(&mut WebhookEvent, DateTime<Utc>) -> T,
    ) -> Result<T, OutboxError> {
        let slot = self.slot(id)?;
        let mut event = lock(&slot);
        if !event.holds_lease(lease) {
            tracing::warn!(
                target: "hookline::outbox",
                event_id = %id,
                lease_id = %lease,
                state = ?event.state,
                "stale lease refused"
            );
            return Err(OutboxError::LeaseLost(id.clone()));
        }
        Ok(f(&mut event, self.clock.now()))
    }

    fn attempt_record(
        &self,
        event: &WebhookEvent,
        report: &AttemptReport,
        result: AttemptResult,
        now: DateTime<Utc>,
    ) -> AttemptRecord {
        AttemptRecord {
            attempt_id: self.ids.generate_attempt_id(),
            number: event.attempt_count + 1,
            started_at: report.started_at.unwrap_or(now),
            finished_at: now,
            status: report.status,
            result,
            error: report.error.clone(),
        }
    }

    /// Earliest `next_attempt_at` among Pending events.
    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.slots()
            .iter()
            .filter_map(|slot| {
                let event = slot.try_lock().ok()?;
                (event.state == EventState::Pending).then_some(event.next_attempt_at)
            })
            .min()
    }
}

fn describe(report: &AttemptReport) -> String {
    match (&report.error, report.status) {
        (Some(error), _) => error.clone(),
        (None, Some(status)) => format!("HTTP {status}"),
        (None, None) => "delivery failed".to_string(),
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn enqueue(&self, event: NewEvent) -> Result<EventId, OutboxError> {
        if event.id.is_empty() {
            return Err(OutboxError::InvalidEvent("event id is empty".to_string()));
        }
        let id = event.id.clone();
        {
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            if index.contains_key(&id) {
                tracing::debug!(target: "hookline::outbox", event_id = %id, "duplicate enqueue ignored");
                return Ok(id);
            }
            let record = WebhookEvent::new(event, self.clock.now());
            index.insert(id.clone(), Arc::new(Mutex::new(record)));
        }
        tracing::debug!(target: "hookline::outbox", event_id = %id, "event enqueued");

        // Notify waiting workers
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn lease(&self, n: usize) -> Result<Vec<LeasedEvent>, OutboxError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();

        let mut candidates: Vec<(DateTime<Utc>, DateTime<Utc>, Slot)> = self
            .slots()
            .into_iter()
            .filter_map(|slot| {
                let (due, created) = {
                    let event = slot.try_lock().ok()?;
                    if !event.is_leasable(now) {
                        return None;
                    }
                    (event.next_attempt_at, event.created_at)
                };
                Some((due, created, slot))
            })
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut leased = Vec::new();
        for (_, _, slot) in candidates {
            if leased.len() >= n {
                break;
            }
            // Another caller holds it right now: it is theirs.
            let Ok(mut event) = slot.try_lock() else {
                continue;
            };
            if !event.is_leasable(now) {
                continue;
            }
            let grant = LeaseGrant {
                lease_id: self.ids.generate_lease_id(),
                expires_at: now + self.lease_timeout,
            };
            event.start_lease(grant, now);
            leased.push(LeasedEvent {
                event: event.clone(),
                grant,
            });
        }

        if !leased.is_empty() {
            tracing::debug!(target: "hookline::outbox", count = leased.len(), "events leased");
        }
        Ok(leased)
    }

    async fn ack(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError> {
        self.with_lease(id, lease, |event, now| {
            let attempt = self.attempt_record(event, &report, AttemptResult::Delivered, now);
            event.mark_delivered(attempt, now);
        })
    }

    async fn nack(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<NackOutcome, OutboxError> {
        let outcome = self.with_lease(id, lease, |event, now| {
            let error = describe(&report);
            let attempts = event.attempt_count + 1;
            if self.retry_policy.is_exhausted(attempts) {
                let attempt = self.attempt_record(event, &report, AttemptResult::Retry, now);
                event.mark_exhausted(
                    attempt,
                    ExhaustReason::MaxAttempts { attempts },
                    error,
                    now,
                );
                return NackOutcome::Exhausted {
                    attempt_count: event.attempt_count,
                };
            }

            let delay = chrono::Duration::from_std(self.retry_policy.backoff(attempts))
                .unwrap_or_else(|_| chrono::Duration::seconds(1));
            let next_attempt_at = now + delay;
            let attempt = self.attempt_record(event, &report, AttemptResult::Retry, now);
            event.schedule_retry(attempt, next_attempt_at, error, now);
            NackOutcome::Rescheduled {
                next_attempt_at,
                attempt_count: event.attempt_count,
            }
        })?;

        if let NackOutcome::Rescheduled { .. } = outcome {
            self.notify.notify_waiters();
        }
        Ok(outcome)
    }

    async fn reject(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError> {
        self.with_lease(id, lease, |event, now| {
            let status = report.status.unwrap_or_default();
            let error = describe(&report);
            let attempt = self.attempt_record(event, &report, AttemptResult::Rejected, now);
            event.mark_exhausted(
                attempt,
                ExhaustReason::Rejected {
                    status,
                    body: report.body.clone(),
                },
                error,
                now,
            );
        })
    }

    async fn fail(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError> {
        self.with_lease(id, lease, |event, now| {
            let error = describe(&report);
            let attempt = self.attempt_record(event, &report, AttemptResult::Failed, now);
            event.mark_failed(attempt, error, now);
        })
    }

    async fn release(&self, id: &EventId, lease: LeaseId) -> Result<(), OutboxError> {
        self.with_lease(id, lease, |event, now| {
            event.revert_to_pending("lease released before the attempt finished".to_string(), now);
        })?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reap_expired_leases(&self) -> Result<usize, OutboxError> {
        let now = self.clock.now();
        let mut reaped = 0;
        for slot in self.slots() {
            // Busy records are being acked or leased right now.
            let Ok(mut event) = slot.try_lock() else {
                continue;
            };
            if event.state == EventState::InFlight
                && event.lease.is_none_or(|grant| grant.expires_at <= now)
            {
                tracing::warn!(
                    target: "hookline::outbox",
                    event_id = %event.id,
                    attempt_count = event.attempt_count,
                    "lease expired, event returned to pending"
                );
                event.revert_to_pending("lease expired".to_string(), now);
                reaped += 1;
            }
        }
        if reaped > 0 {
            self.notify.notify_waiters();
        }
        Ok(reaped)
    }

    async fn prune_terminal(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let before = index.len();
        index.retain(|_, slot| {
            // A busy record is not terminal yet, or is about to be read.
            let Ok(event) = slot.try_lock() else {
                return true;
            };
            !(event.state.is_terminal() && event.updated_at < older_than)
        });
        let pruned = before - index.len();
        if pruned > 0 {
            tracing::info!(
                target: "hookline::outbox",
                pruned,
                remaining = index.len(),
                older_than = %older_than,
                "terminal events pruned"
            );
        }
        Ok(pruned)
    }

    async fn get(&self, id: &EventId) -> Result<Option<WebhookEvent>, OutboxError> {
        match self.slot(id) {
            Ok(slot) => Ok(Some(lock(&slot).clone())),
            Err(OutboxError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn counts(&self) -> Result<OutboxCounts, OutboxError> {
        let mut counts = OutboxCounts::default();
        for slot in self.slots() {
            counts.record(lock(&slot).state);
        }
        Ok(counts)
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let wait = match self.next_due() {
            Some(due) => {
                let until_due = (due - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
                until_due.min(max_wait)
            }
            None => max_wait,
        };
        if wait.is_zero() {
            return;
        }

        tokio::select! {
            _ = &mut notified => {},
            _ = tokio::time::sleep(wait) => {},
        }
    }
}
