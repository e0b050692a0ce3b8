//! ReaperLoop - returns expired leases to Pending.
//!
//! A worker that dies mid-attempt never acks or nacks. Its lease runs out and
//! the next sweep puts the event back in the queue, without consuming an
//! attempt.
//!
//! The same sweep prunes terminal events once they are older than the
//! retention window, which is also how long their ids stay deduplicated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::outbox::Outbox;
use crate::ports::Clock;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired leases returned to Pending.
    pub reaped: usize,
    /// Terminal events dropped.
    pub pruned: usize,
}

pub struct ReaperLoop {
    outbox: Arc<dyn Outbox>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    retention: chrono::Duration,
}

impl ReaperLoop {
    pub fn new(
        outbox: Arc<dyn Outbox>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        retention: Duration,
    ) -> Self {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        Self {
            outbox,
            clock,
            interval,
            retention,
        }
    }

    /// One sweep: reclaim expired leases, then prune settled events.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        match self.outbox.reap_expired_leases().await {
            Ok(reaped) => {
                if reaped > 0 {
                    tracing::info!(target: "hookline::reaper", reaped, "expired leases reclaimed");
                }
                report.reaped = reaped;
            }
            Err(e) => {
                tracing::error!(target: "hookline::reaper", error = %e, "lease sweep failed");
            }
        }

        let Some(older_than) = self.clock.now().checked_sub_signed(self.retention) else {
            return report;
        };
        match self.outbox.prune_terminal(older_than).await {
            Ok(pruned) => report.pruned = pruned,
            Err(e) => {
                tracing::error!(target: "hookline::reaper", error = %e, "terminal prune failed");
            }
        }
        report
    }

    /// Sweep every `interval` until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
        tracing::debug!(target: "hookline::reaper", "reaper stopped");
    }

    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        ReaperHandle { shutdown_tx, join }
    }
}

pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventId, EventState, EventType, NewEvent};
    use crate::outbox::{AttemptReport, InMemoryOutbox, RetryPolicy};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{TimeZone, Utc};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    async fn leased_outbox() -> (Arc<FixedClock>, Arc<InMemoryOutbox>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let outbox = Arc::new(InMemoryOutbox::new(
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            RetryPolicy::default(),
            Duration::from_secs(60),
        ));
        outbox
            .enqueue(NewEvent::new(
                EventId::new("e1"),
                EventType::new("play.confirmation"),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(outbox.lease(1).await.unwrap().len(), 1);
        (clock, outbox)
    }

    #[tokio::test]
    async fn sweep_reclaims_only_expired_leases() {
        let (clock, outbox) = leased_outbox().await;
        let reaper = ReaperLoop::new(outbox.clone(), clock.clone(), Duration::from_secs(1), DAY);

        assert_eq!(reaper.sweep_once().await.reaped, 0);
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(reaper.sweep_once().await.reaped, 1);

        let stored = outbox.get(&EventId::new("e1")).await.unwrap().unwrap();
        assert_eq!(stored.state, EventState::Pending);
    }

    #[tokio::test]
    async fn spawned_reaper_sweeps_until_shutdown() {
        let (clock, outbox) = leased_outbox().await;
        clock.advance(chrono::Duration::seconds(61));

        let handle =
            ReaperLoop::new(outbox.clone(), clock.clone(), Duration::from_millis(10), DAY).spawn();
        tokio::time::timeout(Duration::from_secs(2), async {
            while outbox.counts().await.unwrap().pending == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delivered_events_are_pruned_after_retention() {
        let (clock, outbox) = leased_outbox().await;
        let id = EventId::new("e1");
        let lease = outbox.get(&id).await.unwrap().unwrap().lease.unwrap().lease_id;
        outbox
            .ack(&id, lease, AttemptReport::default().with_status(200))
            .await
            .unwrap();
        let reaper = ReaperLoop::new(outbox.clone(), clock.clone(), Duration::from_secs(1), DAY);

        clock.advance(chrono::Duration::hours(23));
        assert_eq!(reaper.sweep_once().await, SweepReport::default());
        assert!(outbox.get(&id).await.unwrap().is_some());

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(
            reaper.sweep_once().await,
            SweepReport {
                reaped: 0,
                pruned: 1
            }
        );
        assert!(outbox.get(&id).await.unwrap().is_none());
        assert_eq!(outbox.counts().await.unwrap().total(), 0);
    }
}
