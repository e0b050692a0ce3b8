use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::delivery::DeliveryEngine;
use crate::config::HooklineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Events leased per round trip.
    pub batch_size: usize,
    /// Longest idle wait before leasing again.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl From<&HooklineConfig> for WorkerConfig {
    fn from(config: &HooklineConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
        }
    }
}

/// How a `shutdown` went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Grace period ran out and in-flight attempts were aborted.
    pub aborted: bool,
}

/// Worker group handle.
/// - `request_shutdown()` stops new leases
/// - `shutdown(grace)` also waits for in-flight attempts, then aborts them
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    abort_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, engine: Arc<DeliveryEngine>, config: WorkerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (abort_tx, abort_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let engine = Arc::clone(&engine);
            let shutdown = shutdown_rx.clone();
            let abort = abort_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, engine, config, shutdown, abort).await;
            });
            joins.push(join);
        }
        tracing::info!(target: "hookline::worker", workers = n, "worker group started");

        Self {
            shutdown_tx,
            abort_tx,
            joins,
        }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new leases. In-flight attempts keep running.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop leasing, wait up to `grace` for in-flight attempts, then abort
    /// whatever is left. Aborted attempts release their lease (-> Pending).
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        self.request_shutdown();

        let joins = &mut self.joins;
        let drained = tokio::time::timeout(grace, async {
            while let Some(join) = joins.last_mut() {
                let _ = join.await;
                joins.pop();
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                target: "hookline::worker",
                remaining = self.joins.len(),
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "grace period over, aborting in-flight attempts"
            );
            let _ = self.abort_tx.send(true);
            for join in self.joins.drain(..) {
                let _ = join.await;
            }
        }
        tracing::info!(target: "hookline::worker", aborted = !drained, "worker group stopped");
        ShutdownReport { aborted: !drained }
    }
}

async fn worker_loop(
    worker_id: usize,
    engine: Arc<DeliveryEngine>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
    abort: watch::Receiver<bool>,
) {
    tracing::debug!(target: "hookline::worker", worker_id, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let leased = match engine.outbox().lease(config.batch_size).await {
            Ok(leased) => leased,
            Err(e) => {
                tracing::error!(target: "hookline::worker", worker_id, error = %e, "lease failed");
                Vec::new()
            }
        };

        if leased.is_empty() {
            // idle: wait for work, a retry falling due, or shutdown
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = engine.outbox().wait_for_work(config.poll_interval) => {}
            }
            continue;
        }

        let mut abort_rx = abort.clone();
        let cancel = async move {
            if abort_rx.wait_for(|aborted| *aborted).await.is_err() {
                // group handle dropped without an abort: never cancel
                std::future::pending::<()>().await;
            }
        };
        let outcomes = engine.deliver_batch(leased, cancel).await;
        tracing::debug!(
            target: "hookline::worker",
            worker_id,
            events = outcomes.len(),
            "batch finished"
        );
    }
    tracing::debug!(target: "hookline::worker", worker_id, "worker stopped");
}
