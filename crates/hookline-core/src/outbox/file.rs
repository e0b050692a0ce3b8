//! File-backed outbox: the in-memory outbox plus a JSON snapshot on disk.
//!
//! Every successful mutation rewrites the snapshot: the temp file is written
//! and synced, renamed over the old one, then the directory entry is synced.
//! A crash or power loss leaves either the old or the new file. On
//! open, events that were InFlight when the process died go back to Pending;
//! their lease holder is gone.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{
    AttemptReport, InMemoryOutbox, LeasedEvent, NackOutcome, Outbox, OutboxError, RetryPolicy,
};
use crate::domain::{EventId, EventState, LeaseId, NewEvent, WebhookEvent};
use crate::observability::OutboxCounts;
use crate::ports::{Clock, IdGenerator};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    events: Vec<WebhookEvent>,
}

pub struct FileOutbox {
    inner: InMemoryOutbox,
    path: PathBuf,
    /// Serialises snapshot writes so a later state never loses to an earlier one.
    persist_lock: Mutex<()>,
}

impl FileOutbox {
    /// Open (or create) the outbox stored at `path`.
    pub async fn open(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry_policy: RetryPolicy,
        lease_timeout: Duration,
    ) -> Result<Self, OutboxError> {
        let path = path.as_ref().to_path_buf();
        let now = clock.now();
        let inner = InMemoryOutbox::new(clock, ids, retry_policy, lease_timeout);

        let mut events = load(&path).await?;
        let mut recovered = 0usize;
        for event in &mut events {
            if event.state == EventState::InFlight {
                event.revert_to_pending("recovered after restart".to_string(), now);
                recovered += 1;
            }
        }
        let total = events.len();
        inner.restore(events);

        let outbox = Self {
            inner,
            path,
            persist_lock: Mutex::new(()),
        };
        outbox.persist().await?;

        tracing::info!(
            target: "hookline::outbox",
            path = %outbox.path.display(),
            events = total,
            recovered,
            "file outbox opened"
        );
        Ok(outbox)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), OutboxError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = SnapshotFile {
            version: SNAPSHOT_VERSION,
            events: self.inner.snapshot(),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| OutboxError::Storage(format!("encode snapshot: {e}")))?;

        let tmp = temp_path(&self.path);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| storage_error("create", &tmp, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| storage_error("write", &tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("sync", &tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage_error("rename", &self.path, e))?;
        sync_parent(&self.path).await
    }

    /// Persist after a successful mutation and pass its result through.
    async fn persisted<T>(&self, result: Result<T, OutboxError>) -> Result<T, OutboxError> {
        let value = result?;
        if let Err(e) = self.persist().await {
            tracing::error!(
                target: "hookline::outbox",
                path = %self.path.display(),
                error = %e,
                "failed to persist outbox snapshot"
            );
            return Err(e);
        }
        Ok(value)
    }
}

async fn load(path: &Path) -> Result<Vec<WebhookEvent>, OutboxError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| storage_error("create directory", parent, e))?;
            }
            return Ok(Vec::new());
        }
        Err(e) => return Err(storage_error("read", path, e)),
    };

    let snapshot: SnapshotFile = serde_json::from_slice(&bytes)
        .map_err(|e| OutboxError::Storage(format!("decode {}: {e}", path.display())))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(OutboxError::Storage(format!(
            "unsupported snapshot version {} in {}",
            snapshot.version,
            path.display()
        )));
    }
    Ok(snapshot.events)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "outbox.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Make the rename itself durable.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<(), OutboxError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::File::open(dir)
        .await
        .map_err(|e| storage_error("open directory", dir, e))?
        .sync_all()
        .await
        .map_err(|e| storage_error("sync directory", dir, e))
}

// Directory handles cannot be synced here; the rename is as durable as the
// platform makes it.
#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<(), OutboxError> {
    Ok(())
}

fn storage_error(op: &str, path: &Path, e: std::io::Error) -> OutboxError {
    OutboxError::Storage(format!("{op} {}: {e}", path.display()))
}

#[async_trait]
impl Outbox for FileOutbox {
    async fn enqueue(&self, event: NewEvent) -> Result<EventId, OutboxError> {
        let result = self.inner.enqueue(event).await;
        self.persisted(result).await
    }

    async fn lease(&self, n: usize) -> Result<Vec<LeasedEvent>, OutboxError> {
        let leased = self.inner.lease(n).await?;
        if leased.is_empty() {
            return Ok(leased);
        }
        self.persisted(Ok(leased)).await
    }

    async fn ack(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError> {
        let result = self.inner.ack(id, lease, report).await;
        self.persisted(result).await
    }

    async fn nack(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<NackOutcome, OutboxError> {
        let result = self.inner.nack(id, lease, report).await;
        self.persisted(result).await
    }

    async fn reject(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError> {
        let result = self.inner.reject(id, lease, report).await;
        self.persisted(result).await
    }

    async fn fail(
        &self,
        id: &EventId,
        lease: LeaseId,
        report: AttemptReport,
    ) -> Result<(), OutboxError> {
        let result = self.inner.fail(id, lease, report).await;
        self.persisted(result).await
    }

    async fn release(&self, id: &EventId, lease: LeaseId) -> Result<(), OutboxError> {
        let result = self.inner.release(id, lease).await;
        self.persisted(result).await
    }

    async fn reap_expired_leases(&self) -> Result<usize, OutboxError> {
        let reaped = self.inner.reap_expired_leases().await?;
        if reaped == 0 {
            return Ok(0);
        }
        self.persisted(Ok(reaped)).await
    }

    async fn prune_terminal(&self, older_than: DateTime<Utc>) -> Result<usize, OutboxError> {
        let pruned = self.inner.prune_terminal(older_than).await?;
        if pruned == 0 {
            return Ok(0);
        }
        self.persisted(Ok(pruned)).await
    }

    async fn get(&self, id: &EventId) -> Result<Option<WebhookEvent>, OutboxError> {
        self.inner.get(id).await
    }

    async fn counts(&self) -> Result<OutboxCounts, OutboxError> {
        self.inner.counts().await
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        self.inner.wait_for_work(max_wait).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{TimeZone, Utc};

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ))
    }

    async fn open(path: &Path, clock: Arc<FixedClock>) -> FileOutbox {
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        FileOutbox::open(path, clock, ids, RetryPolicy::default(), Duration::from_secs(60))
            .await
            .unwrap()
    }

    fn event(id: &str) -> NewEvent {
        NewEvent::new(
            EventId::new(id),
            EventType::new("play.confirmation"),
            serde_json::json!({"request_id": id}),
        )
    }

    #[tokio::test]
    async fn events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");

        {
            let outbox = open(&path, clock()).await;
            outbox.enqueue(event("e1")).await.unwrap();
            outbox.enqueue(event("e2")).await.unwrap();
            let leased = outbox.lease(1).await.unwrap().remove(0);
            outbox
                .ack(leased.id(), leased.lease_id(), AttemptReport::default().with_status(200))
                .await
                .unwrap();
        }

        let reopened = open(&path, clock()).await;
        let counts = reopened.counts().await.unwrap();
        assert_eq!(counts.delivered, 1);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn in_flight_events_are_recovered_as_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");

        {
            let outbox = open(&path, clock()).await;
            outbox.enqueue(event("e1")).await.unwrap();
            assert_eq!(outbox.lease(1).await.unwrap().len(), 1);
            // dropped without ack: simulated crash
        }

        let reopened = open(&path, clock()).await;
        let stored = reopened.get(&EventId::new("e1")).await.unwrap().unwrap();
        assert_eq!(stored.state, EventState::Pending);
        assert_eq!(stored.attempt_count, 0);
        assert!(stored.lease.is_none());
        assert_eq!(reopened.lease(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_parent_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.json");

        let outbox = open(&path, clock()).await;
        outbox.enqueue(event("e1")).await.unwrap();

        assert!(path.exists());
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn torn_temp_file_does_not_shadow_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        {
            let outbox = open(&path, clock()).await;
            outbox.enqueue(event("e1")).await.unwrap();
        }
        // a write that died before its rename
        std::fs::write(temp_path(&path), b"{\"version\":1,\"ev").unwrap();

        let reopened = open(&path, clock()).await;
        assert_eq!(reopened.counts().await.unwrap().pending, 1);

        reopened.enqueue(event("e2")).await.unwrap();
        let on_disk: SnapshotFile = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.version, SNAPSHOT_VERSION);
        assert_eq!(on_disk.events.len(), 2);
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn pruned_events_leave_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        let clock = clock();
        {
            let outbox = open(&path, clock.clone()).await;
            outbox.enqueue(event("e1")).await.unwrap();
            outbox.enqueue(event("e2")).await.unwrap();
            let leased = outbox.lease(2).await.unwrap();
            for l in &leased {
                outbox
                    .ack(l.id(), l.lease_id(), AttemptReport::default().with_status(200))
                    .await
                    .unwrap();
            }
            clock.advance(chrono::Duration::days(2));
            let cutoff = clock.now() - chrono::Duration::days(1);
            assert_eq!(outbox.prune_terminal(cutoff).await.unwrap(), 2);
        }

        let reopened = open(&path, clock).await;
        assert_eq!(reopened.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let clock = clock();
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let err = FileOutbox::open(&path, clock, ids, RetryPolicy::default(), Duration::from_secs(60))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OutboxError::Storage(_)));
    }
}
