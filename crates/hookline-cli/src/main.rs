use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use hookline_core::app::{
    DeliveryEngine, EventIntake, IntakeHandle, ReaperLoop, WorkerConfig, WorkerGroup,
};
use hookline_core::domain::payload::PLAY_CONFIRMATION;
use hookline_core::domain::{EventId, EventType, NewEvent, PlayConfirmation};
use hookline_core::impls::HttpTransport;
use hookline_core::observability::init_tracing;
use hookline_core::outbox::{FileOutbox, InMemoryOutbox, Outbox};
use hookline_core::ports::{Clock, IdGenerator, SystemClock, TracingSink, UlidGenerator};
use hookline_core::{HooklineConfig, HooklineError};

/// One line of stdin.
///
/// `{"event_type": "play.confirmation", "payload": {...}}` is validated as a
/// play confirmation and keyed by its `request_id`. Other event types need an
/// object payload; `id` is generated when absent.
#[derive(Debug, Deserialize)]
struct InputLine {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    payload: serde_json::Value,
}

impl InputLine {
    fn into_event(self, ids: &dyn IdGenerator) -> Result<NewEvent, HooklineError> {
        let event_type = self
            .event_type
            .unwrap_or_else(|| PLAY_CONFIRMATION.to_string());
        if event_type == PLAY_CONFIRMATION {
            let confirmation: PlayConfirmation = serde_json::from_value(self.payload)
                .map_err(|e| HooklineError::Other(format!("invalid confirmation: {e}")))?;
            return Ok(confirmation.into_event()?);
        }
        let id = match self.id {
            Some(id) => EventId::new(id),
            None => ids.generate_event_id(),
        };
        Ok(NewEvent::new(id, EventType::new(event_type), self.payload))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "hookline stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), HooklineError> {
    let config = Arc::new(HooklineConfig::from_env()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));

    let outbox: Arc<dyn Outbox> = match &config.outbox_path {
        Some(path) => Arc::new(
            FileOutbox::open(
                path,
                clock.clone(),
                ids.clone(),
                config.retry.clone(),
                config.lease_timeout,
            )
            .await?,
        ),
        None => Arc::new(InMemoryOutbox::new(
            clock.clone(),
            ids.clone(),
            config.retry.clone(),
            config.lease_timeout,
        )),
    };

    let transport = Arc::new(
        HttpTransport::new(config.attempt_timeout)
            .map_err(|e| HooklineError::Other(e.to_string()))?,
    );
    let engine = Arc::new(DeliveryEngine::new(
        &config,
        outbox.clone(),
        transport,
        clock.clone(),
        Arc::new(TracingSink),
    )?);

    let workers = WorkerGroup::spawn(config.workers, engine, WorkerConfig::from(config.as_ref()));
    let reaper = ReaperLoop::new(
        outbox.clone(),
        clock.clone(),
        config.lease_timeout / 2,
        config.terminal_retention,
    )
    .spawn();
    let (intake, intake_join) = EventIntake::spawn(outbox.clone(), config.batch_size * 4);

    tracing::info!(
        destination = %config.destination.url(),
        workers = config.workers,
        durable = config.outbox_path.is_some(),
        "hookline started, reading events from stdin"
    );

    tokio::select! {
        result = read_events(&intake, outbox.as_ref(), ids.as_ref()) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }
    drop(intake);
    let _ = intake_join.await;

    let grace = config.attempt_timeout + Duration::from_secs(1);
    let report = workers.shutdown(grace).await;
    reaper.shutdown().await;

    let counts = outbox.counts().await?;
    tracing::info!(
        pending = counts.pending,
        in_flight = counts.in_flight,
        delivered = counts.delivered,
        failed = counts.failed,
        exhausted = counts.exhausted,
        aborted = report.aborted,
        "hookline stopped"
    );
    Ok(())
}

/// Feed stdin into the intake, then keep delivering until nothing is
/// outstanding (or Ctrl-C wins the race in `run`).
async fn read_events(
    intake: &IntakeHandle,
    outbox: &dyn Outbox,
    ids: &dyn IdGenerator,
) -> Result<(), HooklineError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| HooklineError::Other(format!("read stdin: {e}")))?
    {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str::<InputLine>(&line)
            .map_err(|e| HooklineError::Other(e.to_string()))
            .and_then(|input| input.into_event(ids));
        match event {
            Ok(event) => {
                let id = intake.submit(event).await?;
                tracing::info!(line = line_no, event_id = %id, "event staged");
            }
            Err(e) => tracing::warn!(line = line_no, error = %e, "skipping input line"),
        }
    }

    tracing::info!("stdin closed, waiting for outstanding deliveries");
    loop {
        let counts = outbox.counts().await?;
        if counts.pending + counts.in_flight == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
