//! Shared fixtures for hookline-core integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hookline_core::app::DeliveryEngine;
use hookline_core::config::Destination;
use hookline_core::domain::{EventId, EventType, NewEvent};
use hookline_core::impls::HttpTransport;
use hookline_core::inbound::{InboundRequest, InboundVerifier, Verdict};
use hookline_core::outbox::{InMemoryOutbox, Outbox, RetryPolicy};
use hookline_core::ports::{ChannelSink, Clock, DeliveryNotice, FixedClock, UlidGenerator};
use hookline_core::signing::{SIGNATURE_HEADER, SecretKey, Signer, TIMESTAMP_HEADER};
use hookline_core::HooklineConfig;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use wiremock::{Request, Respond, ResponseTemplate};

pub const SECRET: &str = "banca-integration-secret";
pub const HOOK_PATH: &str = "/webhooks/plays/confirmation";

/// Log to the test writer when `RUST_LOG` is set.
pub fn init_test_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub struct Fixture {
    pub clock: Arc<FixedClock>,
    pub outbox: Arc<InMemoryOutbox>,
    pub engine: Arc<DeliveryEngine>,
    pub notices: mpsc::UnboundedReceiver<DeliveryNotice>,
    pub config: HooklineConfig,
}

pub fn config_for(server_uri: &str) -> HooklineConfig {
    let mut config = HooklineConfig::new(
        SecretKey::new(SECRET).unwrap(),
        Destination::parse(&format!("{server_uri}{HOOK_PATH}")).unwrap(),
    );
    config.retry = RetryPolicy {
        jitter: 0.0,
        ..RetryPolicy::default()
    };
    config.attempt_timeout = Duration::from_secs(2);
    config
}

/// Engine wired to a real HTTP transport pointing at `server_uri`.
pub fn fixture(server_uri: &str) -> Fixture {
    init_test_tracing();
    let config = config_for(server_uri);
    let clock = Arc::new(FixedClock::new(start_time()));
    let outbox = Arc::new(InMemoryOutbox::new(
        clock.clone(),
        Arc::new(UlidGenerator::new(clock.clone())),
        config.retry.clone(),
        config.lease_timeout,
    ));
    let (sink, notices) = ChannelSink::new();
    let engine = Arc::new(
        DeliveryEngine::new(
            &config,
            outbox.clone(),
            Arc::new(HttpTransport::new(config.attempt_timeout).unwrap()),
            clock.clone(),
            Arc::new(sink),
        )
        .unwrap(),
    );
    Fixture {
        clock,
        outbox,
        engine,
        notices,
        config,
    }
}

pub fn confirmation(request_id: &str) -> NewEvent {
    NewEvent::new(
        EventId::new(request_id),
        EventType::new("play.confirmation"),
        serde_json::json!({
            "request_id": request_id,
            "play_id_banca": "BANCA_1700000000000",
            "status": "confirmed",
            "ticket_code": "TKT-8K2M4Q1Z",
            "timestamp": "2025-03-01T09:00:00.000Z",
        }),
    )
}

pub async fn enqueue(outbox: &dyn Outbox, event: NewEvent) -> EventId {
    outbox.enqueue(event).await.unwrap()
}

/// Receiver that authenticates every call the way a partner would and
/// answers 200 or 401. Clones share state.
#[derive(Clone)]
pub struct VerifyingReceiver {
    verifier: Arc<InboundVerifier>,
    verdicts: Arc<Mutex<Vec<Verdict>>>,
}

impl VerifyingReceiver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let signer = Arc::new(Signer::new(&SecretKey::new(SECRET).unwrap()).unwrap());
        Self {
            verifier: Arc::new(InboundVerifier::new(signer, clock, Duration::from_secs(120))),
            verdicts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn verdicts(&self) -> Vec<Verdict> {
        self.verdicts.lock().unwrap().clone()
    }
}

impl Respond for VerifyingReceiver {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let header = |name: &str| {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let signature = header(SIGNATURE_HEADER);
        let timestamp = header(TIMESTAMP_HEADER);
        let verdict = self.verifier.verify(&InboundRequest {
            method: request.method.as_str(),
            path: request.url.path(),
            body: &request.body,
            signature: signature.as_deref(),
            timestamp: timestamp.as_deref(),
        });
        let status = match &verdict {
            Verdict::Accepted => 200,
            Verdict::Rejected(reason) => reason.status_code(),
        };
        self.verdicts.lock().unwrap().push(verdict);
        ResponseTemplate::new(status)
    }
}
