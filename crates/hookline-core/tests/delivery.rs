//! End-to-end delivery against a wiremock receiver.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use hookline_core::app::{DeliveryEngine, DeliveryOutcome, WorkerConfig, WorkerGroup};
use hookline_core::domain::{EventState, ExhaustReason};
use hookline_core::impls::HttpTransport;
use hookline_core::inbound::Verdict;
use hookline_core::outbox::Outbox;
use hookline_core::ports::{ChannelSink, Clock, DeliveryNotice};
use hookline_core::signing::SecretKey;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn server_error_is_retried_then_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(HOOK_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(HOOK_PATH))
        .and(header("Content-Type", "application/json"))
        .and(header_exists("X-Signature"))
        .and(header_exists("X-Timestamp"))
        .and(header("X-Event-Id", "req-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri());
    let id = enqueue(fx.outbox.as_ref(), confirmation("req-1")).await;

    let outcomes = fx.engine.run_once(10).await.unwrap();
    assert!(matches!(
        outcomes[0].1,
        DeliveryOutcome::Rescheduled {
            status: Some(500),
            attempt_count: 1,
            ..
        }
    ));

    let stored = fx.outbox.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, EventState::Pending);
    assert_eq!(stored.attempt_count, 1);
    assert!(stored.next_attempt_at > fx.clock.now());
    assert!(fx.engine.run_once(10).await.unwrap().is_empty());

    fx.clock.set(stored.next_attempt_at);
    let outcomes = fx.engine.run_once(10).await.unwrap();
    assert_eq!(outcomes[0].1, DeliveryOutcome::Delivered { status: 200 });

    let stored = fx.outbox.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, EventState::Delivered);
    assert_eq!(stored.attempts.len(), 2);
    assert_eq!(stored.attempts[0].status, Some(500));
    assert_eq!(stored.attempts[1].status, Some(200));
}

#[tokio::test]
async fn receiver_can_verify_what_was_sent() {
    let server = MockServer::start().await;
    let fx = fixture(&server.uri());
    let receiver = VerifyingReceiver::new(fx.clock.clone());
    Mock::given(method("POST"))
        .and(path(HOOK_PATH))
        .respond_with(receiver.clone())
        .mount(&server)
        .await;

    enqueue(fx.outbox.as_ref(), confirmation("req-1")).await;
    enqueue(fx.outbox.as_ref(), confirmation("req-2")).await;

    let outcomes = fx.engine.run_once(10).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(
        outcomes
            .iter()
            .all(|(_, o)| *o == DeliveryOutcome::Delivered { status: 200 })
    );
    assert_eq!(receiver.verdicts(), vec![Verdict::Accepted, Verdict::Accepted]);
}

#[tokio::test]
async fn wrong_secret_is_rejected_by_the_receiver_and_not_retried() {
    let server = MockServer::start().await;
    let mut fx = fixture(&server.uri());
    let receiver = VerifyingReceiver::new(fx.clock.clone());
    Mock::given(method("POST"))
        .respond_with(receiver.clone())
        .mount(&server)
        .await;

    // sender signs with a different secret than the receiver expects
    let mut config = config_for(&server.uri());
    config.secret = SecretKey::new("not-the-shared-secret").unwrap();
    let (sink, mut notices) = ChannelSink::new();
    let engine = Arc::new(
        DeliveryEngine::new(
            &config,
            fx.outbox.clone(),
            Arc::new(HttpTransport::new(Duration::from_secs(2)).unwrap()),
            fx.clock.clone(),
            Arc::new(sink),
        )
        .unwrap(),
    );

    let id = enqueue(fx.outbox.as_ref(), confirmation("req-1")).await;
    let outcomes = engine.run_once(10).await.unwrap();
    assert_eq!(outcomes[0].1, DeliveryOutcome::Rejected { status: 401 });

    let stored = fx.outbox.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, EventState::Exhausted);
    assert!(matches!(
        stored.exhaust_reason,
        Some(ExhaustReason::Rejected { status: 401, .. })
    ));
    assert!(matches!(
        notices.try_recv().unwrap(),
        DeliveryNotice::Exhausted { attempts: 1, .. }
    ));
    assert!(fx.notices.try_recv().is_err());
}

#[tokio::test]
async fn persistent_failures_exhaust_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(5)
        .mount(&server)
        .await;

    let mut fx = fixture(&server.uri());
    let id = enqueue(fx.outbox.as_ref(), confirmation("req-1")).await;

    for _ in 0..5 {
        fx.engine.run_once(10).await.unwrap();
        fx.clock.advance(chrono::Duration::minutes(30));
    }

    let stored = fx.outbox.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, EventState::Exhausted);
    assert_eq!(stored.attempt_count, 5);
    assert_eq!(
        stored.exhaust_reason,
        Some(ExhaustReason::MaxAttempts { attempts: 5 })
    );
    assert!(matches!(
        fx.notices.try_recv().unwrap(),
        DeliveryNotice::Exhausted { .. }
    ));
    assert!(fx.engine.run_once(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn worker_group_delivers_everything() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(20)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri());
    let group = WorkerGroup::spawn(
        4,
        fx.engine.clone(),
        WorkerConfig {
            batch_size: 3,
            poll_interval: Duration::from_millis(20),
        },
    );
    for i in 0..20 {
        enqueue(fx.outbox.as_ref(), confirmation(&format!("req-{i}"))).await;
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        while fx.outbox.counts().await.unwrap().delivered < 20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let report = group.shutdown(Duration::from_secs(2)).await;
    assert!(!report.aborted);
}
