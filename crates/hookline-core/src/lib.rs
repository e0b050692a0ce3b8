//! hookline-core
//!
//! Signed webhook delivery and verification for partner integrations.
//!
//! # Modules
//! - **domain**: data model (ids, events, attempts, confirmation payload)
//! - **signing**: canonical request encoding + HMAC-SHA256 signer/verifier
//! - **replay**: timestamp window and seen-signature guard
//! - **inbound**: verification contract for the hosting request handler
//! - **outbox**: durable staging queue with leases and retry policy
//! - **ports**: seams for external collaborators (Clock, Transport, IdGenerator, sinks)
//! - **impls**: production implementations of the ports (reqwest transport)
//! - **app**: delivery engine, worker group, lease reaper, event intake
//! - **config**: immutable configuration loaded from the environment

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod inbound;
pub mod observability;
pub mod outbox;
pub mod ports;
pub mod replay;
pub mod signing;

pub use config::HooklineConfig;
pub use error::HooklineError;
