use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::domain::EventState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub delivered: usize,
    pub failed: usize,
    pub exhausted: usize,
}

impl OutboxCounts {
    pub fn record(&mut self, state: EventState) {
        match state {
            EventState::Pending => self.pending += 1,
            EventState::InFlight => self.in_flight += 1,
            EventState::Delivered => self.delivered += 1,
            EventState::Failed => self.failed += 1,
            EventState::Exhausted => self.exhausted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.delivered + self.failed + self.exhausted
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
