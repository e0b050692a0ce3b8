//! IdGenerator port - id minting behind a trait.
//!
//! ULIDs are time-ordered and need no coordination, so lease and attempt ids
//! sort by creation time. The timestamp part comes from the injected `Clock`.

use crate::domain::ids::{AttemptId, EventId, LeaseId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_lease_id(&self) -> LeaseId;

    fn generate_attempt_id(&self) -> AttemptId;

    fn generate_event_id(&self) -> EventId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_lease_id(&self) -> LeaseId {
        LeaseId::from(self.next_ulid())
    }

    fn generate_attempt_id(&self) -> AttemptId {
        AttemptId::from(self.next_ulid())
    }

    fn generate_event_id(&self) -> EventId {
        EventId::generate(self.next_ulid())
    }
}
