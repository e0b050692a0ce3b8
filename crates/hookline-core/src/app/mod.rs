//! App - wires the ports into running components.
//!
//! # Components
//! - **DeliveryEngine**: sign, send, classify, report (one attempt per lease)
//! - **WorkerGroup**: n workers looping lease -> deliver, with graceful shutdown
//! - **ReaperLoop**: returns expired leases to Pending, prunes settled events
//! - **EventIntake**: channel hand-off from producers into the outbox

pub mod delivery;
pub mod intake;
pub mod reaper;
pub mod worker;

pub use self::delivery::{Classification, DeliveryEngine, DeliveryOutcome, classify};
pub use self::intake::{EventIntake, IntakeError, IntakeHandle};
pub use self::reaper::{ReaperHandle, ReaperLoop, SweepReport};
pub use self::worker::{ShutdownReport, WorkerConfig, WorkerGroup};
