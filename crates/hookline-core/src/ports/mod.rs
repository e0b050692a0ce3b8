//! Ports - seams to external collaborators.
//!
//! Each trait hides something the core must not depend on directly: the wall
//! clock, the HTTP client, id minting, and the alerting channel.

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{ChannelSink, DeliveryEventSink, DeliveryNotice, TracingSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::transport::{OutboundRequest, Transport, TransportError, TransportResponse};
