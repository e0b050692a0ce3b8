//! Impls - production implementations of the ports.
//!
//! - **HttpTransport**: `Transport` over a reqwest client
//!
//! Clocks, id generators and sinks are small enough to live next to their
//! traits in `ports`.

pub mod http_transport;

pub use self::http_transport::HttpTransport;
