//! Notification gateway: long-lived client streams over the event bus
//!
//! - `NotificationGateway`: opens streams, runs heartbeats, shuts down cleanly
//! - `EventStream`: the outbound frames of one client connection
//! - `ConnectionDiagnostics`: open/peak/opened/closed counters

mod frame;
mod manager;
mod stats;
mod stream;

pub use frame::{OutboundFrame, DATA_CHANGE, HEARTBEAT};
pub use manager::{GatewayConfig, GatewayError, NotificationGateway};
pub use stats::ConnectionDiagnostics;
pub use stream::EventStream;
