//! Change event system for real-time SSE notifications
//!
//! This module provides:
//! - `ChangeEvent`: typed events published after every CRM mutation
//! - `EventBus`: in-process fan-out with per-subscriber entity filters
//! - `HttpEmitter`: forwards events from another process over HTTP

mod bus;
mod filter;
mod remote;
mod types;

pub use bus::{EventBus, Subscription, DEFAULT_CAPACITY};
pub use filter::{EntityFilter, FilterError};
pub use remote::HttpEmitter;
pub(crate) use types::wire_timestamp;
pub use types::{ChangeEvent, ChangeKind, EntityKind, EventEmitter, EventError, UnknownEntityKind};
