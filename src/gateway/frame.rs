//! Outbound frames written to a client stream

use crate::events::{wire_timestamp, ChangeEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// SSE event name for change notifications
pub const DATA_CHANGE: &str = "data-change";
/// SSE event name for keep-alive frames
pub const HEARTBEAT: &str = "heartbeat";

/// One frame of an outbound stream: either a change event or a heartbeat
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    DataChange(ChangeEvent),
    Heartbeat { at: DateTime<Utc> },
}

#[derive(Serialize)]
struct HeartbeatData {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
}

impl OutboundFrame {
    pub fn heartbeat() -> Self {
        OutboundFrame::Heartbeat { at: Utc::now() }
    }

    /// The frame's `type` discriminator (SSE `event:` field)
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundFrame::DataChange(_) => DATA_CHANGE,
            OutboundFrame::Heartbeat { .. } => HEARTBEAT,
        }
    }

    /// The frame's JSON `data` payload
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            OutboundFrame::DataChange(event) => serde_json::to_string(event),
            OutboundFrame::Heartbeat { at } => serde_json::to_string(&HeartbeatData {
                kind: HEARTBEAT,
                timestamp: wire_timestamp(*at),
            }),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, OutboundFrame::Heartbeat { .. })
    }
}
