//! Change event types for real-time SSE notifications

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// The tracked CRM entity that was mutated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Subscription,
    Attendance,
    Invoice,
    Payment,
    Client,
    Schedule,
    Group,
    MedicalCertificate,
    Rental,
}

impl EntityKind {
    /// Every tracked kind, in declaration order
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Subscription,
        EntityKind::Attendance,
        EntityKind::Invoice,
        EntityKind::Payment,
        EntityKind::Client,
        EntityKind::Schedule,
        EntityKind::Group,
        EntityKind::MedicalCertificate,
        EntityKind::Rental,
    ];

    /// Wire name, as sent in the `entity` field
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Subscription => "Subscription",
            EntityKind::Attendance => "Attendance",
            EntityKind::Invoice => "Invoice",
            EntityKind::Payment => "Payment",
            EntityKind::Client => "Client",
            EntityKind::Schedule => "Schedule",
            EntityKind::Group => "Group",
            EntityKind::MedicalCertificate => "MedicalCertificate",
            EntityKind::Rental => "Rental",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no tracked entity kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown entity kind: {0}")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    /// Case-insensitive; `_` and `-` separators are ignored, so
    /// `MedicalCertificate`, `medical_certificate` and `medical-certificate`
    /// all resolve to the same kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| UnknownEntityKind(s.trim().to_string()))
    }
}

/// The mutation performed on the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Reasons a change event cannot be built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("entity id must not be empty")]
    EmptyEntityId,
    #[error("{0:?} events require a payload")]
    MissingPayload(ChangeKind),
    #[error("Deleted events must not carry a payload")]
    UnexpectedPayload,
}

/// A change event published after a successful write
///
/// Fields are private so the payload invariant holds for every instance:
/// `payload` is `None` exactly when the change is a deletion, and
/// `entity_id` is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    change_kind: ChangeKind,
    entity_kind: EntityKind,
    entity_id: String,
    payload: Option<serde_json::Value>,
    actor_id: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// A record was created; `payload` is its snapshot
    pub fn created(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self, EventError> {
        Self::from_parts(ChangeKind::Created, entity_kind, entity_id, Some(payload))
    }

    /// A record was updated; `payload` is its new snapshot
    pub fn updated(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self, EventError> {
        Self::from_parts(ChangeKind::Updated, entity_kind, entity_id, Some(payload))
    }

    /// A record was deleted
    pub fn deleted(
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
    ) -> Result<Self, EventError> {
        Self::from_parts(ChangeKind::Deleted, entity_kind, entity_id, None)
    }

    /// Build an event from loose parts, validating the invariants.
    ///
    /// A JSON `null` payload counts as absent.
    pub fn from_parts(
        change_kind: ChangeKind,
        entity_kind: EntityKind,
        entity_id: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        let entity_id = entity_id.into();
        if entity_id.trim().is_empty() {
            return Err(EventError::EmptyEntityId);
        }

        let payload = payload.filter(|v| !v.is_null());
        match (change_kind, &payload) {
            (ChangeKind::Deleted, Some(_)) => return Err(EventError::UnexpectedPayload),
            (ChangeKind::Created | ChangeKind::Updated, None) => {
                return Err(EventError::MissingPayload(change_kind))
            }
            _ => {}
        }

        Ok(Self {
            change_kind,
            entity_kind,
            entity_id,
            payload,
            actor_id: None,
            occurred_at: Utc::now(),
        })
    }

    /// Set the user who caused the change
    pub fn with_actor(mut self, actor_id: Option<String>) -> Self {
        self.actor_id = actor_id.filter(|a| !a.is_empty());
        self
    }

    pub fn change_kind(&self) -> ChangeKind {
        self.change_kind
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.entity_kind
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// RFC 3339 UTC with millisecond precision, e.g. `2026-03-01T10:15:00.123Z`
pub(crate) fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// JSON shape of a `data-change` frame
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireChangeEvent<'a> {
    #[serde(rename = "type")]
    change_kind: ChangeKind,
    entity: EntityKind,
    entity_id: &'a str,
    data: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    timestamp: String,
}

impl Serialize for ChangeEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireChangeEvent {
            change_kind: self.change_kind,
            entity: self.entity_kind,
            entity_id: &self.entity_id,
            data: self.payload.as_ref(),
            user_id: self.actor_id.as_deref(),
            timestamp: wire_timestamp(self.occurred_at),
        }
        .serialize(serializer)
    }
}

/// Publish side of the notification system.
///
/// Fire-and-forget: implementations never block the write path and never
/// report failures back to it.
pub trait EventEmitter: Send + Sync {
    /// Publish a fully built event
    fn emit(&self, event: ChangeEvent);

    fn emit_created(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        payload: serde_json::Value,
        actor_id: Option<String>,
    ) {
        match ChangeEvent::created(entity_kind, entity_id, payload) {
            Ok(event) => self.emit(event.with_actor(actor_id)),
            Err(e) => warn!(entity = %entity_kind, entity_id, "Dropping Created event: {}", e),
        }
    }

    fn emit_updated(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        payload: serde_json::Value,
        actor_id: Option<String>,
    ) {
        match ChangeEvent::updated(entity_kind, entity_id, payload) {
            Ok(event) => self.emit(event.with_actor(actor_id)),
            Err(e) => warn!(entity = %entity_kind, entity_id, "Dropping Updated event: {}", e),
        }
    }

    fn emit_deleted(&self, entity_kind: EntityKind, entity_id: &str, actor_id: Option<String>) {
        match ChangeEvent::deleted(entity_kind, entity_id) {
            Ok(event) => self.emit(event.with_actor(actor_id)),
            Err(e) => warn!(entity = %entity_kind, entity_id, "Dropping Deleted event: {}", e),
        }
    }
}
