//! Server-Sent Events handlers for real-time change notifications

use super::handlers::{AppError, NotificationState};
use crate::auth::AuthUser;
use crate::events::{ChangeEvent, ChangeKind, EntityFilter, EntityKind};
use crate::gateway::OutboundFrame;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tracing::{debug, info, warn};

/// Query parameters for `/api/events/stream`
#[derive(Debug, Deserialize, Default)]
pub struct StreamQuery {
    /// Comma-separated entity kinds (e.g. "Attendance,Schedule"); empty = all
    pub entities: Option<String>,
}

fn frame_to_event(frame: &OutboundFrame) -> Option<Result<Event, Infallible>> {
    match frame.data_json() {
        Ok(data) => Some(Ok(Event::default().event(frame.event_name()).data(data))),
        Err(e) => {
            warn!(error = %e, "Failed to serialize outbound frame, skipping");
            None
        }
    }
}

/// SSE handler for `/api/events/stream`.
///
/// The response body is the gateway stream itself; when the client goes
/// away axum drops the body, which closes the stream and releases its bus
/// subscription.
pub async fn stream_events(
    State(state): State<NotificationState>,
    user: AuthUser,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let filter = EntityFilter::parse(query.entities.as_deref())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let stream = state
        .gateway
        .open_stream(filter)
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

    info!(
        stream = stream.id(),
        user = %user.user_id,
        entities = ?stream.entity_filter().kinds(),
        "SSE client connected"
    );

    let events =
        stream.filter_map(|frame| futures::future::ready(frame_to_event(&frame)));
    Ok(Sse::new(events))
}

/// Body of `POST /internal/events`: a `data-change` document.
///
/// A `timestamp` field, if present, is ignored; the server stamps the event
/// when it accepts it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(rename = "type")]
    pub change: ChangeKind,
    pub entity: String,
    pub entity_id: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl IngestRequest {
    fn into_event(self) -> Result<ChangeEvent, AppError> {
        let entity: EntityKind = self
            .entity
            .parse()
            .map_err(|e: crate::events::UnknownEntityKind| AppError::BadRequest(e.to_string()))?;

        let event = ChangeEvent::from_parts(self.change, entity, self.entity_id, self.data)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        Ok(event.with_actor(self.user_id))
    }
}

/// Ingest handler for `/internal/events`.
///
/// Lets CRM processes that do not share this process's bus publish
/// through it. Returns 202 once the event is on the bus.
pub async fn ingest_event(
    State(state): State<NotificationState>,
    user: AuthUser,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(req) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut event = req.into_event()?;
    if event.actor_id().is_none() {
        event = event.with_actor(user.actor_id());
    }

    let delivered = state.gateway.bus().publish(event);
    debug!(delivered, "Ingested change event");

    Ok(StatusCode::ACCEPTED)
}
