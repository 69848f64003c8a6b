//! Per-client outbound streams and their exactly-once cleanup

use super::frame::OutboundFrame;
use super::stats::ConnectionStats;
use crate::events::{EntityFilter, EventBus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) type OpenStreams = DashMap<u64, Arc<StreamLease>>;

/// Resources held by one open stream.
///
/// Shared by the consumer and both producer tasks; whichever side notices
/// the end first calls [`StreamLease::close`], and only that first call has
/// any effect.
pub(crate) struct StreamLease {
    id: u64,
    subscription_id: u64,
    filter: EntityFilter,
    opened_at: DateTime<Utc>,
    closed: AtomicBool,
    token: CancellationToken,
    bus: EventBus,
    stats: Arc<ConnectionStats>,
    open_streams: Weak<OpenStreams>,
}

impl StreamLease {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        subscription_id: u64,
        filter: EntityFilter,
        opened_at: DateTime<Utc>,
        token: CancellationToken,
        bus: EventBus,
        stats: Arc<ConnectionStats>,
        open_streams: Weak<OpenStreams>,
    ) -> Self {
        Self {
            id,
            subscription_id,
            filter,
            opened_at,
            closed: AtomicBool::new(false),
            token,
            bus,
            stats,
            open_streams,
        }
    }

    /// Transition the stream to `Closed`. Returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.token.cancel();
        self.bus.unsubscribe(self.subscription_id);
        if let Some(open) = self.open_streams.upgrade() {
            open.remove(&self.id);
        }
        let active = self.stats.record_close();

        debug!(
            stream = self.id,
            lifetime_secs = (Utc::now() - self.opened_at).num_seconds(),
            active,
            "SSE stream closed"
        );
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn entity_filter(&self) -> &EntityFilter {
        &self.filter
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// The outbound side of one client connection.
///
/// Yields change events (already filtered) interleaved with heartbeats.
/// Infinite until the client goes away, [`EventStream::close`] is called,
/// or the gateway shuts down. Dropping the stream closes it.
pub struct EventStream {
    rx: ReceiverStream<OutboundFrame>,
    lease: Arc<StreamLease>,
}

impl EventStream {
    pub(crate) fn new(rx: ReceiverStream<OutboundFrame>, lease: Arc<StreamLease>) -> Self {
        Self { rx, lease }
    }

    pub fn id(&self) -> u64 {
        self.lease.id
    }

    /// Entity kinds this stream receives.
    ///
    /// Not `filter`: `StreamExt::filter` takes precedence on an owned stream.
    pub fn entity_filter(&self) -> &EntityFilter {
        &self.lease.filter
    }

    /// Close the stream. Safe to call more than once.
    pub fn close(&self) {
        self.lease.close();
    }

    pub fn is_closed(&self) -> bool {
        self.lease.is_closed()
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.lease.id)
            .field("filter", &self.lease.filter)
            .field("closed", &self.lease.is_closed())
            .finish()
    }
}

impl Stream for EventStream {
    type Item = OutboundFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.lease.is_closed() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.lease.close();
    }
}
