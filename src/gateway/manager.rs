//! Notification gateway: one managed bus subscription per client stream

use super::frame::OutboundFrame;
use super::stats::{ConnectionDiagnostics, ConnectionStats};
use super::stream::{EventStream, OpenStreams, StreamLease};
use crate::events::{EntityFilter, EventBus, Subscription, DEFAULT_CAPACITY};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Floor for timer periods; `tokio::time::interval` rejects zero
pub(crate) const MIN_TICK: Duration = Duration::from_millis(1);

/// Errors returned by [`NotificationGateway::open_stream`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("notification gateway is shutting down")]
    ShuttingDown,
}

/// Tuning knobs for the gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Heartbeat period; keep it below reverse-proxy idle timeouts
    pub heartbeat_interval: Duration,
    /// Period of the diagnostics log line while streams are open
    pub diagnostics_interval: Duration,
    /// Open-stream count above which a warning is logged
    pub warning_threshold: u64,
    /// Bus-side queue per stream
    pub subscriber_queue_capacity: usize,
    /// Frames buffered between the producers and the client writer
    pub outbound_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            diagnostics_interval: Duration::from_secs(30),
            warning_threshold: 50,
            subscriber_queue_capacity: DEFAULT_CAPACITY,
            outbound_buffer: 64,
        }
    }
}

/// Turns streaming requests into managed [`EventBus`] subscriptions.
///
/// Each stream is fed by two producer tasks, a bus forwarder and a heartbeat
/// ticker, writing into one channel. Both stop when the stream's
/// cancellation token fires, which happens on client disconnect, explicit
/// close, or gateway shutdown.
pub struct NotificationGateway {
    bus: EventBus,
    config: GatewayConfig,
    stats: Arc<ConnectionStats>,
    open_streams: Arc<OpenStreams>,
    root: CancellationToken,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl NotificationGateway {
    /// Create a gateway with its own event bus
    pub fn new(config: GatewayConfig) -> Self {
        let bus = EventBus::new(config.subscriber_queue_capacity);
        Self::with_bus(bus, config)
    }

    /// Create a gateway over an existing bus
    pub fn with_bus(bus: EventBus, config: GatewayConfig) -> Self {
        let stats = ConnectionStats::new(config.warning_threshold, config.diagnostics_interval);
        Self {
            bus,
            config,
            stats,
            open_streams: Arc::new(OpenStreams::new()),
            root: CancellationToken::new(),
            next_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// The bus this gateway reads from; publishers emit on it
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Open a new outbound stream for events accepted by `filter`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open_stream(&self, filter: EntityFilter) -> Result<EventStream, GatewayError> {
        if self.is_shutting_down() {
            return Err(GatewayError::ShuttingDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let active = self.stats.record_open();

        let subscription = self.bus.subscribe(filter.clone());
        let token = self.root.child_token();
        let lease = Arc::new(StreamLease::new(
            id,
            subscription.id(),
            filter,
            subscription.opened_at(),
            token,
            self.bus.clone(),
            self.stats.clone(),
            Arc::downgrade(&self.open_streams),
        ));
        self.open_streams.insert(id, lease.clone());

        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        tokio::spawn(forward_events(subscription, tx.clone(), lease.clone()));
        tokio::spawn(send_heartbeats(
            tx,
            lease.clone(),
            self.config.heartbeat_interval,
        ));

        debug!(
            stream = id,
            filter = ?lease.entity_filter().kinds(),
            active,
            "SSE stream opened"
        );

        // shutdown() may have drained the registry between the check above
        // and the insert
        if self.is_shutting_down() {
            lease.close();
        }

        Ok(EventStream::new(ReceiverStream::new(rx), lease))
    }

    /// Close every open stream and the bus. Only the first call has effect.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Notification gateway already shut down");
            return;
        }

        let d = self.stats.snapshot();
        info!(
            active = d.active,
            peak = d.peak,
            opened = d.total_opened,
            closed = d.total_closed,
            "Shutting down notification gateway"
        );
        self.stats.stop_logger();

        // Collect first: closing a lease removes it from the map
        let leases: Vec<Arc<StreamLease>> = self
            .open_streams
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut closed = 0;
        for lease in leases {
            if lease.close() {
                closed += 1;
            }
        }

        self.root.cancel();
        self.bus.close();
        info!(streams_closed = closed, "Notification gateway stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Connection counters; never fails
    pub fn diagnostics(&self) -> ConnectionDiagnostics {
        self.stats.snapshot()
    }

    /// Number of times the open-stream count rose above the warning threshold
    pub fn high_load_warnings(&self) -> u64 {
        self.stats.threshold_warnings()
    }

    pub fn warning_threshold(&self) -> u64 {
        self.stats.warning_threshold()
    }

    pub fn open_stream_count(&self) -> usize {
        self.open_streams.len()
    }

    pub fn diagnostics_logger_running(&self) -> bool {
        self.stats.logger_running()
    }
}

impl Default for NotificationGateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

/// Producer: relay bus events into the outbound channel
async fn forward_events(
    mut subscription: Subscription,
    tx: mpsc::Sender<OutboundFrame>,
    lease: Arc<StreamLease>,
) {
    let token = lease.token().clone();
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            next = subscription.recv() => match next {
                Some(event) => event,
                // Bus closed
                None => break,
            },
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = tx.send(OutboundFrame::DataChange(event)) => {
                if sent.is_err() {
                    // Consumer dropped
                    break;
                }
            }
        }
    }

    subscription.cancel();
    lease.close();
}

/// Producer: emit a heartbeat frame every `every`, first one after a full period
async fn send_heartbeats(
    tx: mpsc::Sender<OutboundFrame>,
    lease: Arc<StreamLease>,
    every: Duration,
) {
    let token = lease.token().clone();
    let mut ticker = tokio::time::interval(every.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = token.cancelled() => break,
            sent = tx.send(OutboundFrame::heartbeat()) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    lease.close();
    debug!(stream = lease.id(), "Heartbeat producer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeKind, EntityKind, EventEmitter};
    use crate::test_helpers::{fast_gateway_config, next_change, next_frame};
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_filtered_stream_skips_other_kinds() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let mut stream = gateway
            .open_stream(EntityFilter::only([EntityKind::Attendance]))
            .unwrap();

        gateway
            .bus()
            .emit_created(EntityKind::Schedule, "s1", json!({"room": "A"}), None);

        assert!(next_change(&mut stream, Duration::from_millis(200))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_matching_event_is_delivered() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let mut stream = gateway
            .open_stream(EntityFilter::only([EntityKind::Attendance]))
            .unwrap();

        gateway.bus().emit_created(
            EntityKind::Attendance,
            "a1",
            json!({"status": "PRESENT"}),
            None,
        );

        let event = next_change(&mut stream, Duration::from_secs(1))
            .await
            .expect("attendance event");
        assert_eq!(event.change_kind(), ChangeKind::Created);
        assert_eq!(event.entity_kind(), EntityKind::Attendance);
        assert_eq!(event.entity_id(), "a1");
        assert_eq!(event.payload(), Some(&json!({"status": "PRESENT"})));
    }

    #[tokio::test]
    async fn test_fan_out_to_every_unfiltered_stream() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let mut first = gateway.open_stream(EntityFilter::all()).unwrap();
        let mut second = gateway.open_stream(EntityFilter::all()).unwrap();

        gateway.bus().emit_deleted(EntityKind::Client, "c1", None);

        for stream in [&mut first, &mut second] {
            let event = next_change(stream, Duration::from_secs(1))
                .await
                .expect("deleted event");
            assert_eq!(event.change_kind(), ChangeKind::Deleted);
            assert_eq!(event.entity_id(), "c1");
            assert!(event.payload().is_none());
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let mut stream = gateway.open_stream(EntityFilter::all()).unwrap();

        for i in 0..20 {
            gateway.bus().emit_updated(
                EntityKind::Invoice,
                &format!("inv-{}", i),
                json!({"rev": i}),
                None,
            );
        }

        for i in 0..20 {
            let event = next_change(&mut stream, Duration::from_secs(1))
                .await
                .expect("invoice event");
            assert_eq!(event.entity_id(), format!("inv-{}", i));
        }
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_stream() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        gateway.bus().emit_deleted(EntityKind::Payment, "p-old", None);

        let mut stream = gateway.open_stream(EntityFilter::all()).unwrap();
        gateway.bus().emit_deleted(EntityKind::Payment, "p-new", None);

        let event = next_change(&mut stream, Duration::from_secs(1))
            .await
            .expect("new event");
        assert_eq!(event.entity_id(), "p-new");
    }

    #[tokio::test]
    async fn test_close_updates_counters_once() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let before = gateway.diagnostics();

        let stream = gateway.open_stream(EntityFilter::all()).unwrap();
        assert_eq!(gateway.diagnostics().active, before.active + 1);
        assert_eq!(gateway.bus().subscriber_count(), 1);

        stream.close();
        stream.close();
        drop(stream);

        let after = gateway.diagnostics();
        assert_eq!(after.active, before.active);
        assert_eq!(after.total_closed, before.total_closed + 1);
        assert_eq!(after.active, after.total_opened - after.total_closed);
        assert!(after.peak >= after.active);
        assert_eq!(gateway.bus().subscriber_count(), 0);
        assert_eq!(gateway.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_stream_yields_nothing() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let mut stream = gateway.open_stream(EntityFilter::all()).unwrap();
        stream.close();
        gateway.bus().emit_deleted(EntityKind::Group, "g1", None);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_on_idle_stream() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let mut stream = gateway.open_stream(EntityFilter::all()).unwrap();

        let interval = fast_gateway_config().heartbeat_interval;
        let frame = next_frame(&mut stream, interval + Duration::from_millis(500))
            .await
            .expect("heartbeat within one interval");
        assert!(frame.is_heartbeat());
    }

    #[tokio::test]
    async fn test_warning_threshold_observable() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let mut streams = Vec::new();
        for _ in 0..50 {
            streams.push(gateway.open_stream(EntityFilter::all()).unwrap());
        }
        assert_eq!(gateway.high_load_warnings(), 0);

        streams.push(gateway.open_stream(EntityFilter::all()).unwrap());
        assert_eq!(gateway.diagnostics().active, 51);
        assert_eq!(gateway.high_load_warnings(), 1);
    }

    #[tokio::test]
    async fn test_diagnostics_logger_follows_active_streams() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        assert!(!gateway.diagnostics_logger_running());

        let a = gateway.open_stream(EntityFilter::all()).unwrap();
        let b = gateway.open_stream(EntityFilter::all()).unwrap();
        assert!(gateway.diagnostics_logger_running());

        drop(a);
        assert!(gateway.diagnostics_logger_running());
        drop(b);
        assert!(!gateway.diagnostics_logger_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_open_close_with_shutdown_keeps_counters_consistent() {
        let gateway = Arc::new(NotificationGateway::new(fast_gateway_config()));

        let mut workers = Vec::new();
        for worker in 0..16 {
            let gateway = gateway.clone();
            workers.push(tokio::spawn(async move {
                let mut held = Vec::new();
                for round in 0..50 {
                    match gateway.open_stream(EntityFilter::all()) {
                        Ok(stream) if (worker + round) % 3 == 0 => held.push(stream),
                        Ok(stream) => drop(stream),
                        Err(GatewayError::ShuttingDown) => break,
                    }
                    if round % 10 == 0 {
                        held.clear();
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }

        let closer = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                gateway.shutdown();
            })
        };

        for worker in workers {
            worker.await.unwrap();
        }
        closer.await.unwrap();

        let d = gateway.diagnostics();
        assert_eq!(d.active, 0);
        assert_eq!(d.active, d.total_opened - d.total_closed);
        assert!(d.peak <= d.total_opened);
        assert_eq!(gateway.open_stream_count(), 0);
        assert_eq!(gateway.bus().subscriber_count(), 0);
        assert!(!gateway.diagnostics_logger_running());
    }

    #[tokio::test]
    async fn test_shutdown_drains_all_streams() {
        let gateway = NotificationGateway::new(fast_gateway_config());
        let mut streams: Vec<EventStream> = (0..3)
            .map(|_| gateway.open_stream(EntityFilter::all()).unwrap())
            .collect();
        assert_eq!(gateway.diagnostics().active, 3);

        gateway.shutdown();

        assert_eq!(gateway.diagnostics().active, 0);
        assert_eq!(gateway.diagnostics().total_closed, 3);
        assert!(!gateway.diagnostics_logger_running());
        for stream in streams.iter_mut() {
            assert!(stream.is_closed());
            assert!(stream.next().await.is_none());
        }

        // Publishing afterwards is harmless and reaches nobody
        assert_eq!(
            gateway
                .bus()
                .publish(crate::events::ChangeEvent::deleted(EntityKind::Client, "c9").unwrap()),
            0
        );
        assert_eq!(gateway.bus().subscriber_count(), 0);
        assert_eq!(
            gateway.open_stream(EntityFilter::all()).unwrap_err(),
            GatewayError::ShuttingDown
        );

        // Second call is a no-op
        gateway.shutdown();
        assert_eq!(gateway.diagnostics().total_closed, 3);

        // Dropping already-closed streams does not count again
        drop(streams);
        assert_eq!(gateway.diagnostics().total_closed, 3);
    }
}
