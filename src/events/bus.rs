//! Event bus for fanning change events out to stream subscribers

use super::filter::EntityFilter;
use super::types::{ChangeEvent, EventEmitter};
use chrono::{DateTime, Utc};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Default per-subscriber delivery queue capacity
pub const DEFAULT_CAPACITY: usize = 1024;

struct Slot {
    filter: EntityFilter,
    tx: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    slots: HashMap<u64, Slot>,
    closed: bool,
}

struct Shared {
    registry: Mutex<Registry>,
    capacity: usize,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process publish/subscribe hub for [`ChangeEvent`]s.
///
/// Every subscriber owns a bounded delivery queue. `publish` walks the
/// registry under a single lock, so each subscriber observes events in the
/// order `publish` was called. Publishing never blocks and never fails: a
/// full queue drops the event for that subscriber only, and a queue whose
/// receiver is gone is unregistered.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Subscribe to events whose kind passes `filter`.
    ///
    /// Only events published after this call are delivered. On a closed bus
    /// the returned subscription is already terminated.
    pub fn subscribe(&self, filter: EntityFilter) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.capacity);
        let mut registry = self.shared.registry();
        registry.next_id += 1;
        let id = registry.next_id;

        if registry.closed {
            debug!(subscription = id, "Subscribe on closed event bus");
            drop(tx);
        } else {
            registry.slots.insert(id, Slot { filter, tx });
        }

        Subscription {
            id,
            opened_at: Utc::now(),
            rx,
            bus: Arc::downgrade(&self.shared),
            cancelled: false,
        }
    }

    /// Hand `event` to every subscriber whose filter accepts its kind.
    ///
    /// Returns the number of subscribers that accepted it into their queue.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut registry = self.shared.registry();
        if registry.closed {
            debug!(
                entity = %event.entity_kind(),
                entity_id = event.entity_id(),
                "Event bus closed, dropping event"
            );
            return 0;
        }

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, slot) in registry.slots.iter() {
            if !slot.filter.accepts(event.entity_kind()) {
                continue;
            }
            match slot.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscription = id,
                        entity = %event.entity_kind(),
                        entity_id = event.entity_id(),
                        "Subscriber queue full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            registry.slots.remove(&id);
        }

        debug!(
            entity = %event.entity_kind(),
            change = ?event.change_kind(),
            entity_id = event.entity_id(),
            subscribers = delivered,
            "ChangeEvent published"
        );
        delivered
    }

    /// Stop accepting events and terminate every live subscription
    pub fn close(&self) {
        let mut registry = self.shared.registry();
        if registry.closed {
            return;
        }
        registry.closed = true;
        let dropped = registry.slots.len();
        registry.slots.clear();
        debug!(subscriptions = dropped, "Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry().closed
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.shared.registry().slots.len()
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.shared.registry().slots.remove(&id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: ChangeEvent) {
        self.publish(event);
    }
}

/// A cancellable, non-restartable stream of events from an [`EventBus`].
///
/// Dropping the subscription cancels it.
pub struct Subscription {
    id: u64,
    opened_at: DateTime<Utc>,
    rx: mpsc::Receiver<ChangeEvent>,
    bus: Weak<Shared>,
    cancelled: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Wait for the next event; `None` once cancelled or the bus is closed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        if self.cancelled {
            return None;
        }
        self.rx.recv().await
    }

    /// Unregister from the bus. Safe to call more than once.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.rx.close();
        if let Some(shared) = self.bus.upgrade() {
            shared.registry().slots.remove(&self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
