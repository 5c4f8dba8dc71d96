//! Serialized delivery of group lifecycle events
//!
//! Every event a group emits goes through a single dispatcher task: first to
//! the emitting group's delegate, then to the listeners subscribed to that
//! group, then onto the broadcast channel returned by [`EventBus::watch`].
//! Delivery is strictly in emission order and never re-entrant with the
//! control call that produced the event.

use crate::downloader::group::GroupId;
use crate::queue::events::{GroupEvent, GroupListener};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, trace, warn};

const BROADCAST_CAPACITY: usize = 256;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscribers = HashMap<GroupId, Vec<(SubscriptionId, Arc<dyn GroupListener>)>>;

struct Envelope {
    event: GroupEvent,
    delegate: Option<Arc<dyn GroupListener>>,
}

struct BusInner {
    tx: mpsc::UnboundedSender<Envelope>,
    subscribers: Arc<Mutex<Subscribers>>,
    broadcast: broadcast::Sender<GroupEvent>,
    next_subscription: AtomicU64,
}

/// Process-wide event channel, scoped per group
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create the bus and spawn its dispatcher on the current runtime
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        let subscribers = Arc::new(Mutex::new(Subscribers::new()));

        tokio::spawn(dispatch(rx, Arc::clone(&subscribers), broadcast.clone()));

        Self {
            inner: Arc::new(BusInner {
                tx,
                subscribers,
                broadcast,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Register `listener` for events emitted by `group`
    pub async fn subscribe(&self, group: GroupId, listener: Arc<dyn GroupListener>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.entry(group).or_default().push((id, listener));
        debug!("Subscription {:?} added for group {}", id, group);
        id
    }

    /// Drop a subscription. Events still queued for the group are not
    /// delivered to it afterwards.
    pub async fn unsubscribe(&self, group: GroupId, subscription: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.lock().await;
        let Some(listeners) = subscribers.get_mut(&group) else {
            return false;
        };

        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            subscribers.remove(&group);
        }
        if removed {
            debug!("Subscription {:?} removed for group {}", subscription, group);
        }
        removed
    }

    /// Number of live subscriptions for `group`
    pub async fn subscriber_count(&self, group: GroupId) -> usize {
        self.inner
            .subscribers
            .lock()
            .await
            .get(&group)
            .map_or(0, Vec::len)
    }

    /// Observe every event after its scoped listeners have handled it
    pub fn watch(&self) -> broadcast::Receiver<GroupEvent> {
        self.inner.broadcast.subscribe()
    }

    /// Queue an event for delivery. Never blocks.
    pub(crate) fn publish(&self, event: GroupEvent, delegate: Option<Arc<dyn GroupListener>>) {
        trace!("Publishing {} for group {}", event.channel_name(), event.group);
        if self.inner.tx.send(Envelope { event, delegate }).is_err() {
            warn!("Event dispatcher is gone, dropping event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("watchers", &self.inner.broadcast.receiver_count())
            .finish()
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    subscribers: Arc<Mutex<Subscribers>>,
    broadcast: broadcast::Sender<GroupEvent>,
) {
    while let Some(Envelope { event, delegate }) = rx.recv().await {
        if let Some(delegate) = delegate {
            delegate.on_event(&event).await;
        }

        // Snapshot so listeners may (un)subscribe while handling the event
        let listeners: Vec<Arc<dyn GroupListener>> = subscribers
            .lock()
            .await
            .get(&event.group)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in listeners {
            listener.on_event(&event).await;
        }

        // No receivers is fine
        let _ = broadcast.send(event);
    }
    debug!("Event dispatcher stopped");
}
