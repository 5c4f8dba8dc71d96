//! Download queue manager: one running group at a time

use crate::downloader::group::{GroupId, TaskGroup};
use crate::queue::bus::{EventBus, SubscriptionId};
use crate::queue::events::{GroupEvent, GroupListener};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Serializes group execution.
///
/// The head of the queue is the only running group; every other group waits
/// paused. Groups are admitted either at the back (FIFO) or at the front,
/// which pauses the current head and starts the newcomer. A group leaves the
/// queue on `completed`, `stopped` or `failed`, and the next head is started.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    bus: EventBus,
    state: Mutex<QueueState>,
}

/// Subscription held on the bus the group publishes on
struct Subscription {
    bus: EventBus,
    id: SubscriptionId,
}

impl Subscription {
    async fn cancel(self, group: GroupId) {
        self.bus.unsubscribe(group, self.id).await;
    }
}

#[derive(Default)]
struct QueueState {
    groups: VecDeque<TaskGroup>,
    subscriptions: HashMap<GroupId, Subscription>,
}

impl QueueManager {
    /// Create a new queue manager.
    ///
    /// `bus` is the bus handed to groups built for this queue. Admitted
    /// groups are always watched on the bus they publish on.
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                bus,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Add a group to the queue.
    ///
    /// With `at_front` the current head is paused and `group` takes over
    /// immediately; otherwise it is appended and only starts once it reaches
    /// the head. Returns `false` (and leaves the queue untouched) for a group
    /// that has already stopped, completed or failed.
    pub async fn admit(&self, group: TaskGroup, at_front: bool) -> bool {
        let mut state = self.inner.state.lock().await;
        let id = group.id();

        if !state.subscriptions.contains_key(&id) {
            let listener: Arc<dyn GroupListener> = Arc::new(self.clone());
            let bus = group.bus().clone();
            let subscription = bus.subscribe(id, listener).await;
            state.subscriptions.insert(id, Subscription { bus, id: subscription });
        }

        // Checked after subscribing so a terminal event can't slip by unseen
        let phase = group.phase().await;
        if phase.is_terminal() {
            warn!("Refusing to queue group {} in phase {:?}", id, phase);
            if !state.groups.iter().any(|g| g.id() == id) {
                if let Some(subscription) = state.subscriptions.remove(&id) {
                    subscription.cancel(id).await;
                }
            }
            return false;
        }

        let position = state.groups.iter().position(|g| g.id() == id);
        if at_front {
            if position != Some(0) {
                if let Some(head) = state.groups.front() {
                    info!("Group {} preempts running group {}", id, head.id());
                    head.pause().await;
                }
                if let Some(index) = position {
                    state.groups.remove(index);
                }
                state.groups.push_front(group);
            }
        } else if position.is_none() {
            state.groups.push_back(group);
        } else {
            debug!("Group {} already queued", id);
        }

        info!("Queue holds {} group(s)", state.groups.len());
        if let Some(head) = state.groups.front() {
            head.start().await;
        }
        true
    }

    /// Remove a group from the queue and start the next head.
    ///
    /// Always drops the manager's subscription and stops the group, even if
    /// it was not queued. Returns whether the group was in the queue.
    pub async fn evict(&self, group: &TaskGroup) -> bool {
        let mut state = self.inner.state.lock().await;
        self.evict_locked(&mut state, group).await
    }

    /// Cancel every task of `group` and evict it
    pub async fn cancel(&self, group: &TaskGroup) -> bool {
        group.cancel_all().await;
        self.evict(group).await
    }

    /// The group currently allowed to run
    pub async fn running(&self) -> Option<TaskGroup> {
        self.inner.state.lock().await.groups.front().cloned()
    }

    /// Queued group ids, head first
    pub async fn groups(&self) -> Vec<GroupId> {
        self.inner
            .state
            .lock()
            .await
            .groups
            .iter()
            .map(TaskGroup::id)
            .collect()
    }

    /// Look up a queued group
    pub async fn get(&self, id: GroupId) -> Option<TaskGroup> {
        self.inner
            .state
            .lock()
            .await
            .groups
            .iter()
            .find(|g| g.id() == id)
            .cloned()
    }

    pub async fn contains(&self, id: GroupId) -> bool {
        self.get(id).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.groups.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.lock().await.groups.is_empty()
    }

    /// Number of groups the manager is subscribed to
    pub async fn subscription_count(&self) -> usize {
        self.inner.state.lock().await.subscriptions.len()
    }

    async fn evict_locked(&self, state: &mut QueueState, group: &TaskGroup) -> bool {
        let id = group.id();
        if let Some(subscription) = state.subscriptions.remove(&id) {
            subscription.cancel(id).await;
        }

        group.stop().await;

        let before = state.groups.len();
        state.groups.retain(|g| g.id() != id);
        let removed = state.groups.len() != before;
        if removed {
            info!("Evicted group {} ({} left)", id, state.groups.len());
        } else {
            debug!("Group {} was not queued", id);
        }

        if let Some(head) = state.groups.front() {
            head.start().await;
        }
        removed
    }
}

#[async_trait]
impl GroupListener for QueueManager {
    async fn on_event(&self, event: &GroupEvent) {
        if !event.kind.is_terminal() {
            debug!("Group {} {:?}, nothing to do", event.group, event.kind);
            return;
        }

        let mut state = self.inner.state.lock().await;
        let group = state.groups.iter().find(|g| g.id() == event.group).cloned();
        match group {
            Some(group) => {
                debug!("Group {} {:?}, evicting", event.group, event.kind);
                self.evict_locked(&mut state, &group).await;
            }
            None => {
                // Not queued any more; make sure no subscription lingers
                if let Some(subscription) = state.subscriptions.remove(&event.group) {
                    subscription.cancel(event.group).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager").finish_non_exhaustive()
    }
}
