//! Bounded-concurrency batch of download tasks
//!
//! A group dispatches its tasks in submission order, never running more of
//! them at once than its current tier allows. Dispatch happens only while the
//! group is running; `pause()` and `stop()` hold back tasks that have not
//! started yet but let in-flight transfers drain. When the last task finishes
//! the group emits `completed`, exactly once.

use crate::downloader::speed::{SpeedTier, TierLimits};
use crate::downloader::task::DownloadTask;
use crate::fetch::traits::Fetcher;
use crate::queue::bus::EventBus;
use crate::queue::events::{GroupEvent, GroupEventKind, GroupListener};
use crate::utils::config::AppSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Group identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Group lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupPhase {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl GroupPhase {
    /// Phases a group never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GroupPhase::Stopped | GroupPhase::Completed | GroupPhase::Failed
        )
    }
}

/// Per-group tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupOptions {
    /// Tier the group starts on
    pub tier: SpeedTier,
    pub limits: TierLimits,
    /// Abort a single transfer after this long
    pub transfer_timeout: Option<Duration>,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            tier: SpeedTier::Low,
            limits: TierLimits::default(),
            transfer_timeout: None,
        }
    }
}

impl From<&AppSettings> for GroupOptions {
    fn from(settings: &AppSettings) -> Self {
        Self {
            tier: settings.default_tier,
            limits: settings.tier_limits(),
            transfer_timeout: settings.transfer_timeout(),
        }
    }
}

struct GroupState {
    running: bool,
    phase: GroupPhase,
    tier: SpeedTier,
    started_once: bool,
    /// Index of the next task to dispatch
    next: usize,
    executing: usize,
}

struct GroupShared {
    id: GroupId,
    tasks: Vec<Arc<DownloadTask>>,
    fetcher: Arc<dyn Fetcher>,
    bus: EventBus,
    delegate: Option<Arc<dyn GroupListener>>,
    limits: TierLimits,
    transfer_timeout: Option<Duration>,
    state: Mutex<GroupState>,
    /// Tasks that have not finished yet
    remaining: AtomicUsize,
    completed: AtomicBool,
}

/// A batch of tasks run under one concurrency cap
///
/// Cloning yields another handle to the same group.
#[derive(Clone)]
pub struct TaskGroup {
    shared: Arc<GroupShared>,
}

impl TaskGroup {
    /// Create an idle group. Nothing is dispatched until `start()`.
    pub fn new(
        delegate: Option<Arc<dyn GroupListener>>,
        tasks: Vec<DownloadTask>,
        fetcher: Arc<dyn Fetcher>,
        bus: EventBus,
        options: GroupOptions,
    ) -> Self {
        let tasks: Vec<Arc<DownloadTask>> = tasks.into_iter().map(Arc::new).collect();
        let remaining = tasks.len();

        Self {
            shared: Arc::new(GroupShared {
                id: GroupId::new(),
                tasks,
                fetcher,
                bus,
                delegate,
                limits: options.limits.sanitized(),
                transfer_timeout: options.transfer_timeout,
                state: Mutex::new(GroupState {
                    running: false,
                    phase: GroupPhase::Idle,
                    tier: options.tier,
                    started_once: false,
                    next: 0,
                    executing: 0,
                }),
                remaining: AtomicUsize::new(remaining),
                completed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> GroupId {
        self.shared.id
    }

    /// Bus the group publishes its lifecycle events on
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Tasks in submission order
    pub fn tasks(&self) -> &[Arc<DownloadTask>] {
        &self.shared.tasks
    }

    pub fn len(&self) -> usize {
        self.shared.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.tasks.is_empty()
    }

    /// Tasks that have not finished yet
    pub fn remaining(&self) -> usize {
        self.shared.remaining.load(Ordering::SeqCst)
    }

    pub fn has_completed(&self) -> bool {
        self.shared.completed.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        self.shared.state.lock().await.running
    }

    pub async fn phase(&self) -> GroupPhase {
        self.shared.state.lock().await.phase
    }

    pub async fn tier(&self) -> SpeedTier {
        self.shared.state.lock().await.tier
    }

    /// Cap that applies to the next dispatch
    pub async fn concurrency_limit(&self) -> usize {
        let tier = self.shared.state.lock().await.tier;
        self.shared.limits.limit(tier)
    }

    /// Tasks currently dispatched and not yet finished
    pub async fn executing(&self) -> usize {
        self.shared.state.lock().await.executing
    }

    /// Begin or resume dispatching
    pub async fn start(&self) {
        let mut state = self.shared.state.lock().await;
        if state.running {
            debug!("Group {} already running", self.id());
            return;
        }
        if state.phase.is_terminal() {
            debug!("Group {} is {:?}, not restarting", self.id(), state.phase);
            return;
        }

        state.running = true;
        state.phase = GroupPhase::Running;
        state.started_once = true;
        info!("Starting group {} ({} tasks left)", self.id(), self.remaining());
        self.emit(GroupEventKind::Started);

        if self.remaining() == 0 {
            self.complete(&mut state);
        } else {
            self.dispatch(&mut state);
        }
    }

    /// Suspend dispatch and report the group as done. Also ends a paused group.
    ///
    /// A group that was never started stays `Idle` and emits no `stopped`.
    pub async fn stop(&self) {
        self.suspend(GroupPhase::Stopped, GroupEventKind::Stopped).await;
    }

    /// Suspend dispatch, expecting a later `start()`
    pub async fn pause(&self) {
        self.suspend(GroupPhase::Paused, GroupEventKind::Paused).await;
    }

    /// Suspend dispatch and report the group as failed
    pub async fn fail(&self) {
        let mut state = self.shared.state.lock().await;
        if state.phase.is_terminal() {
            debug!("Group {} is {:?}, ignoring fail", self.id(), state.phase);
            return;
        }

        state.running = false;
        state.phase = GroupPhase::Failed;
        info!("Group {} failed", self.id());
        self.emit(GroupEventKind::Failed);
    }

    /// Switch to the low tier. Running transfers above the new cap are left alone.
    pub async fn throttle(&self) {
        self.set_tier(SpeedTier::Low).await;
    }

    /// Switch to the high tier
    pub async fn boost(&self) {
        self.set_tier(SpeedTier::High).await;
    }

    /// Cancel every task in the group.
    ///
    /// In-flight transfers are aborted and report `Cancelled` from their
    /// worker. Tasks not dispatched yet are never dispatched; they finish
    /// with `Cancelled` before this returns.
    pub async fn cancel_all(&self) {
        let mut state = self.shared.state.lock().await;
        let dispatched = state.next;
        state.next = self.shared.tasks.len();
        info!(
            "Cancelling group {} ({} in flight, {} not started)",
            self.id(),
            state.executing,
            self.shared.tasks.len() - dispatched
        );

        for task in &self.shared.tasks[..dispatched] {
            task.cancel();
        }

        let unstarted = self.shared.tasks[dispatched..]
            .iter()
            .filter(|task| task.cancel_unstarted())
            .count();
        if unstarted == 0 {
            return;
        }

        let before = self.shared.remaining.fetch_sub(unstarted, Ordering::SeqCst);
        if before == unstarted {
            self.complete(&mut state);
        }
    }

    async fn suspend(&self, phase: GroupPhase, kind: GroupEventKind) {
        let mut state = self.shared.state.lock().await;
        // A paused group may still be stopped for good
        let stopping_paused = phase == GroupPhase::Stopped && state.phase == GroupPhase::Paused;
        if !state.running && !stopping_paused {
            debug!("Group {} not running, ignoring {:?}", self.id(), kind);
            return;
        }

        state.running = false;
        state.phase = phase;
        info!("Group {} {:?} ({} in flight)", self.id(), phase, state.executing);
        self.emit(kind);
    }

    async fn set_tier(&self, tier: SpeedTier) {
        let mut state = self.shared.state.lock().await;
        if state.tier == tier {
            return;
        }
        state.tier = tier;
        info!(
            "Group {} switched to {} tier ({} parallel)",
            self.id(),
            tier.as_str(),
            self.shared.limits.limit(tier)
        );
        self.dispatch(&mut state);
    }

    /// Start pending tasks until the cap is reached
    fn dispatch(&self, state: &mut GroupState) {
        if !state.running {
            return;
        }

        let limit = self.shared.limits.limit(state.tier);
        while state.executing < limit && state.next < self.shared.tasks.len() {
            let task = Arc::clone(&self.shared.tasks[state.next]);
            state.next += 1;
            state.executing += 1;
            debug!(
                "Group {} dispatching task {} ({}/{})",
                self.id(),
                task.id(),
                state.executing,
                limit
            );

            let group = self.clone();
            tokio::spawn(async move {
                task.run(Arc::clone(&group.shared.fetcher), group.shared.transfer_timeout)
                    .await;
                group.task_finished().await;
            });
        }
    }

    async fn task_finished(&self) {
        let mut state = self.shared.state.lock().await;
        state.executing -= 1;

        let before = self.shared.remaining.fetch_sub(1, Ordering::SeqCst);
        if before == 1 {
            self.complete(&mut state);
        } else {
            self.dispatch(&mut state);
        }
    }

    /// Fire `completed` the first time the group drains, if it was ever started
    fn complete(&self, state: &mut GroupState) {
        if !state.started_once {
            return;
        }
        if self
            .shared
            .completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        state.running = false;
        if !state.phase.is_terminal() {
            state.phase = GroupPhase::Completed;
        }
        info!("Group {} completed", self.id());
        self.emit(GroupEventKind::Completed);
    }

    /// Single emission point: delegate, subscribers and broadcast all fan out from here
    fn emit(&self, kind: GroupEventKind) {
        self.shared
            .bus
            .publish(GroupEvent::new(self.id(), kind), self.shared.delegate.clone());
    }
}

impl PartialEq for TaskGroup {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TaskGroup {}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("id", &self.id())
            .field("tasks", &self.len())
            .field("remaining", &self.remaining())
            .finish()
    }
}
