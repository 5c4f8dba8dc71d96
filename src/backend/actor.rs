use super::messages::{BackendCommand, BackendEvent, TransferSpec};
use crate::downloader::{DownloadTask, GroupId, GroupOptions, SpeedTier, TaskGroup, TaskResult};
use crate::fetch::Fetcher;
use crate::queue::{EventBus, QueueManager};
use crate::utils::config::AppSettings;
use crate::utils::error::BatchloaderError;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Owns the queue and turns front-end commands into queue operations
pub struct BackendActor {
    receiver: mpsc::Receiver<BackendCommand>,
    sender: mpsc::UnboundedSender<BackendEvent>,

    // Components
    settings: AppSettings,
    fetcher: Arc<dyn Fetcher>,
    queue_manager: QueueManager,
}

impl BackendActor {
    pub fn new(
        settings: AppSettings,
        fetcher: Arc<dyn Fetcher>,
        bus: EventBus,
        receiver: mpsc::Receiver<BackendCommand>,
        sender: mpsc::UnboundedSender<BackendEvent>,
    ) -> Self {
        Self {
            receiver,
            sender,
            settings,
            fetcher,
            queue_manager: QueueManager::new(bus),
        }
    }

    pub fn queue_manager(&self) -> &QueueManager {
        &self.queue_manager
    }

    pub async fn run(mut self) {
        info!("BackendActor started");

        // Forward every lifecycle event to the front end
        let mut events = self.queue_manager.bus().watch();
        let sender_events = self.sender.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if sender_events.send(BackendEvent::Group(event)).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} lifecycle events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                BackendCommand::Submit {
                    transfers,
                    priority,
                    tier,
                } => {
                    if let Err(e) = self.handle_submit(transfers, priority, tier).await {
                        error!("Submit failed: {}", e);
                        let _ = self.sender.send(BackendEvent::Error(e.to_string()));
                    }
                }
                BackendCommand::Cancel(id) => {
                    if let Some(group) = self.find(id).await {
                        self.queue_manager.cancel(&group).await;
                    }
                }
                BackendCommand::Boost(id) => {
                    if let Some(group) = self.find(id).await {
                        group.boost().await;
                    }
                }
                BackendCommand::Throttle(id) => {
                    if let Some(group) = self.find(id).await {
                        group.throttle().await;
                    }
                }
                BackendCommand::Shutdown => {
                    info!("BackendActor shutting down");
                    break;
                }
            }
        }

        forwarder.abort();
    }

    async fn handle_submit(
        &self,
        transfers: Vec<TransferSpec>,
        priority: bool,
        tier: Option<SpeedTier>,
    ) -> Result<GroupId, BatchloaderError> {
        if transfers.is_empty() {
            return Err(BatchloaderError::OperationFailed(
                "Refusing to queue an empty batch".to_string(),
            ));
        }

        // Filled in once the group exists
        let group_cell: Arc<OnceLock<GroupId>> = Arc::new(OnceLock::new());
        let tasks: Vec<DownloadTask> = transfers
            .into_iter()
            .map(|spec| {
                let sender = self.sender.clone();
                let group_cell = Arc::clone(&group_cell);
                let source = spec.source.clone();
                let task = DownloadTask::new(spec.source, spec.destination);
                let task_id = task.id();
                task.with_completion(move |result: TaskResult| {
                    let Some(group) = group_cell.get().copied() else {
                        return;
                    };
                    let _ = sender.send(BackendEvent::TaskFinished {
                        group,
                        task: task_id,
                        source,
                        error: result.err(),
                    });
                })
            })
            .collect();

        let mut options = GroupOptions::from(&self.settings);
        if let Some(tier) = tier {
            options.tier = tier;
        }

        let group = TaskGroup::new(
            None,
            tasks,
            Arc::clone(&self.fetcher),
            self.queue_manager.bus().clone(),
            options,
        );
        let id = group.id();
        let _ = group_cell.set(id);

        let _ = self.sender.send(BackendEvent::GroupAdmitted {
            group: id,
            tasks: group.len(),
            priority,
        });

        if !self.queue_manager.admit(group, priority).await {
            return Err(BatchloaderError::OperationFailed(format!(
                "Group {id} could not be queued"
            )));
        }
        Ok(id)
    }

    async fn find(&self, id: GroupId) -> Option<TaskGroup> {
        let group = self.queue_manager.get(id).await;
        if group.is_none() {
            let err = BatchloaderError::GroupNotFound(id.to_string());
            warn!("{}", err);
            let _ = self.sender.send(BackendEvent::Error(err.to_string()));
        }
        group
    }
}
