//! A single cancellable transfer

use crate::fetch::traits::{validate_status, FetchResponse, Fetcher};
use crate::utils::error::TransferError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome handed to a task's completion callback
pub type TaskResult = Result<Arc<DownloadTask>, TransferError>;

/// Called exactly once when the task finishes
pub type TaskCompletion = Box<dyn FnOnce(TaskResult) + Send + 'static>;

/// Task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Executing,
    /// Cancelled before it was run; `run()` will finish it without a transfer
    Cancelled,
    Finished,
}

impl TaskState {
    fn as_u8(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Executing => 1,
            TaskState::Cancelled => 2,
            TaskState::Finished => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Executing,
            2 => TaskState::Cancelled,
            _ => TaskState::Finished,
        }
    }
}

/// One fetch-resource-to-destination unit of work
pub struct DownloadTask {
    id: TaskId,
    source: String,
    destination: PathBuf,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    /// Abort handle of the in-flight transfer, only set while executing
    transfer: Mutex<Option<AbortHandle>>,
    error: OnceLock<TransferError>,
    completion: Mutex<Option<TaskCompletion>>,
}

impl DownloadTask {
    /// Create a new download task
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            id: TaskId::new(),
            source: source.into(),
            destination: destination.into(),
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            cancel_requested: AtomicBool::new(false),
            transfer: Mutex::new(None),
            error: OnceLock::new(),
            completion: Mutex::new(None),
        }
    }

    /// Attach the completion callback
    pub fn with_completion<F>(self, completion: F) -> Self
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        *self.completion.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(completion));
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// Terminal error, set once the task has failed
    pub fn error(&self) -> Option<&TransferError> {
        self.error.get()
    }

    /// Request cancellation.
    ///
    /// A pending task moves to `Cancelled` and finishes without a transfer
    /// when run; an executing one has its transfer aborted and finishes
    /// through the normal completion path.
    pub fn cancel(&self) {
        if self.is_finished() {
            debug!("Task {} already finished, ignoring cancel", self.id);
            return;
        }

        self.cancel_requested.store(true, Ordering::SeqCst);
        let _ = self.state.compare_exchange(
            TaskState::Pending.as_u8(),
            TaskState::Cancelled.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        let slot = self.transfer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.as_ref() {
            handle.abort();
        }
    }

    /// Run the transfer to completion and fire the completion callback.
    ///
    /// Returns `false` if the task had already been run.
    pub async fn run(
        self: &Arc<Self>,
        fetcher: Arc<dyn Fetcher>,
        timeout: Option<Duration>,
    ) -> bool {
        if !self.claim() {
            debug!("Task {} already ran ({:?})", self.id, self.state());
            return false;
        }

        if self.is_cancelled() {
            debug!("Task {} cancelled before its transfer started", self.id);
            self.finish(Err(TransferError::Cancelled));
            return true;
        }

        let source = self.source.clone();
        let destination = self.destination.clone();
        let mut handle =
            tokio::spawn(async move { fetcher.fetch(&source, &destination).await });

        {
            let mut slot = self.transfer.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(handle.abort_handle());
            if self.is_cancelled() {
                handle.abort();
            }
        }

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    self.clear_transfer();
                    warn!("Task {} timed out after {:?}", self.id, limit);
                    self.finish(Err(TransferError::TimedOut(limit)));
                    return true;
                }
            },
            None => (&mut handle).await,
        };
        self.clear_transfer();

        let result = match joined {
            Ok(Ok(response)) if validate_status(response.status) => Ok(response),
            Ok(Ok(response)) => Err(TransferError::InvalidResponse {
                status: response.status,
            }),
            Ok(Err(e)) => Err(e),
            Err(join_err) if join_err.is_cancelled() => Err(TransferError::Cancelled),
            Err(join_err) => Err(TransferError::Aborted(join_err.to_string())),
        };

        self.finish(result);
        true
    }

    /// Cancel a task that no runner will pick up and finish it on the spot.
    ///
    /// Returns `false` if the task was already claimed by `run()` or finished.
    pub(crate) fn cancel_unstarted(self: &Arc<Self>) -> bool {
        if !self.claim() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        debug!("Task {} cancelled without being run", self.id);
        self.finish(Err(TransferError::Cancelled));
        true
    }

    /// Move a task that has not run yet to `Executing`; only one caller wins
    fn claim(&self) -> bool {
        [TaskState::Pending, TaskState::Cancelled].into_iter().any(|from| {
            self.state
                .compare_exchange(
                    from.as_u8(),
                    TaskState::Executing.as_u8(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        })
    }

    fn clear_transfer(&self) {
        self.transfer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn finish(self: &Arc<Self>, result: Result<FetchResponse, TransferError>) {
        let outcome = match result {
            Ok(response) => {
                debug!("Task {} finished ({} bytes)", self.id, response.bytes);
                Ok(Arc::clone(self))
            }
            Err(e) => {
                if !e.is_cancelled() {
                    warn!("Task {} failed: {}", self.id, e);
                }
                let _ = self.error.set(e.clone());
                Err(e)
            }
        };

        self.state
            .store(TaskState::Finished.as_u8(), Ordering::SeqCst);

        let completion = self
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(completion) = completion {
            completion(outcome);
        }
    }
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("state", &self.state())
            .field("error", &self.error())
            .finish()
    }
}
