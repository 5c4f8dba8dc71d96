//! Front-end tally of one submitted batch

use super::messages::BackendEvent;
use crate::downloader::GroupId;
use crate::queue::GroupEventKind;

/// Per-task results of the group a front end submitted.
///
/// A batch is done once every task has reported, whether the group ran to
/// completion or was cancelled.
#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    group: Option<GroupId>,
    expected: usize,
    succeeded: usize,
    failed: usize,
    outcome: Option<GroupEventKind>,
    interrupted: bool,
}

impl BatchSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one backend event. Events of other groups are ignored.
    pub fn record(&mut self, event: &BackendEvent) {
        match event {
            BackendEvent::GroupAdmitted { group, tasks, .. } if self.group.is_none() => {
                self.group = Some(*group);
                self.expected = *tasks;
            }
            BackendEvent::TaskFinished { group, error, .. } if self.is_mine(*group) => {
                if error.is_some() {
                    self.failed += 1;
                } else {
                    self.succeeded += 1;
                }
            }
            BackendEvent::Group(event) if self.is_mine(event.group) => {
                if event.kind.is_terminal() && self.outcome.is_none() {
                    self.outcome = Some(event.kind);
                }
            }
            _ => {}
        }
    }

    /// Note that the user asked to cancel the batch
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// First terminal event seen for the group
    pub fn outcome(&self) -> Option<GroupEventKind> {
        self.outcome
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Every task of the batch has reported
    pub fn is_done(&self) -> bool {
        self.group.is_some() && self.succeeded + self.failed >= self.expected
    }

    /// 1 if any task failed or the batch was interrupted
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 || self.interrupted {
            1
        } else {
            0
        }
    }

    fn is_mine(&self, group: GroupId) -> bool {
        self.group == Some(group)
    }
}
