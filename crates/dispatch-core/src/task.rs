//! The task record and its lifecycle.

use serde::{Deserialize, Serialize};

/// The lifecycle states a task passes through. Transitions are acyclic: a
/// task reaches exactly one of the three terminal states and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Admitted, waiting for a capacity slot.
    Queued,
    /// Holding a capacity slot; the worker pipeline is active.
    Running,
    /// Terminal: the worker succeeded and any sensitive files were handled.
    Completed,
    /// Terminal: the worker failed, timed out, or the pipeline errored.
    Failed,
    /// Terminal: cancelled by the caller or the guard found an all-sensitive diff.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status has left `running` for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal transition from `self` per the status graph
    /// `queued -> running -> {completed | failed | cancelled}`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
                // queued -> cancelled covers cancel() racing admission before a
                // slot is granted.
                | (Self::Queued, Self::Cancelled)
        )
    }
}

/// Opaque handle to a provisioned workspace, returned by the workspace
/// manager on allocation. Absent on a task in any terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceHandle(pub String);

impl WorkspaceHandle {
    /// Borrow the opaque handle value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A task's full record, as held by the dispatcher for the task's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Caller-supplied identifier, unique among currently-live tasks.
    pub task_id: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Opaque tag forwarded to the worker runner.
    pub worker_type: String,
    /// Opaque payload forwarded to the worker on stdin or argv.
    pub prompt: String,
    /// Absolute URL the terminal and progress callbacks are POSTed to.
    pub callback_url: String,
    /// Per-task shared secret used to sign outbound callbacks. Never
    /// serialized back out to a caller after admission.
    #[serde(skip_serializing)]
    pub callback_secret: String,
    /// Epoch seconds at submission.
    pub created_at: u64,
    /// Epoch seconds at slot grant (not at submission).
    pub started_at: Option<u64>,
    /// Epoch seconds at terminal transition.
    pub ended_at: Option<u64>,
    /// Workspace handle while the task holds one; absent in terminal states.
    pub workspace_handle: Option<WorkspaceHandle>,
    /// Set once `cancel` has been accepted for this task.
    pub cancellation_requested: bool,
    /// Next sequence number to assign to an outbound callback.
    pub callback_cursor: u64,
}

impl TaskRecord {
    /// Build a freshly admitted, `queued` task record.
    pub fn new(
        task_id: impl Into<String>,
        worker_type: impl Into<String>,
        prompt: impl Into<String>,
        callback_url: impl Into<String>,
        callback_secret: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Queued,
            worker_type: worker_type.into(),
            prompt: prompt.into(),
            callback_url: callback_url.into(),
            callback_secret: callback_secret.into(),
            created_at,
            started_at: None,
            ended_at: None,
            workspace_handle: None,
            cancellation_requested: false,
            callback_cursor: 0,
        }
    }

    /// Attempt a status transition, enforcing the status graph. Returns
    /// `false` (and leaves `status` unchanged) on an illegal transition.
    #[must_use]
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Allocate the next outbound callback sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        self.callback_cursor += 1;
        self.callback_cursor
    }

    /// Latch the cancellation flag. Idempotent.
    pub fn request_cancellation(&mut self) {
        self.cancellation_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_graph_rejects_skipping_running() {
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn status_graph_allows_the_documented_edges() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for next in [
                TaskStatus::Queued,
                TaskStatus::Running,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn record_transition_rejects_illegal_edges_and_keeps_prior_status() {
        let mut task = TaskRecord::new("t-1", "echo", "hello", "https://cb.test", "s".repeat(32), 0);
        assert!(!task.transition(TaskStatus::Completed));
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.transition(TaskStatus::Running));
        assert!(task.transition(TaskStatus::Completed));
    }

    #[test]
    fn sequence_numbers_start_at_one_and_increase_monotonically() {
        let mut task = TaskRecord::new("t-1", "echo", "hello", "https://cb.test", "s".repeat(32), 0);
        assert_eq!(task.next_sequence(), 1);
        assert_eq!(task.next_sequence(), 2);
        assert_eq!(task.next_sequence(), 3);
    }
}
