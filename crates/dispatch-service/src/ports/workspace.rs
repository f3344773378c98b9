//! Isolated per-task source-tree provisioning.

use async_trait::async_trait;
use dispatch_core::WorkspaceHandle;

/// Errors raised while allocating, cleaning, or disposing a workspace.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkspaceError {
    /// Allocation failed; no partial state was left on disk.
    #[error("workspace allocation failed: {0}")]
    AllocationFailed(String),
    /// Cleaning the working tree failed.
    #[error("workspace clean failed: {0}")]
    CleanFailed(String),
    /// Disposal failed; logged as non-fatal by the caller.
    #[error("workspace dispose failed: {0}")]
    DisposeFailed(String),
}

/// Branches off a shared base tree, one exclusively-owned workspace per
/// live task at a time.
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Produce a fresh workspace rooted at `base_revision` (or the manager's
    /// configured default when `None`).
    async fn allocate(
        &self,
        task_id: &str,
        base_revision: Option<&str>,
    ) -> Result<WorkspaceHandle, WorkspaceError>;

    /// Discard all uncommitted and untracked changes in `handle`.
    async fn clean(&self, handle: &WorkspaceHandle) -> Result<(), WorkspaceError>;

    /// Remove the workspace. Idempotent; a failure is recorded by the caller
    /// as a non-fatal diagnostic rather than propagated into the pipeline.
    async fn dispose(&self, handle: &WorkspaceHandle) -> Result<(), WorkspaceError>;

    /// Absolute filesystem path backing `handle`, for the worker runner's
    /// working directory.
    fn path_of(&self, handle: &WorkspaceHandle) -> std::path::PathBuf;
}
