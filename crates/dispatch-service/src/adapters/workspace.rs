//! Git-worktree-backed workspace manager.
//!
//! Each task's workspace is a `git2` worktree branched off one shared base
//! repository held open for the process lifetime. `git2` is blocking, so
//! every repository operation runs on `tokio::task::spawn_blocking`; a
//! `tokio::sync::Mutex` serialises operations against this manager's single
//! physical base root without serialising across independently-rooted
//! managers.

use async_trait::async_trait;
use dispatch_core::WorkspaceHandle;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::ports::workspace::{WorkspaceError, WorkspaceManager};

/// Workspace manager backed by one shared base repository.
pub struct GitWorktreeManager {
    base_repository: PathBuf,
    worktree_root: PathBuf,
    lock: Mutex<()>,
}

impl GitWorktreeManager {
    /// `base_repository` is the shared tree every workspace branches from;
    /// `worktree_root` is the directory per-task worktrees are created under.
    pub fn new(base_repository: PathBuf, worktree_root: PathBuf) -> Self {
        Self {
            base_repository,
            worktree_root,
            lock: Mutex::new(()),
        }
    }

    fn sanitize(task_id: &str) -> String {
        task_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

#[async_trait]
impl WorkspaceManager for GitWorktreeManager {
    async fn allocate(
        &self,
        task_id: &str,
        base_revision: Option<&str>,
    ) -> Result<WorkspaceHandle, WorkspaceError> {
        let _guard = self.lock.lock().await;

        let name = Self::sanitize(task_id);
        let base_repository = self.base_repository.clone();
        let path = self.worktree_root.join(&name);
        let revision = base_revision.map(str::to_string);

        tokio::task::spawn_blocking(move || allocate_blocking(&base_repository, &path, &name, revision.as_deref()))
            .await
            .map_err(|e| WorkspaceError::AllocationFailed(e.to_string()))??;

        Ok(WorkspaceHandle(name))
    }

    async fn clean(&self, handle: &WorkspaceHandle) -> Result<(), WorkspaceError> {
        let _guard = self.lock.lock().await;
        let path = self.path_of(handle);

        tokio::task::spawn_blocking(move || clean_blocking(&path))
            .await
            .map_err(|e| WorkspaceError::CleanFailed(e.to_string()))?
    }

    async fn dispose(&self, handle: &WorkspaceHandle) -> Result<(), WorkspaceError> {
        let _guard = self.lock.lock().await;
        let base_repository = self.base_repository.clone();
        let path = self.path_of(handle);
        let name = handle.as_str().to_string();

        tokio::task::spawn_blocking(move || dispose_blocking(&base_repository, &path, &name))
            .await
            .map_err(|e| WorkspaceError::DisposeFailed(e.to_string()))?
    }

    fn path_of(&self, handle: &WorkspaceHandle) -> PathBuf {
        self.worktree_root.join(handle.as_str())
    }
}

fn allocate_blocking(
    base_repository: &Path,
    path: &Path,
    name: &str,
    base_revision: Option<&str>,
) -> Result<(), WorkspaceError> {
    if path.exists() {
        std::fs::remove_dir_all(path)
            .map_err(|e| WorkspaceError::AllocationFailed(format!("stale worktree directory: {e}")))?;
    }

    let repo = git2::Repository::open(base_repository)
        .map_err(|e| WorkspaceError::AllocationFailed(format!("opening base repository: {e}")))?;

    let worktree = repo
        .worktree(name, path, None)
        .map_err(|e| WorkspaceError::AllocationFailed(format!("creating worktree: {e}")))?;

    let worktree_repo = git2::Repository::open_from_worktree(&worktree)
        .map_err(|e| WorkspaceError::AllocationFailed(format!("opening worktree: {e}")))?;

    if let Some(revision) = base_revision {
        let object = worktree_repo
            .revparse_single(revision)
            .map_err(|e| WorkspaceError::AllocationFailed(format!("resolving {revision:?}: {e}")))?;
        worktree_repo
            .reset(&object, git2::ResetType::Hard, None)
            .map_err(|e| WorkspaceError::AllocationFailed(format!("resetting to {revision:?}: {e}")))?;
    }

    Ok(())
}

fn clean_blocking(path: &Path) -> Result<(), WorkspaceError> {
    let repo = git2::Repository::open(path)
        .map_err(|e| WorkspaceError::CleanFailed(format!("opening worktree: {e}")))?;

    let head = repo
        .head()
        .and_then(|h| h.peel(git2::ObjectType::Commit))
        .map_err(|e| WorkspaceError::CleanFailed(format!("resolving HEAD: {e}")))?;

    repo.reset(&head, git2::ResetType::Hard, None)
        .map_err(|e| WorkspaceError::CleanFailed(format!("hard reset: {e}")))?;

    let mut options = git2::build::CheckoutBuilder::new();
    options.remove_untracked(true).force();
    repo.checkout_head(Some(&mut options))
        .map_err(|e| WorkspaceError::CleanFailed(format!("removing untracked files: {e}")))?;

    Ok(())
}

fn dispose_blocking(base_repository: &Path, path: &Path, name: &str) -> Result<(), WorkspaceError> {
    if path.exists() {
        std::fs::remove_dir_all(path)
            .map_err(|e| WorkspaceError::DisposeFailed(format!("removing worktree directory: {e}")))?;
    }

    let repo = git2::Repository::open(base_repository)
        .map_err(|e| WorkspaceError::DisposeFailed(format!("opening base repository: {e}")))?;
    if let Ok(worktree) = repo.find_worktree(name) {
        worktree
            .prune(None)
            .map_err(|e| WorkspaceError::DisposeFailed(format!("pruning worktree metadata: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(GitWorktreeManager::sanitize("a/b c.d"), "a_b_c_d");
        assert_eq!(GitWorktreeManager::sanitize("task-1_ok"), "task-1_ok");
    }
}
