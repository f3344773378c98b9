//! Detects and reverts sensitive files from a worker's commits before the
//! terminal callback is emitted.

use dispatch_core::is_sensitive_path;
use std::path::{Path, PathBuf};

use crate::ports::workspace::WorkspaceError;

/// Result of running the guard over a worker's commits.
#[derive(Debug, Clone, Default)]
pub struct GuardOutcome {
    /// Sensitive paths successfully reverted to their pre-worker state.
    pub reverted: Vec<String>,
    /// Sensitive paths whose revert failed; reported as a diagnostic.
    pub remaining: Vec<String>,
    /// True when every changed path was sensitive and none remained
    /// unreverted — the terminal event becomes `cancelled`, not `completed`.
    pub all_sensitive: bool,
}

/// Diffs `HEAD~commit_depth..HEAD` in the workspace at `path`, reverts any
/// sensitive path it finds, and classifies the outcome.
pub struct SensitiveGuard;

impl SensitiveGuard {
    /// Run the guard over `workspace_path`, comparing `HEAD` against
    /// `commit_depth` commits back.
    pub async fn guard(&self, workspace_path: &Path, commit_depth: u32) -> Result<GuardOutcome, WorkspaceError> {
        let path = workspace_path.to_path_buf();
        tokio::task::spawn_blocking(move || guard_blocking(&path, commit_depth))
            .await
            .map_err(|e| WorkspaceError::CleanFailed(e.to_string()))?
    }
}

fn guard_blocking(path: &Path, commit_depth: u32) -> Result<GuardOutcome, WorkspaceError> {
    let repo = git2::Repository::open(path)
        .map_err(|e| WorkspaceError::CleanFailed(format!("opening worktree: {e}")))?;

    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(|e| WorkspaceError::CleanFailed(format!("resolving HEAD: {e}")))?;

    let mut base = head.clone();
    for _ in 0..commit_depth {
        base = base
            .parent(0)
            .map_err(|e| WorkspaceError::CleanFailed(format!("walking commit history: {e}")))?;
    }

    let base_tree = base
        .tree()
        .map_err(|e| WorkspaceError::CleanFailed(format!("reading base tree: {e}")))?;
    let head_tree = head
        .tree()
        .map_err(|e| WorkspaceError::CleanFailed(format!("reading HEAD tree: {e}")))?;

    let diff = repo
        .diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)
        .map_err(|e| WorkspaceError::CleanFailed(format!("diffing commit range: {e}")))?;

    let mut changed: Vec<String> = Vec::new();
    diff.foreach(
        &mut |delta, _| {
            if let Some(file) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                changed.push(file.to_string_lossy().replace('\\', "/"));
            }
            true
        },
        None,
        None,
        None,
    )
    .map_err(|e| WorkspaceError::CleanFailed(format!("enumerating diff deltas: {e}")))?;

    let (sensitive, benign): (Vec<String>, Vec<String>) =
        changed.into_iter().partition(|p| is_sensitive_path(p));

    let mut reverted = Vec::new();
    let mut remaining = Vec::new();

    for entry in sensitive {
        match revert_one(&repo, &base, &entry) {
            Ok(()) => reverted.push(entry),
            Err(_) => remaining.push(entry),
        }
    }

    let all_sensitive = benign.is_empty() && remaining.is_empty();

    Ok(GuardOutcome {
        reverted,
        remaining,
        all_sensitive,
    })
}

fn revert_one(repo: &git2::Repository, base: &git2::Commit<'_>, relative_path: &str) -> Result<(), git2::Error> {
    let base_tree = base.tree()?;
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.path(relative_path).force();
    repo.checkout_tree(base_tree.as_object(), Some(&mut checkout))?;

    let mut index = repo.index()?;
    let full_path: PathBuf = repo
        .workdir()
        .map(|w| w.join(relative_path))
        .unwrap_or_else(|| PathBuf::from(relative_path));
    if full_path.exists() {
        index.add_path(Path::new(relative_path))?;
    } else {
        index.remove_path(Path::new(relative_path))?;
    }
    index.write()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn an_all_sensitive_outcome_requires_no_benign_and_no_remaining() {
        let outcome = GuardOutcome {
            reverted: vec![".env".to_string()],
            remaining: vec![],
            all_sensitive: true,
        };
        assert!(outcome.remaining.is_empty());
        assert!(outcome.all_sensitive);
    }
}
