//! Worktree manager
//!
//! Materializes one isolated working copy per task, each on its own
//! branch cut from the integration branch. At most one worktree exists
//! per task, and distinct worktrees share no files on disk.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WorktreeConfig;
use crate::vcs::{GitAdapter, VcsError};

/// Error types for worktree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("Failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("No worktree known for task: {0}")]
    UnknownTask(String),

    #[error("Task already has a worktree: {0}")]
    AlreadyExists(String),

    #[error("Git error: {0}")]
    Git(#[from] VcsError),
}

/// An isolated working copy bound to one task
#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    /// Task this worktree belongs to
    pub task_id: String,

    /// Absolute path on disk
    pub path: PathBuf,

    /// Branch the worktree is on
    pub branch: String,
}

/// Manager for per-task git worktrees
pub struct WorktreeManager {
    config: WorktreeConfig,
    git: GitAdapter,
    active: Mutex<HashMap<String, WorktreeInfo>>,
}

impl WorktreeManager {
    pub fn new(config: WorktreeConfig, git: GitAdapter) -> Self {
        debug!(?config, "WorktreeManager::new");
        Self {
            config,
            git,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn branch_for(&self, task_id: &str) -> String {
        format!("{}/{}", self.config.branch_prefix, task_id)
    }

    /// Create a worktree for a task
    ///
    /// Fails if the task already has one; two in-progress tasks never
    /// share a working copy.
    pub async fn create(&self, task_id: &str, base_branch: Option<&str>) -> Result<WorktreeInfo, WorktreeError> {
        debug!(%task_id, "WorktreeManager::create");

        let mut active = self.active.lock().await;
        if active.contains_key(task_id) {
            return Err(WorktreeError::AlreadyExists(task_id.to_string()));
        }

        tokio::fs::create_dir_all(&self.config.base_dir)
            .await
            .map_err(|e| WorktreeError::CreateFailed(format!("Failed to create base dir: {}", e)))?;

        let path = self.config.base_dir.join(task_id);
        let branch = self.branch_for(task_id);
        let base = base_branch.unwrap_or("main");

        self.git
            .worktree_add(&path, &branch, base)
            .await
            .map_err(|e| WorktreeError::CreateFailed(e.to_string()))?;

        let info = WorktreeInfo {
            task_id: task_id.to_string(),
            path: path.clone(),
            branch: branch.clone(),
        };
        active.insert(task_id.to_string(), info.clone());

        info!(%task_id, path = %path.display(), %branch, "Created worktree");
        Ok(info)
    }

    /// Remove a task's worktree and its branch
    ///
    /// Unknown tasks are an error: a release for a task that was never
    /// bound means bookkeeping is broken somewhere upstream.
    pub async fn remove(&self, task_id: &str) -> Result<(), WorktreeError> {
        debug!(%task_id, "WorktreeManager::remove");

        let info = {
            let mut active = self.active.lock().await;
            active
                .remove(task_id)
                .ok_or_else(|| WorktreeError::UnknownTask(task_id.to_string()))?
        };

        if let Err(e) = self.git.worktree_remove(&info.path).await {
            // Surface removal failures, but only after dropping the binding
            warn!(%task_id, error = %e, "Worktree removal failed");
            return Err(WorktreeError::RemoveFailed(e.to_string()));
        }
        self.git.delete_branch(&info.branch).await?;

        info!(%task_id, "Removed worktree");
        Ok(())
    }

    /// Release a worktree after its task finished
    ///
    /// Removes it when `cleanup-on-release` is set; otherwise the
    /// working copy is detached from the manager and left on disk for
    /// inspection.
    pub async fn release(&self, task_id: &str) -> Result<(), WorktreeError> {
        if self.config.cleanup_on_release {
            self.remove(task_id).await
        } else {
            let mut active = self.active.lock().await;
            active
                .remove(task_id)
                .map(|info| debug!(%task_id, path = %info.path.display(), "Detached worktree"))
                .ok_or_else(|| WorktreeError::UnknownTask(task_id.to_string()))
        }
    }

    /// Best-effort removal of a task's worktree and branch
    ///
    /// Works whether or not the manager still tracks the task; used
    /// when a detached worktree must go before a task is re-dispatched.
    pub async fn purge(&self, task_id: &str) {
        {
            let mut active = self.active.lock().await;
            active.remove(task_id);
        }

        let path = self.config.base_dir.join(task_id);
        if path.exists()
            && let Err(e) = self.git.worktree_remove(&path).await
        {
            debug!(%task_id, error = %e, "Worktree purge: removal skipped");
        }
        let _ = self.git.delete_branch(&self.branch_for(task_id)).await;
        debug!(%task_id, "Worktree purged");
    }

    /// Snapshot of active worktrees
    pub async fn list(&self) -> Vec<WorktreeInfo> {
        let active = self.active.lock().await;
        let mut infos: Vec<_> = active.values().cloned().collect();
        infos.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        infos
    }

    /// Look up the worktree bound to a task
    pub async fn get(&self, task_id: &str) -> Option<WorktreeInfo> {
        self.active.lock().await.get(task_id).cloned()
    }

    /// Whether a task currently has a worktree
    pub async fn exists(&self, task_id: &str) -> bool {
        self.active.lock().await.contains_key(task_id)
    }

    /// Remove every active worktree (shutdown reclamation)
    pub async fn remove_all(&self) -> usize {
        let task_ids: Vec<String> = {
            let active = self.active.lock().await;
            active.keys().cloned().collect()
        };

        let mut removed = 0;
        for task_id in task_ids {
            match self.remove(&task_id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(%task_id, error = %e, "Failed to reclaim worktree"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, tempfile::TempDir, WorktreeManager) {
        let repo_dir = tempdir().unwrap();
        let wt_dir = tempdir().unwrap();

        let git = GitAdapter::new(repo_dir.path());
        git.init().await.unwrap();

        let config = WorktreeConfig {
            base_dir: wt_dir.path().to_path_buf(),
            branch_prefix: "nexus".to_string(),
            cleanup_on_release: true,
        };
        let manager = WorktreeManager::new(config, git);
        (repo_dir, wt_dir, manager)
    }

    #[tokio::test]
    async fn test_create_and_remove() {
        let (_repo, _wt, manager) = setup().await;

        let info = manager.create("task-1", None).await.unwrap();
        assert!(info.path.exists());
        assert_eq!(info.branch, "nexus/task-1");
        assert!(manager.exists("task-1").await);

        manager.remove("task-1").await.unwrap();
        assert!(!info.path.exists());
        assert!(!manager.exists("task-1").await);
    }

    #[tokio::test]
    async fn test_one_worktree_per_task() {
        let (_repo, _wt, manager) = setup().await;

        manager.create("task-1", None).await.unwrap();
        let err = manager.create("task-1", None).await.unwrap_err();
        assert!(matches!(err, WorktreeError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_distinct_tasks_get_disjoint_paths() {
        let (_repo, _wt, manager) = setup().await;

        let a = manager.create("task-a", None).await.unwrap();
        let b = manager.create("task-b", None).await.unwrap();

        assert_ne!(a.path, b.path);
        assert!(!a.path.starts_with(&b.path));
        assert!(!b.path.starts_with(&a.path));
        assert_ne!(a.branch, b.branch);
    }

    #[tokio::test]
    async fn test_remove_unknown_task_is_fatal() {
        let (_repo, _wt, manager) = setup().await;
        let err = manager.remove("never-created").await.unwrap_err();
        assert!(matches!(err, WorktreeError::UnknownTask(_)));
    }

    #[tokio::test]
    async fn test_create_remove_restores_prestate() {
        let (repo, _wt, manager) = setup().await;
        let git = GitAdapter::new(repo.path());
        let branches_before = git.branches().await.unwrap();

        let info = manager.create("task-1", None).await.unwrap();
        manager.remove("task-1").await.unwrap();

        // No leftover branch or directory for the task
        let branches_after = git.branches().await.unwrap();
        assert_eq!(branches_before, branches_after);
        assert!(!info.path.exists());
    }

    #[tokio::test]
    async fn test_release_detaches_when_cleanup_disabled() {
        let (repo_dir, wt_dir, _unused) = setup().await;
        let git = GitAdapter::new(repo_dir.path());
        let config = WorktreeConfig {
            base_dir: wt_dir.path().to_path_buf(),
            branch_prefix: "nexus".to_string(),
            cleanup_on_release: false,
        };
        let manager = WorktreeManager::new(config, git);

        let info = manager.create("task-1", None).await.unwrap();
        manager.release("task-1").await.unwrap();

        // Directory survives, but the manager no longer tracks it
        assert!(info.path.exists());
        assert!(!manager.exists("task-1").await);
    }

    #[tokio::test]
    async fn test_remove_all() {
        let (_repo, _wt, manager) = setup().await;

        manager.create("task-1", None).await.unwrap();
        manager.create("task-2", None).await.unwrap();

        let removed = manager.remove_all().await;
        assert_eq!(removed, 2);
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let (_repo, _wt, manager) = setup().await;

        manager.create("task-b", None).await.unwrap();
        manager.create("task-a", None).await.unwrap();

        let list = manager.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].task_id, "task-a");
        assert_eq!(list[1].task_id, "task-b");
    }
}
