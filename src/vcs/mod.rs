//! Git adapter
//!
//! The minimum verb vocabulary the orchestrator needs: init, branch,
//! add, commit, diff, merge, worktree. Every verb shells out through
//! the process runner; porcelain output is parsed here and exit codes
//! are normalized into typed results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::process::{ProcessError, ProcessOptions, ProcessRunner};

/// Timeout for git commands; clones and merges can be slow
const GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Error types for VCS operations
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("Git command failed: {stderr}")]
    Command { stderr: String },

    #[error("Not a git repository: {0}")]
    NotARepo(PathBuf),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),
}

/// Outcome of a merge attempt
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Merge commit created
    Merged { commit: String },
    /// Conflicting paths; the merge was aborted
    Conflict { files: Vec<String> },
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

/// Minimal git operations used by the core
///
/// Clones share one mutation lock: operations that touch the shared
/// repository state (merges, branch and worktree changes) are
/// serialized, since concurrent workers all integrate into the same
/// checkout. Per-worktree reads and commits run unserialized.
#[derive(Clone)]
pub struct GitAdapter {
    repo_root: PathBuf,
    runner: ProcessRunner,
    mutation_lock: std::sync::Arc<tokio::sync::Mutex<()>>,
}

impl GitAdapter {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            runner: ProcessRunner::new(),
            mutation_lock: std::sync::Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let command = format!("git {}", args.iter().map(|a| sh_quote(a)).collect::<Vec<_>>().join(" "));
        debug!(dir = %dir.display(), %command, "GitAdapter::git");

        match self
            .runner
            .run(&command, ProcessOptions::in_dir(dir).with_timeout(GIT_TIMEOUT))
            .await
        {
            Ok(result) => Ok(result.stdout),
            Err(ProcessError::Failed { stderr, .. }) => Err(VcsError::Command { stderr }),
            Err(other) => Err(VcsError::Process(other)),
        }
    }

    async fn git_root(&self, args: &[&str]) -> Result<String, VcsError> {
        let root = self.repo_root.clone();
        self.git(&root, args).await
    }

    /// Initialize a fresh repository with an initial commit
    pub async fn init(&self) -> Result<(), VcsError> {
        tokio::fs::create_dir_all(&self.repo_root)
            .await
            .map_err(|e| VcsError::Command { stderr: e.to_string() })?;
        self.git_root(&["init", "--initial-branch", "main"]).await?;
        self.ensure_identity(&self.repo_root.clone()).await?;
        self.git_root(&["commit", "--allow-empty", "-m", "initial"]).await?;
        Ok(())
    }

    /// Make sure commits in `dir` have an author
    ///
    /// Auto-configures a local identity when none is set globally, so
    /// commits never fail for lack of author metadata.
    pub async fn ensure_identity(&self, dir: &Path) -> Result<(), VcsError> {
        if self.git(dir, &["config", "user.email"]).await.is_err() {
            debug!(dir = %dir.display(), "No commit identity configured, setting a local one");
            self.git(dir, &["config", "user.email", "nexus@localhost"]).await?;
            self.git(dir, &["config", "user.name", "Nexus"]).await?;
        }
        Ok(())
    }

    /// Create a branch at a base ref
    pub async fn create_branch(&self, name: &str, base: &str) -> Result<(), VcsError> {
        let _guard = self.mutation_lock.lock().await;
        self.git_root(&["branch", name, base]).await?;
        Ok(())
    }

    /// Force-delete a branch; missing branches are not an error
    pub async fn delete_branch(&self, name: &str) -> Result<(), VcsError> {
        let _guard = self.mutation_lock.lock().await;
        if let Err(e) = self.git_root(&["branch", "-D", name]).await {
            debug!(branch = name, error = %e, "Branch deletion skipped");
        }
        Ok(())
    }

    /// Stage everything in `dir`
    pub async fn add_all(&self, dir: &Path) -> Result<(), VcsError> {
        self.git(dir, &["add", "-A"]).await?;
        Ok(())
    }

    /// Commit staged changes in `dir`, returning the commit hash
    ///
    /// `Ok(None)` when there was nothing to commit.
    pub async fn commit(&self, dir: &Path, message: &str) -> Result<Option<String>, VcsError> {
        let status = self.git(dir, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            debug!(dir = %dir.display(), "Nothing to commit");
            return Ok(None);
        }

        self.ensure_identity(dir).await?;
        self.git(dir, &["commit", "-m", message]).await?;
        let commit = self.current_commit(dir).await?;
        Ok(Some(commit))
    }

    /// HEAD commit hash of `dir`
    pub async fn current_commit(&self, dir: &Path) -> Result<String, VcsError> {
        let out = self.git(dir, &["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Full diff of `dir` against a base ref (working tree included)
    ///
    /// Untracked files are registered with intent-to-add first so new
    /// files show up in the diff.
    pub async fn diff(&self, dir: &Path, base: &str) -> Result<String, VcsError> {
        self.git(dir, &["add", "-A", "--intent-to-add"]).await?;
        self.git(dir, &["diff", base]).await
    }

    /// Paths changed in `dir` relative to a base ref
    pub async fn changed_files(&self, dir: &Path, base: &str) -> Result<Vec<String>, VcsError> {
        self.git(dir, &["add", "-A", "--intent-to-add"]).await?;
        let out = self.git(dir, &["diff", "--name-only", base]).await?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
    }

    /// Merge `branch` into `into_branch` with `--no-ff`
    ///
    /// On conflict the merge is aborted and the conflicting paths are
    /// returned; the repository is left clean either way.
    pub async fn merge_no_ff(&self, branch: &str, into_branch: &str, message: &str) -> Result<MergeOutcome, VcsError> {
        let _guard = self.mutation_lock.lock().await;
        self.git_root(&["checkout", into_branch]).await?;
        self.ensure_identity(&self.repo_root.clone()).await?;

        match self.git_root(&["merge", "--no-ff", branch, "-m", message]).await {
            Ok(_) => {
                let commit = self.current_commit(&self.repo_root.clone()).await?;
                info!(branch, into_branch, %commit, "Merge completed");
                Ok(MergeOutcome::Merged { commit })
            }
            Err(VcsError::Command { stderr }) => {
                let files: Vec<String> = self
                    .git_root(&["diff", "--name-only", "--diff-filter=U"])
                    .await
                    .map(|out| out.lines().map(String::from).filter(|l| !l.is_empty()).collect())
                    .unwrap_or_default();

                warn!(branch, ?files, "Merge conflict, aborting");
                let _ = self.git_root(&["merge", "--abort"]).await;

                if files.is_empty() {
                    // Not a conflict after all; surface the raw failure
                    return Err(VcsError::Command { stderr });
                }
                Ok(MergeOutcome::Conflict { files })
            }
            Err(other) => Err(other),
        }
    }

    /// Add a worktree at `path` on a new branch cut from `base`
    pub async fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<(), VcsError> {
        let _guard = self.mutation_lock.lock().await;
        let path_str = path.display().to_string();
        self.git_root(&["worktree", "add", &path_str, "-b", branch, base]).await?;
        self.ensure_identity(path).await?;
        Ok(())
    }

    /// Remove a worktree
    pub async fn worktree_remove(&self, path: &Path) -> Result<(), VcsError> {
        let _guard = self.mutation_lock.lock().await;
        let path_str = path.display().to_string();
        self.git_root(&["worktree", "remove", &path_str, "--force"]).await?;
        Ok(())
    }

    /// Worktree paths registered on the repository (main checkout included)
    pub async fn worktree_list(&self) -> Result<Vec<PathBuf>, VcsError> {
        let out = self.git_root(&["worktree", "list", "--porcelain"]).await?;
        Ok(out
            .lines()
            .filter_map(|line| line.strip_prefix("worktree "))
            .map(PathBuf::from)
            .collect())
    }

    /// Branch names in the repository
    pub async fn branches(&self) -> Result<Vec<String>, VcsError> {
        let out = self.git_root(&["branch", "--format", "%(refname:short)"]).await?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
    }
}

/// Quote one argument for `sh`-style tokenization
fn sh_quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| c.is_alphanumeric() || "-_./=:@%+,".contains(c)) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
