//! Merger agent
//!
//! Integrates an approved worktree branch into the integration branch.
//! The merge itself is mechanical; a conflict produces the file list
//! that backs a merge-conflict review request rather than an automated
//! resolution attempt.

use eyre::Result;
use tracing::{info, warn};

use crate::domain::Task;
use crate::vcs::{GitAdapter, MergeOutcome};
use crate::worktree::WorktreeInfo;

/// Outcome of a merge attempt for one task
#[derive(Debug, Clone)]
pub enum MergeReport {
    /// Integrated; carries the merge commit
    Merged { commit: String },
    /// Conflicting paths; integration branch left untouched
    Conflict { files: Vec<String> },
}

impl MergeReport {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

/// Integrates approved task branches
pub struct MergerAgent {
    git: GitAdapter,
    integration_branch: String,
}

impl MergerAgent {
    pub fn new(git: GitAdapter, integration_branch: impl Into<String>) -> Self {
        Self {
            git,
            integration_branch: integration_branch.into(),
        }
    }

    /// Commit outstanding worktree changes and merge the task branch
    pub async fn merge(&self, task: &Task, worktree: &WorktreeInfo) -> Result<MergeReport> {
        info!(task_id = %task.id, branch = %worktree.branch, "Merging task branch");

        // Anything the QA loop left uncommitted belongs to this task
        self.git.add_all(&worktree.path).await?;
        self.git
            .commit(&worktree.path, &format!("{}\n\nTask: {}", task.title, task.id))
            .await?;

        let message = format!("Merge task: {}", task.title);
        match self
            .git
            .merge_no_ff(&worktree.branch, &self.integration_branch, &message)
            .await?
        {
            MergeOutcome::Merged { commit } => {
                info!(task_id = %task.id, %commit, "Task merged");
                Ok(MergeReport::Merged { commit })
            }
            MergeOutcome::Conflict { files } => {
                warn!(task_id = %task.id, ?files, "Merge conflict");
                Ok(MergeReport::Conflict { files })
            }
        }
    }
}
