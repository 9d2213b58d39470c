//! Task domain type
//!
//! A Task is the atomic scheduling unit produced by decomposition.
//! Prerequisites form a DAG; a running task is bound to exactly one
//! worktree and one agent; iteration count is capped by configuration.

use serde::{Deserialize, Serialize};

use super::id::{generate_id, now_ms};
use super::priority::Priority;

/// Task status in the execution workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet submitted to the pool
    #[default]
    Pending,
    /// Waiting in the pool queue
    Queued,
    /// Running inside a worktree
    InProgress,
    /// Escalated to human review
    AwaitingReview,
    /// Merged to the integration branch
    Done,
    /// Terminal failure
    Failed,
    /// A prerequisite failed; never dispatched
    Blocked,
}

impl TaskStatus {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Blocked)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::AwaitingReview => "awaiting_review",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

/// The atomic scheduling unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (e.g., "019f3a-task-add-endpoint")
    pub id: String,

    /// Feature this task was decomposed from
    pub feature_id: String,

    /// Short human-readable title
    pub title: String,

    /// Free-text description of the change
    pub description: String,

    /// File paths the task is expected to touch (a hint, not a fence)
    #[serde(default)]
    pub files: Vec<String>,

    /// Optional test selector passed to the test stage
    #[serde(default)]
    pub test_selector: Option<String>,

    /// Estimated effort in minutes
    pub estimated_minutes: u32,

    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,

    /// Prerequisite task IDs (must form a DAG)
    #[serde(default)]
    pub deps: Vec<String>,

    /// Current status
    #[serde(default)]
    pub status: TaskStatus,

    /// QA iterations consumed so far
    #[serde(default)]
    pub iteration: u32,

    /// Branch of the bound worktree while in progress
    #[serde(default)]
    pub worktree_branch: Option<String>,

    /// Identifier of the owning agent while in progress
    #[serde(default)]
    pub agent_id: Option<String>,

    /// Merge commit once done
    #[serde(default)]
    pub merge_commit: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Dispatch timestamp (Unix milliseconds)
    #[serde(default)]
    pub started_at: Option<i64>,

    /// Terminal timestamp (Unix milliseconds)
    #[serde(default)]
    pub finished_at: Option<i64>,
}

impl Task {
    /// Create a new task with a generated ID
    pub fn new(feature_id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: generate_id("task", &title),
            feature_id: feature_id.into(),
            title,
            description: description.into(),
            files: Vec::new(),
            test_selector: None,
            estimated_minutes: 0,
            priority: Priority::Normal,
            deps: Vec::new(),
            status: TaskStatus::Pending,
            iteration: 0,
            worktree_branch: None,
            agent_id: None,
            merge_commit: None,
            created_at: now_ms(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Create a task with a fixed ID (tests and recovery)
    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        let mut task = Self::new("", title, "");
        task.id = id.into();
        task
    }

    /// Add a prerequisite, skipping duplicates and self-references
    pub fn add_dep(&mut self, dep_id: impl Into<String>) {
        let dep_id = dep_id.into();
        if dep_id != self.id && !self.deps.contains(&dep_id) {
            self.deps.push(dep_id);
        }
    }

    /// Mark the task as dispatched to an agent inside a worktree
    pub fn mark_started(&mut self, agent_id: impl Into<String>, worktree_branch: impl Into<String>) {
        self.status = TaskStatus::InProgress;
        self.agent_id = Some(agent_id.into());
        self.worktree_branch = Some(worktree_branch.into());
        self.started_at = Some(now_ms());
    }

    /// Mark the task as merged
    pub fn mark_done(&mut self, merge_commit: impl Into<String>) {
        self.status = TaskStatus::Done;
        self.merge_commit = Some(merge_commit.into());
        self.finished_at = Some(now_ms());
        self.release_binding();
    }

    /// Mark a terminal failure
    pub fn mark_failed(&mut self) {
        self.status = TaskStatus::Failed;
        self.finished_at = Some(now_ms());
        self.release_binding();
    }

    /// Mark the task escalated to human review
    pub fn mark_awaiting_review(&mut self) {
        self.status = TaskStatus::AwaitingReview;
        self.release_binding();
    }

    /// Mark the task blocked by a failed prerequisite
    pub fn mark_blocked(&mut self) {
        self.status = TaskStatus::Blocked;
        self.finished_at = Some(now_ms());
    }

    fn release_binding(&mut self) {
        self.agent_id = None;
        self.worktree_branch = None;
    }

    /// Check the structural invariants of this record
    ///
    /// Returns the first violated invariant as a message; `None` is healthy.
    pub fn invariant_violation(&self, max_iterations: u32) -> Option<String> {
        if self.deps.contains(&self.id) {
            return Some(format!("task {} lists itself as a prerequisite", self.id));
        }
        if self.status == TaskStatus::InProgress && (self.worktree_branch.is_none() || self.agent_id.is_none()) {
            return Some(format!("task {} is in progress without a worktree/agent binding", self.id));
        }
        if self.status == TaskStatus::Done && self.merge_commit.is_none() {
            return Some(format!("task {} is done without a merge commit", self.id));
        }
        if self.iteration > max_iterations {
            return Some(format!(
                "task {} exceeded the iteration cap ({} > {})",
                self.id, self.iteration, max_iterations
            ));
        }
        None
    }
}
