//! Typed events published on the bus
//!
//! The taxonomy is closed: task lifecycle, stage lifecycle, replan
//! traffic, and review traffic. Every event carries a timestamp, the
//! task it concerns, and a typed payload.

use serde::{Deserialize, Serialize};

use crate::domain::now_ms;
use crate::qa::StageKind;
use crate::replan::ReplanAction;
use crate::review::ReviewReason;

/// A single event on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Emission timestamp (Unix milliseconds)
    pub at: i64,

    /// Task this event concerns
    pub task_id: String,

    /// Typed payload
    pub payload: EventPayload,
}

/// Closed payload taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TaskQueued,
    TaskStarted {
        agent_id: String,
        worktree_branch: String,
    },
    TaskCompleted {
        merge_commit: String,
        iterations: u32,
    },
    TaskFailed {
        reason: String,
    },
    StageStarted {
        stage: StageKind,
        iteration: u32,
    },
    StageCompleted {
        stage: StageKind,
        iteration: u32,
        passed: bool,
        duration_ms: u64,
    },
    ReplanRequested {
        trigger: String,
        reason: String,
    },
    ReplanDecision {
        action: ReplanAction,
        confidence: f64,
        reason: String,
    },
    ReviewRequested {
        review_id: String,
        reason: ReviewReason,
        qa_iterations: u32,
    },
    ReviewResolved {
        review_id: String,
        approved: bool,
        feedback: Option<String>,
    },
}

impl Event {
    fn new(task_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            at: now_ms(),
            task_id: task_id.into(),
            payload,
        }
    }

    pub fn task_queued(task_id: impl Into<String>) -> Self {
        Self::new(task_id, EventPayload::TaskQueued)
    }

    pub fn task_started(task_id: impl Into<String>, agent_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self::new(
            task_id,
            EventPayload::TaskStarted {
                agent_id: agent_id.into(),
                worktree_branch: branch.into(),
            },
        )
    }

    pub fn task_completed(task_id: impl Into<String>, merge_commit: impl Into<String>, iterations: u32) -> Self {
        Self::new(
            task_id,
            EventPayload::TaskCompleted {
                merge_commit: merge_commit.into(),
                iterations,
            },
        )
    }

    pub fn task_failed(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(task_id, EventPayload::TaskFailed { reason: reason.into() })
    }

    pub fn stage_started(task_id: impl Into<String>, stage: StageKind, iteration: u32) -> Self {
        Self::new(task_id, EventPayload::StageStarted { stage, iteration })
    }

    pub fn stage_completed(
        task_id: impl Into<String>,
        stage: StageKind,
        iteration: u32,
        passed: bool,
        duration_ms: u64,
    ) -> Self {
        Self::new(
            task_id,
            EventPayload::StageCompleted {
                stage,
                iteration,
                passed,
                duration_ms,
            },
        )
    }

    pub fn replan_requested(task_id: impl Into<String>, trigger: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            task_id,
            EventPayload::ReplanRequested {
                trigger: trigger.into(),
                reason: reason.into(),
            },
        )
    }

    pub fn replan_decision(
        task_id: impl Into<String>,
        action: ReplanAction,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            task_id,
            EventPayload::ReplanDecision {
                action,
                confidence,
                reason: reason.into(),
            },
        )
    }

    pub fn review_requested(
        task_id: impl Into<String>,
        review_id: impl Into<String>,
        reason: ReviewReason,
        qa_iterations: u32,
    ) -> Self {
        Self::new(
            task_id,
            EventPayload::ReviewRequested {
                review_id: review_id.into(),
                reason,
                qa_iterations,
            },
        )
    }

    pub fn review_resolved(
        task_id: impl Into<String>,
        review_id: impl Into<String>,
        approved: bool,
        feedback: Option<String>,
    ) -> Self {
        Self::new(
            task_id,
            EventPayload::ReviewResolved {
                review_id: review_id.into(),
                approved,
                feedback,
            },
        )
    }

    /// Stable name of the payload variant
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            EventPayload::TaskQueued => "task_queued",
            EventPayload::TaskStarted { .. } => "task_started",
            EventPayload::TaskCompleted { .. } => "task_completed",
            EventPayload::TaskFailed { .. } => "task_failed",
            EventPayload::StageStarted { .. } => "stage_started",
            EventPayload::StageCompleted { .. } => "stage_completed",
            EventPayload::ReplanRequested { .. } => "replan_requested",
            EventPayload::ReplanDecision { .. } => "replan_decision",
            EventPayload::ReviewRequested { .. } => "review_requested",
            EventPayload::ReviewResolved { .. } => "review_resolved",
        }
    }
}
