//! Plan types owned by the coordinator

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::domain::{Feature, Task, TaskStatus, WavePlan};
use crate::pool::TaskOutcome;

/// Lifecycle of one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Running,
    Completed,
    Cancelled,
}

/// Status snapshot exposed through the public API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStatus {
    pub plan_id: String,
    pub state: PlanState,
    pub waves_total: usize,
    pub waves_completed: usize,

    /// Per-task status
    pub tasks: HashMap<String, TaskStatus>,

    /// Tasks merged to the integration branch
    pub completed: Vec<String>,

    /// Terminal failures
    pub failed: Vec<String>,

    /// Never dispatched because a prerequisite failed
    pub blocked: Vec<String>,

    /// Escalated to human review
    pub awaiting_review: Vec<String>,
}

impl PlanStatus {
    pub fn is_done(&self) -> bool {
        self.state != PlanState::Running
    }
}

/// Coordinator-internal runtime for one plan
pub struct PlanRuntime {
    pub feature: Feature,
    pub waves: WavePlan,
    pub tasks: HashMap<String, Task>,
    pub state: PlanState,
    pub waves_completed: usize,
    pub outcomes: HashMap<String, TaskOutcome>,
    pub cancel: CancelToken,
}

impl PlanRuntime {
    pub fn new(feature: Feature, waves: WavePlan, tasks: Vec<Task>) -> Self {
        Self {
            feature,
            waves,
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            state: PlanState::Running,
            waves_completed: 0,
            outcomes: HashMap::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Build the public status snapshot
    pub fn status(&self, plan_id: &str) -> PlanStatus {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut blocked = Vec::new();
        let mut awaiting_review = Vec::new();

        let mut tasks = HashMap::with_capacity(self.tasks.len());
        for (id, task) in &self.tasks {
            tasks.insert(id.clone(), task.status);
            match task.status {
                TaskStatus::Done => completed.push(id.clone()),
                TaskStatus::Failed => failed.push(id.clone()),
                TaskStatus::Blocked => blocked.push(id.clone()),
                TaskStatus::AwaitingReview => awaiting_review.push(id.clone()),
                _ => {}
            }
        }
        completed.sort();
        failed.sort();
        blocked.sort();
        awaiting_review.sort();

        PlanStatus {
            plan_id: plan_id.to_string(),
            state: self.state,
            waves_total: self.waves.waves.len(),
            waves_completed: self.waves_completed,
            tasks,
            completed,
            failed,
            blocked,
            awaiting_review,
        }
    }
}
