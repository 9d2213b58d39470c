//! Replanner's running view of one task

use serde::{Deserialize, Serialize};

/// Everything the trigger evaluators look at
///
/// Built by the coordinator from pool metrics and QA progress; the
/// replanner itself never reaches into live state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Task under evaluation
    pub task_id: String,

    /// Planner's estimate in minutes
    pub estimated_minutes: u32,

    /// Wall-clock minutes since dispatch
    pub elapsed_minutes: f64,

    /// QA iterations consumed
    pub iteration: u32,

    /// Configured iteration cap
    pub max_iterations: u32,

    /// Files the task declared it would touch
    #[serde(default)]
    pub expected_files: Vec<String>,

    /// Files actually modified so far
    #[serde(default)]
    pub modified_files: Vec<String>,

    /// Recent normalized error messages
    #[serde(default)]
    pub recent_errors: Vec<String>,

    /// Consecutive failing QA iterations
    pub consecutive_failures: u32,

    /// Free-text feedback from the running agent
    #[serde(default)]
    pub agent_feedback: Option<String>,
}

impl ExecutionContext {
    /// Modified paths outside the declared set
    pub fn out_of_scope_files(&self) -> Vec<&str> {
        self.modified_files
            .iter()
            .filter(|f| !self.expected_files.contains(f))
            .map(String::as_str)
            .collect()
    }

    /// elapsed / estimated; zero estimates never fire the time trigger
    pub fn time_ratio(&self) -> Option<f64> {
        if self.estimated_minutes == 0 {
            None
        } else {
            Some(self.elapsed_minutes / self.estimated_minutes as f64)
        }
    }

    /// iteration / max-iteration
    pub fn iteration_ratio(&self) -> Option<f64> {
        if self.max_iterations == 0 {
            None
        } else {
            Some(self.iteration as f64 / self.max_iterations as f64)
        }
    }
}
