//! QA loop engine
//!
//! Drives one task's changes through build → lint → test → review until
//! every stage passes or the iteration cap is reached. Failures feed
//! the coder's repair path; cap exhaustion escalates to human review.
//! The engine never throws to communicate a stage failure - only
//! infrastructure faults propagate as errors.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::events::{Event, EventBus};
use crate::review::{HumanReviewService, ReviewContext, ReviewReason};

use super::runner::StageRunner;
use super::stage::{NormalizedError, StageResult};

/// Repairs the worktree given normalized stage errors
///
/// Implemented by the coder agent; test doubles stand in for it in the
/// engine's own tests.
#[async_trait]
pub trait IssueFixer: Send + Sync {
    async fn fix_issues(&self, errors: &[NormalizedError], cancel: &CancelToken) -> Result<()>;
}

/// Terminal outcome of the QA loop for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResult {
    /// All four stages passed on the final iteration
    pub success: bool,

    /// Iterations consumed (1-based; capped by configuration)
    pub iterations: u32,

    /// Every stage result in execution order, across all iterations
    pub stages: Vec<StageResult>,

    /// The iteration cap was reached with a stage still failing
    pub escalated: bool,

    /// Errors from the last failing stage when not successful
    pub final_errors: Vec<NormalizedError>,
}

/// How a QA loop invocation ended
#[derive(Debug)]
pub enum QaOutcome {
    /// Ran to a terminal result (success or escalation)
    Finished(QaResult),
    /// Cancelled at a stage boundary; the result so far is discarded
    Cancelled,
}

/// Sequences the four stages and the repair path
pub struct QaLoopEngine {
    stages: Vec<Box<dyn StageRunner>>,
    max_iterations: u32,
    bus: Arc<EventBus>,
    review: Option<Arc<HumanReviewService>>,
}

impl QaLoopEngine {
    /// Create an engine over stage runners in pipeline order
    pub fn new(stages: Vec<Box<dyn StageRunner>>, max_iterations: u32, bus: Arc<EventBus>) -> Self {
        Self {
            stages,
            max_iterations,
            bus,
            review: None,
        }
    }

    /// Attach the human review service used on escalation
    pub fn with_review_service(mut self, review: Arc<HumanReviewService>) -> Self {
        self.review = Some(review);
        self
    }

    /// Run the loop for one task
    ///
    /// Each iteration runs the stages in order, each at most once. The
    /// first failing stage short-circuits into the repair path. The
    /// loop may still succeed on the final permitted iteration; one
    /// more needed repair escalates instead.
    pub async fn run(
        &self,
        task_id: &str,
        workdir: &Path,
        selector: Option<&str>,
        fixer: &dyn IssueFixer,
        cancel: &CancelToken,
    ) -> Result<QaOutcome> {
        let mut trail: Vec<StageResult> = Vec::new();
        let mut iteration: u32 = 1;

        info!(%task_id, max_iterations = self.max_iterations, "QA loop starting");

        loop {
            let mut failed_errors: Option<Vec<NormalizedError>> = None;

            for runner in &self.stages {
                // Cancellation is observed at stage boundaries only
                if cancel.is_cancelled() {
                    info!(%task_id, iteration, "QA loop cancelled");
                    return Ok(QaOutcome::Cancelled);
                }

                let stage = runner.kind();
                self.bus.emit(Event::stage_started(task_id, stage, iteration));

                let result = runner.run(workdir, selector).await?;

                self.bus
                    .emit(Event::stage_completed(task_id, stage, iteration, result.passed, result.duration_ms));
                debug!(%task_id, %stage, iteration, passed = result.passed, "Stage finished");

                let passed = result.passed;
                let errors = result.errors.clone();
                trail.push(result);

                if !passed {
                    failed_errors = Some(errors);
                    break;
                }
            }

            let Some(errors) = failed_errors else {
                info!(%task_id, iteration, "QA loop succeeded");
                return Ok(QaOutcome::Finished(QaResult {
                    success: true,
                    iterations: iteration,
                    stages: trail,
                    escalated: false,
                    final_errors: Vec::new(),
                }));
            };

            if iteration >= self.max_iterations {
                warn!(%task_id, iteration, "QA iteration cap reached, escalating");
                if let Some(review) = &self.review {
                    review
                        .request(
                            task_id,
                            ReviewReason::QaExhausted,
                            ReviewContext {
                                qa_iterations: iteration,
                                errors: errors.clone(),
                                suggested_action: Some("inspect the last failing stage".to_string()),
                                conflict_files: Vec::new(),
                            },
                        )
                        .await?;
                }

                return Ok(QaOutcome::Finished(QaResult {
                    success: false,
                    iterations: iteration,
                    stages: trail,
                    escalated: true,
                    final_errors: errors,
                }));
            }

            if cancel.is_cancelled() {
                info!(%task_id, iteration, "QA loop cancelled before repair");
                return Ok(QaOutcome::Cancelled);
            }

            debug!(%task_id, iteration, error_count = errors.len(), "Invoking repair");
            fixer.fix_issues(&errors, cancel).await?;
            iteration += 1;
        }
    }
}
