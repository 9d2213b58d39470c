//! Bridges
//!
//! Glue between the planner's wave output and the pool's input, and
//! between agents and their worktrees: `AgentTaskWorker` is the
//! production task pipeline (coder → optional tester → QA loop →
//! merger), and `submit_wave` feeds one resolved wave to the pool in
//! its stable order. Everything here is indirection over stable IDs;
//! no component holds a back-reference to another.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use tracing::{info, warn};

use crate::agents::{AgentLoopConfig, CoderAgent, MergeReport, MergerAgent, ReviewerAgent, TesterAgent};
use crate::cancel::CancelToken;
use crate::config::QaConfig;
use crate::domain::{Task, Wave};
use crate::events::EventBus;
use crate::llm::LlmService;
use crate::pool::{AgentPool, TaskOutcome, TaskWorker};
use crate::qa::{BuildRunner, LintRunner, QaLoopEngine, QaOutcome, ReviewRunner, StageRunner, TestRunner};
use crate::replan::Replanner;
use crate::review::{HumanReviewService, ReviewContext, ReviewReason};
use crate::vcs::GitAdapter;
use crate::worktree::WorktreeInfo;

/// Submit one wave's tasks to the pool in stable order
///
/// The wave already encodes priority-then-insertion order; submission
/// preserves it, so the pool's FIFO tie-break matches the resolver's.
pub async fn submit_wave(pool: &AgentPool, wave: &Wave, tasks: &HashMap<String, Task>) -> Result<Vec<String>> {
    let mut submitted = Vec::with_capacity(wave.len());
    for task_id in &wave.tasks {
        let Some(task) = tasks.get(task_id) else {
            warn!(%task_id, "Wave references an unknown task, skipping");
            continue;
        };
        pool.submit(task.clone()).await?;
        submitted.push(task_id.clone());
    }
    Ok(submitted)
}

/// Production task pipeline behind the pool
pub struct AgentTaskWorker {
    llm: Arc<LlmService>,
    git: GitAdapter,
    qa_config: QaConfig,
    bus: Arc<EventBus>,
    review: Arc<HumanReviewService>,
    replanner: Arc<Replanner>,
    integration_branch: String,
    loop_config: AgentLoopConfig,
    tester_enabled: bool,
}

impl AgentTaskWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<LlmService>,
        git: GitAdapter,
        qa_config: QaConfig,
        bus: Arc<EventBus>,
        review: Arc<HumanReviewService>,
        replanner: Arc<Replanner>,
        integration_branch: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            git,
            qa_config,
            bus,
            review,
            replanner,
            integration_branch: integration_branch.into(),
            loop_config: AgentLoopConfig::default(),
            tester_enabled: false,
        }
    }

    pub fn with_loop_config(mut self, config: AgentLoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    /// Run the tester agent between coder and QA
    pub fn with_tester(mut self) -> Self {
        self.tester_enabled = true;
        self
    }

    fn build_stages(&self) -> Vec<Box<dyn StageRunner>> {
        let timeout = self.qa_config.stage_timeout();
        let reviewer = Arc::new(ReviewerAgent::new(self.llm.clone()));

        vec![
            Box::new(BuildRunner::new(&self.qa_config.build_command, timeout)),
            Box::new(LintRunner::new(&self.qa_config.lint_command, timeout)),
            Box::new(TestRunner::new(&self.qa_config.test_command, timeout)),
            Box::new(ReviewRunner::new(
                self.git.clone(),
                self.integration_branch.clone(),
                reviewer,
                timeout,
            )),
        ]
    }
}

#[async_trait]
impl TaskWorker for AgentTaskWorker {
    async fn run(&self, task: &Task, worktree: &WorktreeInfo, cancel: &CancelToken) -> Result<TaskOutcome> {
        self.replanner.monitor(&task.id).await;
        let result = self.run_pipeline(task, worktree, cancel).await;
        self.replanner.unmonitor(&task.id).await;
        result
    }
}

impl AgentTaskWorker {
    async fn run_pipeline(&self, task: &Task, worktree: &WorktreeInfo, cancel: &CancelToken) -> Result<TaskOutcome> {
        // 1. Coder makes the change
        let coder = CoderAgent::new(self.llm.clone(), task.clone(), worktree)
            .with_replanner(self.replanner.clone())
            .with_loop_config(self.loop_config.clone());

        let coder_result = coder.execute(cancel).await?;
        if cancel.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }
        if !coder_result.success {
            return Ok(TaskOutcome::Failed {
                reason: "coder did not complete the change".to_string(),
            });
        }

        // 2. Optional tester pass over the coder's output
        if self.tester_enabled {
            let tester = TesterAgent::new(self.llm.clone(), task.clone(), worktree)
                .with_loop_config(self.loop_config.clone());
            let tester_result = tester.execute(&coder_result.output, cancel).await?;
            if cancel.is_cancelled() {
                return Ok(TaskOutcome::Cancelled);
            }
            if !tester_result.success {
                warn!(task_id = %task.id, "Tester did not complete; continuing with coder output only");
            }
        }

        // 3. Self-healing QA over the worktree, with the coder as fixer
        let engine = QaLoopEngine::new(self.build_stages(), self.qa_config.max_iterations, self.bus.clone())
            .with_review_service(self.review.clone());

        let qa = match engine
            .run(&task.id, &worktree.path, task.test_selector.as_deref(), &coder, cancel)
            .await?
        {
            QaOutcome::Cancelled => return Ok(TaskOutcome::Cancelled),
            QaOutcome::Finished(qa) => qa,
        };

        if qa.escalated {
            return Ok(TaskOutcome::Escalated { qa });
        }
        if !qa.success {
            let reason = qa
                .final_errors
                .first()
                .map(|e| e.render())
                .unwrap_or_else(|| "QA failed".to_string());
            return Ok(TaskOutcome::Failed { reason });
        }

        // 4. Merger integrates the approved branch
        let merger = MergerAgent::new(self.git.clone(), self.integration_branch.clone());
        match merger.merge(task, worktree).await? {
            MergeReport::Merged { commit } => {
                info!(task_id = %task.id, %commit, "Task pipeline completed");
                Ok(TaskOutcome::Completed { merge_commit: commit, qa })
            }
            MergeReport::Conflict { files } => {
                self.review
                    .request(
                        &task.id,
                        ReviewReason::MergeConflict,
                        ReviewContext {
                            qa_iterations: qa.iterations,
                            errors: qa.final_errors.clone(),
                            suggested_action: Some("resolve the merge conflict manually".to_string()),
                            conflict_files: files.clone(),
                        },
                    )
                    .await?;
                Ok(TaskOutcome::MergeConflict { files, qa })
            }
        }
    }
}
