//! Coordinator: top-level composition and public API

pub mod core;
pub mod plan;

pub use core::NexusCoordinator;
pub use plan::{PlanState, PlanStatus};

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::bridge::AgentTaskWorker;
use crate::events::create_event_bus;
use crate::llm::{LlmClient, LlmService};
use crate::planning::{TaskDecomposer, TimeEstimator};
use crate::pool::AgentPool;
use crate::replan::Replanner;
use crate::review::HumanReviewService;
use crate::store::MemoryCheckpointStore;
use crate::vcs::GitAdapter;
use crate::worktree::WorktreeManager;

/// Composition root: wire a coordinator over a repository
///
/// Everything transient (checkpoints, review queue) uses the in-memory
/// stores; durable backends slot in through the same traits.
pub fn build(config: &Config, repo_root: &Path, llm: Arc<dyn LlmClient>) -> Arc<NexusCoordinator> {
    let bus = create_event_bus();
    let git = GitAdapter::new(repo_root);
    let retry = config.llm.retry.policy();

    let llm_service = Arc::new(LlmService::new(llm.clone(), retry.clone()));
    let estimator = Arc::new(TimeEstimator::new());
    let decomposer = Arc::new(TaskDecomposer::new(
        llm,
        retry,
        estimator.clone(),
        config.planner.task_max_minutes,
    ));

    let worktrees = Arc::new(WorktreeManager::new(config.worktree.clone(), git.clone()));
    let review = Arc::new(HumanReviewService::in_memory(bus.clone()));
    let replanner = Arc::new(Replanner::new(config.replan.clone(), bus.clone()));

    let loop_config = crate::agents::AgentLoopConfig {
        command_timeout: config.process.default_timeout(),
        ..Default::default()
    };
    let worker = Arc::new(
        AgentTaskWorker::new(
            llm_service,
            git,
            config.qa.clone(),
            bus.clone(),
            review.clone(),
            replanner.clone(),
            "main",
        )
        .with_loop_config(loop_config),
    );

    let pool = AgentPool::new(config.workers.clone(), worktrees.clone(), worker, bus.clone());

    NexusCoordinator::new(
        decomposer,
        estimator,
        pool,
        worktrees,
        review,
        replanner,
        bus,
        Arc::new(MemoryCheckpointStore::new()),
        config.qa.max_iterations,
    )
}
