//! Nexus coordinator
//!
//! Top-level composition and lifecycle owner: decomposes submitted
//! features, resolves waves, annotates estimates, drives waves through
//! the agent pool in order, and reacts to replan decisions and review
//! resolutions. The coordinator is the only component that translates
//! task failure into plan-level action.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bridge::submit_wave;
use crate::cancel::CancelToken;
use crate::domain::{Feature, Task, TaskStatus, generate_id};
use crate::events::{EventBus, EventPayload, Subscription};
use crate::planning::{TaskDecomposer, TimeEstimator, resolve_waves};
use crate::pool::{AgentPool, TaskOutcome};
use crate::replan::{ExecutionContext, ReplanAction, Replanner};
use crate::review::{HumanReviewService, ReviewContext, ReviewReason};
use crate::store::{CheckpointStore, PlanRecord};
use crate::worktree::WorktreeManager;

use super::plan::{PlanRuntime, PlanState, PlanStatus};

/// How often in-flight tasks are re-evaluated against replan triggers
const MONITOR_INTERVAL: Duration = Duration::from_secs(15);

/// Top-level façade composing planner, pool, replanner, and review
pub struct NexusCoordinator {
    decomposer: Arc<TaskDecomposer>,
    estimator: Arc<TimeEstimator>,
    pool: Arc<AgentPool>,
    worktrees: Arc<WorktreeManager>,
    review: Arc<HumanReviewService>,
    replanner: Arc<Replanner>,
    bus: Arc<EventBus>,
    store: Arc<dyn CheckpointStore>,
    qa_max_iterations: u32,

    plans: Mutex<HashMap<String, PlanRuntime>>,
    accepting: std::sync::atomic::AtomicBool,
    event_subscription: Mutex<Option<Subscription>>,
    /// Self-handle for spawned plan drivers and the event loop
    me: std::sync::Weak<NexusCoordinator>,
}

impl NexusCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        decomposer: Arc<TaskDecomposer>,
        estimator: Arc<TimeEstimator>,
        pool: Arc<AgentPool>,
        worktrees: Arc<WorktreeManager>,
        review: Arc<HumanReviewService>,
        replanner: Arc<Replanner>,
        bus: Arc<EventBus>,
        store: Arc<dyn CheckpointStore>,
        qa_max_iterations: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            decomposer,
            estimator,
            pool,
            worktrees,
            review,
            replanner,
            bus,
            store,
            qa_max_iterations,
            plans: Mutex::new(HashMap::new()),
            accepting: std::sync::atomic::AtomicBool::new(true),
            event_subscription: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Start the pool dispatcher and the coordinator's event loop
    pub async fn start(&self) {
        self.pool.start();

        let (subscription, mut events) = self.bus.channel_subscriber();
        *self.event_subscription.lock().await = Some(subscription);

        let Some(coordinator) = self.me.upgrade() else { return };
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match &event.payload {
                    EventPayload::ReplanDecision { action, .. } => {
                        coordinator.apply_replan_decision(&event.task_id, *action).await;
                    }
                    EventPayload::ReviewResolved {
                        review_id,
                        approved,
                        feedback,
                    } => {
                        coordinator
                            .handle_review_resolution(&event.task_id, review_id, *approved, feedback.clone())
                            .await;
                    }
                    _ => {}
                }
            }
        });
    }

    /// Decompose, resolve, estimate, and start driving a feature
    ///
    /// Returns the plan handle; the plan runs in the background.
    pub async fn submit_feature(&self, feature: Feature) -> Result<String> {
        if !self.accepting.load(std::sync::atomic::Ordering::SeqCst) {
            eyre::bail!("coordinator is shutting down, not accepting features");
        }

        info!(feature_id = %feature.id, title = %feature.title, "Feature submitted");

        let mut tasks = self.decomposer.decompose(&feature).await?;
        for task in &mut tasks {
            if task.estimated_minutes == 0 {
                task.estimated_minutes = self.estimator.estimate(task);
            }
        }

        // A cyclic plan is never partially scheduled
        let waves = resolve_waves(&tasks).context("refusing to schedule a cyclic plan")?;

        let plan_id = generate_id("plan", &feature.title);
        self.store
            .put_plan(&PlanRecord {
                plan_id: plan_id.clone(),
                feature: feature.clone(),
                waves: waves.clone(),
                task_ids: tasks.iter().map(|t| t.id.clone()).collect(),
            })
            .await?;
        for task in &tasks {
            self.store.put_task(task).await?;
        }

        info!(
            %plan_id,
            tasks = tasks.len(),
            waves = waves.waves.len(),
            "Plan resolved"
        );

        {
            let mut plans = self.plans.lock().await;
            plans.insert(plan_id.clone(), PlanRuntime::new(feature, waves, tasks));
        }

        let coordinator = self
            .me
            .upgrade()
            .ok_or_else(|| eyre::eyre!("coordinator is being torn down"))?;
        let driver_plan_id = plan_id.clone();
        tokio::spawn(async move {
            coordinator.run_plan(driver_plan_id).await;
        });

        Ok(plan_id)
    }

    /// Drive one plan's waves in order
    async fn run_plan(self: Arc<Self>, plan_id: String) {
        let (waves, cancel) = {
            let plans = self.plans.lock().await;
            let Some(plan) = plans.get(&plan_id) else { return };
            (plan.waves.clone(), plan.cancel.clone())
        };

        // Failed or blocked tasks poison their transitive dependents
        let mut unmergeable: HashSet<String> = HashSet::new();

        for (k, wave) in waves.waves.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            debug!(%plan_id, wave = k, tasks = wave.len(), "Starting wave");

            let submitted = {
                let mut plans = self.plans.lock().await;
                let Some(plan) = plans.get_mut(&plan_id) else { return };

                let mut runnable: HashMap<String, Task> = HashMap::new();
                for task_id in &wave.tasks {
                    let Some(task) = plan.tasks.get_mut(task_id) else { continue };
                    if task.deps.iter().any(|dep| unmergeable.contains(dep)) {
                        debug!(%task_id, "Prerequisite unavailable, marking blocked");
                        task.mark_blocked();
                        unmergeable.insert(task_id.clone());
                    } else {
                        runnable.insert(task_id.clone(), task.clone());
                    }
                }
                runnable
            };

            let mut submitted_ids = Vec::new();
            for task_id in &wave.tasks {
                if submitted.contains_key(task_id) {
                    submitted_ids.push(task_id.clone());
                }
            }
            if !submitted_ids.is_empty() {
                let wave_order = crate::domain::Wave::new(submitted_ids.clone());
                if let Err(e) = submit_wave(&self.pool, &wave_order, &submitted).await {
                    warn!(%plan_id, wave = k, error = %e, "Wave submission failed");
                    break;
                }
            }

            // Wave k+1 starts only after every dispatched task terminated
            let outcomes = match self.wait_for_wave(&submitted_ids, &cancel).await {
                Some(outcomes) => outcomes,
                None => break, // cancelled
            };

            {
                let mut plans = self.plans.lock().await;
                let Some(plan) = plans.get_mut(&plan_id) else { return };

                for (task_id, outcome) in &outcomes {
                    if let Some(snapshot) = self.pool.task_snapshot(task_id).await {
                        // Feed the estimator from real durations
                        if let (Some(started), Some(finished), TaskOutcome::Completed { .. }) =
                            (snapshot.started_at, snapshot.finished_at, outcome)
                        {
                            let actual_minutes = (finished - started) as f64 / 60_000.0;
                            self.estimator.record_outcome(snapshot.estimated_minutes, actual_minutes);
                        }
                        plan.tasks.insert(task_id.clone(), snapshot);
                    }
                    if !outcome.is_success() {
                        unmergeable.insert(task_id.clone());
                    }
                    plan.outcomes.insert(task_id.clone(), outcome.clone());
                }
                plan.waves_completed = k + 1;
            }
        }

        let mut plans = self.plans.lock().await;
        if let Some(plan) = plans.get_mut(&plan_id) {
            plan.state = if plan.cancel.is_cancelled() {
                PlanState::Cancelled
            } else {
                PlanState::Completed
            };
            info!(%plan_id, state = ?plan.state, "Plan finished");
        }
    }

    /// Wait for a wave while periodically evaluating replan triggers
    async fn wait_for_wave(
        &self,
        task_ids: &[String],
        cancel: &CancelToken,
    ) -> Option<HashMap<String, TaskOutcome>> {
        if task_ids.is_empty() {
            return Some(HashMap::new());
        }

        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.reset();

        loop {
            tokio::select! {
                outcomes = self.pool.wait_for(task_ids, cancel) => return outcomes,
                _ = ticker.tick() => self.monitor_tick(task_ids).await,
            }
        }
    }

    /// Evaluate replan triggers for still-running tasks
    async fn monitor_tick(&self, task_ids: &[String]) {
        for task_id in task_ids {
            let Some(task) = self.pool.task_snapshot(task_id).await else { continue };
            if task.status != TaskStatus::InProgress {
                continue;
            }
            let Some(started_at) = task.started_at else { continue };

            let elapsed_minutes = (crate::domain::now_ms() - started_at) as f64 / 60_000.0;
            let ctx = ExecutionContext {
                task_id: task.id.clone(),
                estimated_minutes: task.estimated_minutes,
                elapsed_minutes,
                iteration: task.iteration,
                max_iterations: self.qa_max_iterations,
                expected_files: task.files.clone(),
                modified_files: Vec::new(),
                recent_errors: Vec::new(),
                consecutive_failures: 0,
                agent_feedback: None,
            };

            // Decisions come back through the event loop
            self.replanner.evaluate_and_publish(&ctx).await;
        }
    }

    /// React to a replan decision
    ///
    /// Policy (what to do) came from the replanner; this is mechanism.
    async fn apply_replan_decision(&self, task_id: &str, action: ReplanAction) {
        info!(%task_id, %action, "Applying replan decision");

        match action {
            ReplanAction::Continue => {}
            ReplanAction::Abort => {
                // Eager cancellation; the pool token is the grace period
                self.pool.cancel_task(task_id).await;
            }
            ReplanAction::Escalate => {
                let context = ReviewContext {
                    suggested_action: Some("replanner escalation".to_string()),
                    ..Default::default()
                };
                if let Err(e) = self.review.request(task_id, ReviewReason::Manual, context).await {
                    warn!(%task_id, error = %e, "Escalation review request failed");
                }
            }
            ReplanAction::ReEstimate => {
                let mut plans = self.plans.lock().await;
                for plan in plans.values_mut() {
                    if let Some(task) = plan.tasks.get_mut(task_id) {
                        let refreshed = self.estimator.estimate(task);
                        debug!(%task_id, old = task.estimated_minutes, new = refreshed, "Re-estimated");
                        task.estimated_minutes = refreshed.max(task.estimated_minutes);
                    }
                }
            }
            ReplanAction::Split => {
                // Obsolete in-flight work is cancelled eagerly, then the
                // task is re-decomposed and its parts resubmitted
                self.pool.cancel_task(task_id).await;
                self.split_and_resubmit(task_id).await;
            }
        }
    }

    /// Re-decompose one task and feed the parts back to the pool
    async fn split_and_resubmit(&self, task_id: &str) {
        let original = {
            let plans = self.plans.lock().await;
            plans.values().find_map(|p| p.tasks.get(task_id).cloned())
        };
        let Some(original) = original else {
            warn!(%task_id, "Split requested for an unknown task");
            return;
        };

        let as_feature = Feature::new(&original.title, &original.description);
        let replacements = match self.decomposer.decompose(&as_feature).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(%task_id, error = %e, "Split decomposition failed");
                return;
            }
        };

        info!(%task_id, parts = replacements.len(), "Task split into replacements");

        {
            let mut plans = self.plans.lock().await;
            for plan in plans.values_mut() {
                if plan.tasks.contains_key(task_id) {
                    for replacement in &replacements {
                        plan.tasks.insert(replacement.id.clone(), replacement.clone());
                    }
                }
            }
        }

        for replacement in replacements {
            let _ = self.store.put_task(&replacement).await;
            if let Err(e) = self.pool.submit(replacement).await {
                warn!(error = %e, "Replacement submission failed");
            }
        }
    }

    /// React to a human review resolution
    async fn handle_review_resolution(
        &self,
        task_id: &str,
        review_id: &str,
        approved: bool,
        feedback: Option<String>,
    ) {
        if approved {
            info!(%task_id, %review_id, "Review approved, re-dispatching task");

            let task = {
                let plans = self.plans.lock().await;
                plans.values().find_map(|p| p.tasks.get(task_id).cloned())
            };
            let Some(mut task) = task else { return };

            // The old binding is stale; reclaim it before a fresh attempt
            self.worktrees.purge(task_id).await;
            task.status = TaskStatus::Pending;
            task.iteration = 0;
            task.merge_commit = None;
            if let Err(e) = self.pool.submit(task).await {
                warn!(%task_id, error = %e, "Re-dispatch after approval failed");
            }
        } else {
            // Rejection aborts the task; the feedback rides along in the log
            warn!(
                %task_id,
                %review_id,
                feedback = feedback.as_deref().unwrap_or(""),
                "Review rejected, aborting task"
            );
            let mut plans = self.plans.lock().await;
            for plan in plans.values_mut() {
                if let Some(task) = plan.tasks.get_mut(task_id) {
                    task.mark_failed();
                }
            }
        }
    }

    /// Status snapshot for one plan
    pub async fn status(&self, plan_id: &str) -> Result<PlanStatus> {
        let mut plans = self.plans.lock().await;
        let plan = plans
            .get_mut(plan_id)
            .ok_or_else(|| eyre::eyre!("unknown plan: {}", plan_id))?;

        // Refresh live task state from the pool
        let ids: Vec<String> = plan.tasks.keys().cloned().collect();
        for task_id in ids {
            if let Some(snapshot) = self.pool.task_snapshot(&task_id).await {
                plan.tasks.insert(task_id, snapshot);
            }
        }

        Ok(plan.status(plan_id))
    }

    /// Cooperatively abort every in-flight task of a plan
    ///
    /// After this returns, no further merges happen for the plan.
    pub async fn cancel(&self, plan_id: &str) -> Result<()> {
        info!(%plan_id, "Cancelling plan");

        let (task_ids, cancel) = {
            let mut plans = self.plans.lock().await;
            let plan = plans
                .get_mut(plan_id)
                .ok_or_else(|| eyre::eyre!("unknown plan: {}", plan_id))?;
            plan.state = PlanState::Cancelled;
            plan.cancel.cancel();
            (plan.tasks.keys().cloned().collect::<Vec<_>>(), plan.cancel.clone())
        };

        for task_id in &task_ids {
            self.pool.cancel_task(task_id).await;
        }

        // Wait for in-flight tasks to reach a terminal state so no
        // merge can land after we return
        let in_flight: Vec<String> = {
            let mut still_running = Vec::new();
            for task_id in &task_ids {
                if let Some(task) = self.pool.task_snapshot(task_id).await
                    && task.status == TaskStatus::InProgress
                {
                    still_running.push(task_id.clone());
                }
            }
            still_running
        };
        if !in_flight.is_empty() {
            let wait_token = CancelToken::new();
            let _ = tokio::time::timeout(Duration::from_secs(30), self.pool.wait_for(&in_flight, &wait_token)).await;
        }
        drop(cancel);

        Ok(())
    }

    /// Drain and stop: no new features, running work finishes or times
    /// out, then every worktree is reclaimed
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        info!(?deadline, "Coordinator shutting down");
        self.accepting.store(false, std::sync::atomic::Ordering::SeqCst);

        {
            let plans = self.plans.lock().await;
            for plan in plans.values() {
                if plan.state == PlanState::Running {
                    plan.cancel.cancel();
                }
            }
        }

        self.pool.shutdown(deadline).await;
        let reclaimed = self.worktrees.remove_all().await;
        info!(reclaimed, "Coordinator stopped");
        Ok(())
    }
}
