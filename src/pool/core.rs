//! Agent pool core
//!
//! Bounded-concurrency dispatcher from the priority queue to task
//! workers, binding each running task to a dedicated worktree. The
//! pool owns all runtime task state and agent lifetimes; the
//! coordinator only submits work and reads snapshots.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::WorkersConfig;
use crate::domain::{AgentRole, Task, TaskStatus, generate_id};
use crate::events::{Event, EventBus};
use crate::worktree::{WorktreeInfo, WorktreeManager};

use super::queue::{PoolMetrics, QueuedTask, TaskOutcome};

/// Executes one task inside its worktree
///
/// The production worker chains coder → QA loop → merger; tests inject
/// lightweight doubles.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    async fn run(&self, task: &Task, worktree: &WorktreeInfo, cancel: &CancelToken) -> Result<TaskOutcome>;
}

/// One running agent binding
struct InFlight {
    role: AgentRole,
    cancel: CancelToken,
}

struct PoolInner {
    queue: BinaryHeap<QueuedTask>,
    tasks: HashMap<String, Task>,
    in_flight: HashMap<String, InFlight>,
    done: HashMap<String, TaskOutcome>,
    metrics: PoolMetrics,
    accepting: bool,
    seq: u64,
}

/// Bounded-concurrency scheduler over role-appropriate workers
pub struct AgentPool {
    config: WorkersConfig,
    worktrees: Arc<WorktreeManager>,
    worker: Arc<dyn TaskWorker>,
    bus: Arc<EventBus>,
    inner: Mutex<PoolInner>,
    /// Wakes the dispatcher when slots or work appear
    dispatch_notify: Notify,
    /// Wakes waiters when a task reaches a terminal state
    done_notify: Notify,
    cancel: CancelToken,
    /// Self-handle for spawned dispatcher and worker tasks
    me: std::sync::Weak<AgentPool>,
}

impl AgentPool {
    pub fn new(
        config: WorkersConfig,
        worktrees: Arc<WorktreeManager>,
        worker: Arc<dyn TaskWorker>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            worktrees,
            worker,
            bus,
            inner: Mutex::new(PoolInner {
                queue: BinaryHeap::new(),
                tasks: HashMap::new(),
                in_flight: HashMap::new(),
                done: HashMap::new(),
                metrics: PoolMetrics::default(),
                accepting: true,
                seq: 0,
            }),
            dispatch_notify: Notify::new(),
            done_notify: Notify::new(),
            cancel: CancelToken::new(),
            me: me.clone(),
        })
    }

    /// Start the dispatcher
    pub fn start(&self) {
        let Some(pool) = self.me.upgrade() else { return };
        tokio::spawn(async move {
            pool.dispatch_loop().await;
        });
    }

    /// Enqueue a task with the default (coder) pipeline
    pub async fn submit(&self, task: Task) -> Result<()> {
        self.submit_with_role(task, AgentRole::Coder).await
    }

    /// Enqueue a task for a specific role pipeline
    pub async fn submit_with_role(&self, task: Task, role: AgentRole) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.accepting {
            eyre::bail!("pool is shutting down, not accepting tasks");
        }
        if inner.tasks.contains_key(&task.id) && !inner.done.contains_key(&task.id) {
            eyre::bail!("task {} is already queued or running", task.id);
        }

        let task_id = task.id.clone();
        let priority = task.priority;

        inner.seq += 1;
        let seq = inner.seq;
        inner.queue.push(QueuedTask {
            task_id: task_id.clone(),
            priority,
            role,
            submitted_at: Instant::now(),
            seq,
        });

        let mut task = task;
        task.status = TaskStatus::Queued;
        inner.tasks.insert(task_id.clone(), task);
        inner.done.remove(&task_id);

        let depth = inner.queue.len();
        inner.metrics.queued = depth;
        inner.metrics.peak_queue_depth = inner.metrics.peak_queue_depth.max(depth);
        drop(inner);

        debug!(%task_id, %priority, "Task queued");
        self.bus.emit(Event::task_queued(&task_id));
        self.dispatch_notify.notify_waiters();
        Ok(())
    }

    async fn dispatch_loop(self: Arc<Self>) {
        info!("Agent pool dispatcher started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let next = self.try_dequeue().await;
            match next {
                Some(entry) => self.clone().launch(entry).await,
                None => {
                    tokio::select! {
                        _ = self.dispatch_notify.notified() => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        info!("Agent pool dispatcher stopped");
    }

    /// Pop the next runnable entry if a worker slot is free
    async fn try_dequeue(&self) -> Option<QueuedTask> {
        let mut inner = self.inner.lock().await;

        if inner.in_flight.len() >= self.config.max_concurrent.max(1) {
            return None;
        }

        // Respect per-role caps: skim entries whose role is saturated
        let mut skipped = Vec::new();
        let mut picked = None;

        while let Some(entry) = inner.queue.pop() {
            let role_count = inner.in_flight.values().filter(|f| f.role == entry.role).count();
            let cap = self.config.role_caps.get(&entry.role).copied().unwrap_or(usize::MAX);
            if role_count < cap {
                picked = Some(entry);
                break;
            }
            skipped.push(entry);
        }
        for entry in skipped {
            inner.queue.push(entry);
        }

        inner.metrics.queued = inner.queue.len();
        picked
    }

    /// Bind a worktree and hand the task to a worker
    async fn launch(self: Arc<Self>, entry: QueuedTask) {
        let task_id = entry.task_id.clone();

        // Binding protocol step 2: a worktree, or the task cannot run
        let worktree = match self.worktrees.create(&task_id, None).await {
            Ok(worktree) => worktree,
            Err(e) => {
                warn!(%task_id, error = %e, "Worktree creation failed");
                self.finalize(&task_id, TaskOutcome::Failed {
                    reason: format!("worktree creation failed: {}", e),
                })
                .await;
                return;
            }
        };

        let agent_id = generate_id("agent", entry.role.as_str());
        let task_cancel = CancelToken::new();

        let task_snapshot = {
            let mut inner = self.inner.lock().await;
            let Some(task) = inner
                .tasks
                .get_mut(&task_id)
                .filter(|t| t.status == TaskStatus::Queued)
            else {
                // Cancelled between dequeue and binding; release the
                // fresh worktree and move on
                drop(inner);
                let _ = self.worktrees.release(&task_id).await;
                return;
            };
            task.mark_started(&agent_id, &worktree.branch);

            inner.in_flight.insert(
                task_id.clone(),
                InFlight {
                    role: entry.role,
                    cancel: task_cancel.clone(),
                },
            );
            let in_flight = inner.in_flight.len();
            inner.metrics.in_flight = in_flight;
            inner.metrics.peak_in_flight = inner.metrics.peak_in_flight.max(in_flight);
            *inner.metrics.per_role_in_flight.entry(entry.role).or_insert(0) += 1;

            inner.tasks.get(&task_id).cloned()
        };

        let Some(task) = task_snapshot else { return };

        info!(%task_id, agent_id = %agent_id, role = %entry.role, "Task started");
        self.bus.emit(Event::task_started(&task_id, &agent_id, &worktree.branch));

        // Pool-wide cancellation cascades into the task token
        let pool_cancel = self.cancel.clone();
        let cascade_cancel = task_cancel.clone();
        tokio::spawn(async move {
            pool_cancel.cancelled().await;
            cascade_cancel.cancel();
        });

        let pool = self.clone();
        tokio::spawn(async move {
            let outcome = match pool.worker.run(&task, &worktree, &task_cancel).await {
                Ok(outcome) => outcome,
                Err(e) => TaskOutcome::Failed {
                    reason: e.to_string(),
                },
            };

            if let Err(e) = pool.worktrees.release(&task_id).await {
                warn!(%task_id, error = %e, "Worktree release failed");
            }
            pool.finalize(&task_id, outcome).await;
        });
    }

    /// Record a terminal outcome and update every ledger
    async fn finalize(&self, task_id: &str, outcome: TaskOutcome) {
        let mut inner = self.inner.lock().await;

        if let Some(in_flight) = inner.in_flight.remove(task_id) {
            let count = inner
                .metrics
                .per_role_in_flight
                .entry(in_flight.role)
                .or_insert(1);
            *count = count.saturating_sub(1);
        }
        inner.metrics.in_flight = inner.in_flight.len();

        let iterations = match &outcome {
            TaskOutcome::Completed { qa, .. } | TaskOutcome::Escalated { qa } | TaskOutcome::MergeConflict { qa, .. } => {
                qa.iterations
            }
            _ => 0,
        };

        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.iteration = task.iteration.max(iterations);
            match &outcome {
                TaskOutcome::Completed { merge_commit, .. } => task.mark_done(merge_commit.clone()),
                TaskOutcome::Escalated { .. } | TaskOutcome::MergeConflict { .. } => task.mark_awaiting_review(),
                TaskOutcome::Failed { .. } | TaskOutcome::Cancelled => task.mark_failed(),
            }
        }

        match &outcome {
            TaskOutcome::Completed { merge_commit, qa } => {
                inner.metrics.total_completed += 1;
                self.bus.emit(Event::task_completed(task_id, merge_commit, qa.iterations));
            }
            TaskOutcome::Escalated { .. } => {
                inner.metrics.total_escalated += 1;
            }
            TaskOutcome::MergeConflict { .. } => {
                inner.metrics.total_conflicts += 1;
            }
            TaskOutcome::Failed { reason } => {
                inner.metrics.total_failed += 1;
                self.bus.emit(Event::task_failed(task_id, reason));
            }
            TaskOutcome::Cancelled => {
                inner.metrics.total_failed += 1;
                self.bus.emit(Event::task_failed(task_id, "cancelled"));
            }
        }

        inner.done.insert(task_id.to_string(), outcome);
        drop(inner);

        debug!(%task_id, "Task finalized");
        self.dispatch_notify.notify_waiters();
        self.done_notify.notify_waiters();
    }

    /// Cooperatively cancel one task (queued or running)
    pub async fn cancel_task(&self, task_id: &str) {
        let queued = {
            let mut inner = self.inner.lock().await;
            if let Some(in_flight) = inner.in_flight.get(task_id) {
                in_flight.cancel.cancel();
                false
            } else if inner.tasks.get(task_id).is_some_and(|t| t.status == TaskStatus::Queued) {
                let remaining: Vec<QueuedTask> =
                    inner.queue.drain().filter(|e| e.task_id != task_id).collect();
                inner.queue = remaining.into_iter().collect();
                inner.metrics.queued = inner.queue.len();
                true
            } else {
                false
            }
        };

        if queued {
            self.finalize(task_id, TaskOutcome::Cancelled).await;
        }
    }

    /// Wait until every listed task is terminal; `None` on cancellation
    pub async fn wait_for(&self, task_ids: &[String], cancel: &CancelToken) -> Option<HashMap<String, TaskOutcome>> {
        loop {
            {
                let inner = self.inner.lock().await;
                if task_ids.iter().all(|id| inner.done.contains_key(id)) {
                    return Some(
                        task_ids
                            .iter()
                            .filter_map(|id| inner.done.get(id).map(|o| (id.clone(), o.clone())))
                            .collect(),
                    );
                }
            }

            tokio::select! {
                _ = self.done_notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Terminal outcome for a task, if it finished
    pub async fn outcome(&self, task_id: &str) -> Option<TaskOutcome> {
        self.inner.lock().await.done.get(task_id).cloned()
    }

    /// Snapshot of one task's runtime state
    pub async fn task_snapshot(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().await.tasks.get(task_id).cloned()
    }

    /// Metrics snapshot
    pub async fn metrics(&self) -> PoolMetrics {
        self.inner.lock().await.metrics.clone()
    }

    /// Drain and stop
    ///
    /// Stops accepting, lets running tasks finish until the deadline,
    /// then hard-cancels whatever remains.
    pub async fn shutdown(&self, deadline: Duration) {
        info!(?deadline, "Agent pool shutting down");
        {
            let mut inner = self.inner.lock().await;
            inner.accepting = false;
            // Queued-but-unstarted work is abandoned on shutdown
            let abandoned: Vec<String> = inner.queue.drain().map(|e| e.task_id).collect();
            inner.metrics.queued = 0;
            for task_id in &abandoned {
                if let Some(task) = inner.tasks.get_mut(task_id) {
                    task.mark_failed();
                }
                inner.done.insert(task_id.clone(), TaskOutcome::Cancelled);
            }
        }

        let drain_deadline = Instant::now() + deadline;
        loop {
            {
                let inner = self.inner.lock().await;
                if inner.in_flight.is_empty() {
                    break;
                }
            }
            if Instant::now() >= drain_deadline {
                warn!("Shutdown deadline elapsed, hard-cancelling remaining work");
                self.cancel.cancel();
                break;
            }
            let remaining = drain_deadline.saturating_duration_since(Instant::now());
            let _ = tokio::time::timeout(remaining.min(Duration::from_millis(100)), self.done_notify.notified()).await;
        }

        // Give hard-cancelled workers a moment to observe the token
        let grace = Instant::now() + Duration::from_secs(2);
        while Instant::now() < grace {
            let empty = self.inner.lock().await.in_flight.is_empty();
            if empty {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        self.cancel.cancel();
        info!("Agent pool stopped");
    }
}
