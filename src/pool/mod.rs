//! Agent pool: bounded-concurrency task dispatch with worktree binding

pub mod core;
pub mod queue;

pub use core::{AgentPool, TaskWorker};
pub use queue::{PoolMetrics, QueuedTask, TaskOutcome};
