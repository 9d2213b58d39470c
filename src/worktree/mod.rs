//! Per-task worktree isolation

pub mod manager;

pub use manager::{WorktreeError, WorktreeInfo, WorktreeManager};
