//! Tool error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path {path} escapes the worktree {worktree}")]
    SandboxViolation { path: PathBuf, worktree: PathBuf },

    #[error("Path {path} is outside this agent's write scope ({scope})")]
    WriteScopeViolation { path: PathBuf, scope: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
