//! ToolContext - execution context for tools
//!
//! Each agent gets a context scoped to its worktree. File operations
//! cannot escape the worktree, and the write scope narrows further for
//! roles that may only touch test files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::replan::Replanner;

use super::error::ToolError;

/// Which paths a context may write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteScope {
    /// Anywhere inside the worktree (coder)
    #[default]
    Worktree,
    /// Test files only (tester)
    TestsOnly,
    /// No writes at all (reviewer)
    ReadOnly,
}

/// Execution context for tools - scoped to a single agent run
#[derive(Clone)]
pub struct ToolContext {
    /// Worktree path - all file ops constrained here
    pub worktree: PathBuf,

    /// Task being worked on
    pub task_id: String,

    /// Write constraint for this agent role
    pub write_scope: WriteScope,

    /// Replanner handle for the `request_replan` tool
    pub replanner: Option<Arc<Replanner>>,

    /// Set when the agent calls `complete_task`
    completed: Arc<AtomicBool>,

    /// Completion summary, when provided
    summary: Arc<Mutex<Option<String>>>,

    /// Files written through this context
    writes: Arc<Mutex<Vec<PathBuf>>>,
}

impl ToolContext {
    pub fn new(worktree: PathBuf, task_id: impl Into<String>) -> Self {
        Self {
            worktree,
            task_id: task_id.into(),
            write_scope: WriteScope::Worktree,
            replanner: None,
            completed: Arc::new(AtomicBool::new(false)),
            summary: Arc::new(Mutex::new(None)),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_write_scope(mut self, scope: WriteScope) -> Self {
        self.write_scope = scope;
        self
    }

    pub fn with_replanner(mut self, replanner: Arc<Replanner>) -> Self {
        self.replanner = Some(replanner);
        self
    }

    /// Mark the task complete (called by the `complete_task` tool)
    pub async fn mark_completed(&self, summary: Option<String>) {
        self.completed.store(true, Ordering::SeqCst);
        *self.summary.lock().await = summary;
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub async fn completion_summary(&self) -> Option<String> {
        self.summary.lock().await.clone()
    }

    /// Record a write for change tracking
    pub async fn record_write(&self, path: PathBuf) {
        let mut writes = self.writes.lock().await;
        if !writes.contains(&path) {
            writes.push(path);
        }
    }

    /// Files written through this context, worktree-relative
    pub async fn written_files(&self) -> Vec<String> {
        let writes = self.writes.lock().await;
        writes
            .iter()
            .map(|p| {
                p.strip_prefix(&self.worktree)
                    .unwrap_or(p)
                    .display()
                    .to_string()
            })
            .collect()
    }

    fn normalize_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.worktree.join(path) }
    }

    /// Validate a path for reading (must stay inside the worktree)
    pub fn validate_read(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let normalized = self.normalize_path(path);

        // Canonicalize what exists so symlinks cannot escape
        let canonical = if normalized.exists() {
            normalized.canonicalize().unwrap_or_else(|_| normalized.clone())
        } else if let Some(parent) = normalized.parent().filter(|p| p.exists()) {
            let canonical_parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
            canonical_parent.join(normalized.file_name().unwrap_or_default())
        } else {
            normalized.clone()
        };

        let worktree = self.worktree.canonicalize().unwrap_or_else(|_| self.worktree.clone());
        if canonical.starts_with(&worktree) {
            Ok(canonical)
        } else {
            Err(ToolError::SandboxViolation {
                path: path.to_path_buf(),
                worktree: self.worktree.clone(),
            })
        }
    }

    /// Validate a path for writing (sandbox plus the role's write scope)
    pub fn validate_write(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let resolved = self.validate_read(path)?;

        match self.write_scope {
            WriteScope::Worktree => Ok(resolved),
            WriteScope::ReadOnly => Err(ToolError::WriteScopeViolation {
                path: path.to_path_buf(),
                scope: "read-only".to_string(),
            }),
            WriteScope::TestsOnly => {
                if is_test_path(&resolved) {
                    Ok(resolved)
                } else {
                    Err(ToolError::WriteScopeViolation {
                        path: path.to_path_buf(),
                        scope: "test files only".to_string(),
                    })
                }
            }
        }
    }
}

/// Heuristic for "is this a test file"
fn is_test_path(path: &Path) -> bool {
    let in_test_dir = path
        .components()
        .any(|c| matches!(c.as_os_str().to_str(), Some("tests") | Some("test")));
    let test_file = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.starts_with("test_") || s.ends_with("_test") || s.ends_with("_tests"));
    in_test_dir || test_file
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("worktree", &self.worktree)
            .field("task_id", &self.task_id)
            .field("write_scope", &self.write_scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_read_inside_worktree() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1");

        assert!(ctx.validate_read(Path::new("src/lib.rs")).is_ok());
        assert!(ctx.validate_read(&dir.path().join("a.txt")).is_ok());
    }

    #[test]
    fn test_validate_read_escape_rejected() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1");

        assert!(matches!(
            ctx.validate_read(Path::new("/etc/passwd")),
            Err(ToolError::SandboxViolation { .. })
        ));
    }

    #[test]
    fn test_tests_only_scope() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1").with_write_scope(WriteScope::TestsOnly);

        assert!(ctx.validate_write(Path::new("tests/integration.rs")).is_ok());
        assert!(ctx.validate_write(Path::new("src/foo_test.rs")).is_ok());
        assert!(matches!(
            ctx.validate_write(Path::new("src/lib.rs")),
            Err(ToolError::WriteScopeViolation { .. })
        ));
    }

    #[test]
    fn test_read_only_scope() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1").with_write_scope(WriteScope::ReadOnly);

        assert!(matches!(
            ctx.validate_write(Path::new("tests/anything.rs")),
            Err(ToolError::WriteScopeViolation { .. })
        ));
        // Reads still fine
        assert!(ctx.validate_read(Path::new("src/lib.rs")).is_ok());
    }

    #[tokio::test]
    async fn test_completion_flag() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1");

        assert!(!ctx.is_completed());
        ctx.mark_completed(Some("done".to_string())).await;
        assert!(ctx.is_completed());
        assert_eq!(ctx.completion_summary().await.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_written_files_are_relative_and_deduped() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1");

        ctx.record_write(dir.path().join("src/lib.rs")).await;
        ctx.record_write(dir.path().join("src/lib.rs")).await;
        ctx.record_write(dir.path().join("src/main.rs")).await;

        assert_eq!(ctx.written_files().await, vec!["src/lib.rs", "src/main.rs"]);
    }
}
