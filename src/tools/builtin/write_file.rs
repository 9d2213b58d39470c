//! write_file tool

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolResult};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write a file inside the worktree, creating parent directories as needed"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the worktree" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input.get("path").and_then(Value::as_str) else {
            return ToolResult::error("Missing required field: path");
        };
        let Some(content) = input.get("content").and_then(Value::as_str) else {
            return ToolResult::error("Missing required field: content");
        };

        let resolved = match ctx.validate_write(std::path::Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        if let Some(parent) = resolved.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return ToolResult::error(format!("Failed to create directories for {}: {}", path, e));
        }

        match tokio::fs::write(&resolved, content).await {
            Ok(()) => {
                ctx.record_write(resolved).await;
                ToolResult::success(format!("Wrote {} bytes to {}", content.len(), path))
            }
            Err(e) => ToolResult::error(format!("Failed to write {}: {}", path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::context::WriteScope;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_creates_file_and_records_it() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1");

        let result = WriteFileTool
            .execute(json!({"path": "src/lib.rs", "content": "pub fn f() {}"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(),
            "pub fn f() {}"
        );
        assert_eq!(ctx.written_files().await, vec!["src/lib.rs"]);
    }

    #[tokio::test]
    async fn test_write_respects_tests_only_scope() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1").with_write_scope(WriteScope::TestsOnly);

        let denied = WriteFileTool
            .execute(json!({"path": "src/lib.rs", "content": "x"}), &ctx)
            .await;
        assert!(denied.is_error);

        let allowed = WriteFileTool
            .execute(json!({"path": "tests/it.rs", "content": "x"}), &ctx)
            .await;
        assert!(!allowed.is_error);
    }

    #[tokio::test]
    async fn test_write_outside_worktree_rejected() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1");

        let result = WriteFileTool
            .execute(json!({"path": "/tmp/evil.txt", "content": "x"}), &ctx)
            .await;
        assert!(result.is_error);
    }
}
