//! read_file tool

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolResult};

/// Read limit per call; agents should not pull megabytes into context
const MAX_BYTES: usize = 256 * 1024;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file from the worktree"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the worktree" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input.get("path").and_then(Value::as_str) else {
            return ToolResult::error("Missing required field: path");
        };

        let resolved = match ctx.validate_read(std::path::Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) if content.len() > MAX_BYTES => ToolResult::success(format!(
                "{}\n[truncated at {} bytes]",
                &content[..MAX_BYTES],
                MAX_BYTES
            )),
            Ok(content) => ToolResult::success(content),
            Err(e) => ToolResult::error(format!("Failed to read {}: {}", path, e)),
        }
    }
}
