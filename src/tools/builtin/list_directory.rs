//! list_directory tool

use async_trait::async_trait;
use serde_json::{Value, json};
use walkdir::WalkDir;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Upper bound on listed entries
const MAX_ENTRIES: usize = 500;

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List files under a directory in the worktree (recursive, depth-limited)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the worktree (default: root)" },
                "depth": { "type": "integer", "description": "Max depth (default 3)" }
            }
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let depth = input.get("depth").and_then(Value::as_u64).unwrap_or(3) as usize;

        let resolved = match ctx.validate_read(std::path::Path::new(path)) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if !resolved.is_dir() {
            return ToolResult::error(format!("Not a directory: {}", path));
        }

        let root = resolved.clone();
        let listing = tokio::task::spawn_blocking(move || {
            let mut lines = Vec::new();
            for entry in WalkDir::new(&root)
                .max_depth(depth)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git")
                .flatten()
            {
                if lines.len() >= MAX_ENTRIES {
                    lines.push("[listing truncated]".to_string());
                    break;
                }
                let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                if rel.as_os_str().is_empty() {
                    continue;
                }
                let suffix = if entry.file_type().is_dir() { "/" } else { "" };
                lines.push(format!("{}{}", rel.display(), suffix));
            }
            lines.join("\n")
        })
        .await;

        match listing {
            Ok(listing) if listing.is_empty() => ToolResult::success("(empty)"),
            Ok(listing) => ToolResult::success(listing),
            Err(e) => ToolResult::error(format!("Listing failed: {}", e)),
        }
    }
}
