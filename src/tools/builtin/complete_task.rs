//! complete_task tool

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolResult};

pub struct CompleteTaskTool;

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &'static str {
        "complete_task"
    }

    fn description(&self) -> &'static str {
        "Signal that the task is done; call exactly once, with a short summary"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string", "description": "What was done" }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let summary = input.get("summary").and_then(Value::as_str).map(String::from);
        ctx.mark_completed(summary).await;
        ToolResult::success("Task marked complete")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_complete_sets_context_flag() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1");

        let result = CompleteTaskTool
            .execute(json!({"summary": "implemented greet()"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(ctx.is_completed());
        assert_eq!(ctx.completion_summary().await.as_deref(), Some("implemented greet()"));
    }
}
