//! request_replan tool
//!
//! Lets a running agent tell the replanner the task is bigger, harder,
//! or more blocked than planned. Validated against the monitored task
//! set; the resulting decision flows back to the coordinator as events.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::replan::AgentReplanRequest;
use crate::tools::{Tool, ToolContext, ToolResult};

pub struct RequestReplanTool;

#[async_trait]
impl Tool for RequestReplanTool {
    fn name(&self) -> &'static str {
        "request_replan"
    }

    fn description(&self) -> &'static str {
        "Request a replan when the task turns out larger or more blocked than its plan assumed"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": { "type": "string", "description": "Why the plan no longer fits" },
                "suggestion": {
                    "type": "string",
                    "enum": ["continue", "split", "re_estimate", "escalate", "abort"],
                    "description": "Suggested action"
                },
                "blockers": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Concrete blockers, if any"
                },
                "complexity_details": { "type": "string" },
                "affected_files": {
                    "type": "array",
                    "items": { "type": "string" }
                }
            },
            "required": ["reason"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(replanner) = &ctx.replanner else {
            return ToolResult::error("Replanning is not available in this context");
        };

        let request: AgentReplanRequest = match serde_json::from_value(input) {
            Ok(request) => request,
            Err(e) => return ToolResult::error(format!("Invalid request_replan input: {}", e)),
        };

        match replanner.handle_agent_request(&ctx.task_id, request).await {
            Ok(decision) => ToolResult::success(format!(
                "Replan recorded (suggested action: {}, confidence {:.2})",
                decision.suggested_action, decision.confidence
            )),
            Err(e) => ToolResult::error(format!("Replan request rejected: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplanConfig;
    use crate::events::EventBus;
    use crate::replan::Replanner;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_request_without_replanner_errors() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1");

        let result = RequestReplanTool.execute(json!({"reason": "too big"}), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_request_for_monitored_task() {
        let dir = tempdir().unwrap();
        let replanner = Arc::new(Replanner::new(ReplanConfig::default(), Arc::new(EventBus::new())));
        replanner.monitor("task-1").await;

        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1").with_replanner(replanner);
        let result = RequestReplanTool
            .execute(json!({"reason": "needs a schema migration", "suggestion": "split"}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(result.content.contains("split"));
    }

    #[tokio::test]
    async fn test_request_for_unmonitored_task_rejected() {
        let dir = tempdir().unwrap();
        let replanner = Arc::new(Replanner::new(ReplanConfig::default(), Arc::new(EventBus::new())));

        let ctx = ToolContext::new(dir.path().to_path_buf(), "task-1").with_replanner(replanner);
        let result = RequestReplanTool.execute(json!({"reason": "lost"}), &ctx).await;
        assert!(result.is_error);
    }
}
