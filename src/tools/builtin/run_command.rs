//! run_command tool

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::process::{ProcessError, ProcessOptions, ProcessRunner};
use crate::tools::{Tool, ToolContext, ToolResult};

/// Default budget for agent-issued commands
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Output cap fed back into the conversation
const MAX_OUTPUT: usize = 16 * 1024;

pub struct RunCommandTool {
    runner: ProcessRunner,
    timeout: Duration,
}

impl RunCommandTool {
    pub fn new() -> Self {
        Self::with_timeout(COMMAND_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            runner: ProcessRunner::new(),
            timeout,
        }
    }
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self::new()
    }
}

fn clip(s: &str) -> String {
    if s.len() > MAX_OUTPUT {
        format!("{}\n[output truncated]", &s[..MAX_OUTPUT])
    } else {
        s.to_string()
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the worktree; destructive commands are blocked"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return ToolResult::error("Missing required field: command");
        };

        let options = ProcessOptions::in_dir(&ctx.worktree)
            .with_shell()
            .with_timeout(self.timeout);

        match self.runner.run(command, options).await {
            Ok(result) => ToolResult::success(format!(
                "exit code: 0\nstdout:\n{}\nstderr:\n{}",
                clip(&result.stdout),
                clip(&result.stderr)
            )),
            Err(ProcessError::Failed {
                exit_code,
                stdout,
                stderr,
                ..
            }) => ToolResult::error(format!(
                "exit code: {}\nstdout:\n{}\nstderr:\n{}",
                exit_code,
                clip(&stdout),
                clip(&stderr)
            )),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
