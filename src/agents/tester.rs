//! Tester agent
//!
//! Proposes and updates tests for the coder's output. Its writes are
//! jailed to test paths; the build and test runners judge the result.

use std::sync::Arc;

use eyre::Result;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::domain::{AgentRole, Task};
use crate::llm::{LlmService, TokenUsage};
use crate::tools::{ToolContext, ToolExecutor, WriteScope};
use crate::worktree::WorktreeInfo;

use super::agent_loop::{AgentLoop, AgentLoopConfig};

/// Outcome of one tester execution
#[derive(Debug, Clone)]
pub struct TesterResult {
    pub success: bool,
    pub test_files_changed: Vec<String>,
    pub output: String,
    pub usage: TokenUsage,
}

/// Role-specialized wrapper around the agent loop for test authoring
pub struct TesterAgent {
    llm: Arc<LlmService>,
    task: Task,
    ctx: ToolContext,
    loop_config: AgentLoopConfig,
}

impl TesterAgent {
    pub fn new(llm: Arc<LlmService>, task: Task, worktree: &WorktreeInfo) -> Self {
        let ctx = ToolContext::new(worktree.path.clone(), task.id.clone()).with_write_scope(WriteScope::TestsOnly);
        Self {
            llm,
            task,
            ctx,
            loop_config: AgentLoopConfig::default(),
        }
    }

    pub fn with_loop_config(mut self, config: AgentLoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    const SYSTEM_PROMPT: &'static str = "You are a test engineer. Write or update tests for the \
         change described below.\n\
         Rules:\n\
         - You may only write test files; production code is read-only for you.\n\
         - Cover the acceptance criteria and the obvious edge cases; skip \
           mechanical round-trip grids.\n\
         - When the tests are in place, call complete_task with a one-line summary.\n";

    /// Write tests for the coder's change
    pub async fn execute(&self, coder_output: &str, cancel: &CancelToken) -> Result<TesterResult> {
        info!(task_id = %self.task.id, "Tester executing");

        let initial = format!(
            "Task: {}\n\n{}\n\nThe implementation agent reported:\n{}\n\n\
             Add or update tests for this change, then call complete_task.",
            self.task.title, self.task.description, coder_output
        );

        let agent_loop = AgentLoop::new(
            self.llm.clone(),
            AgentRole::Tester,
            ToolExecutor::standard_with_command_timeout(self.loop_config.command_timeout),
            self.loop_config.clone(),
        );
        let outcome = agent_loop.run(Self::SYSTEM_PROMPT, &initial, &self.ctx, cancel).await?;

        let test_files_changed = self.ctx.written_files().await;
        debug!(task_id = %self.task.id, files = test_files_changed.len(), "Tester finished");

        Ok(TesterResult {
            success: outcome.completed(),
            test_files_changed,
            output: outcome.final_text.unwrap_or_default(),
            usage: outcome.usage,
        })
    }
}
