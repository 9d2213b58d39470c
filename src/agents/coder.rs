//! Coder agent
//!
//! The only agent that modifies files in the worktree. Executes the
//! task's change, and repairs QA failures via `fix_issues`. Every
//! invocation starts a fresh conversation; state lives in the worktree,
//! not in the message history.

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::domain::{AgentRole, Task};
use crate::llm::{LlmService, TokenUsage};
use crate::qa::{IssueFixer, NormalizedError};
use crate::replan::Replanner;
use crate::tools::{ToolContext, ToolExecutor, WriteScope};
use crate::worktree::WorktreeInfo;

use super::agent_loop::{AgentLoop, AgentLoopConfig};

/// Outcome of one coder execution
#[derive(Debug, Clone)]
pub struct CoderResult {
    pub success: bool,
    pub files_changed: Vec<String>,
    pub output: String,
    pub iterations: u32,
    pub usage: TokenUsage,
}

/// Role-specialized wrapper around the agent loop for code changes
pub struct CoderAgent {
    llm: Arc<LlmService>,
    task: Task,
    ctx: ToolContext,
    loop_config: AgentLoopConfig,
}

impl CoderAgent {
    pub fn new(llm: Arc<LlmService>, task: Task, worktree: &WorktreeInfo) -> Self {
        let ctx = ToolContext::new(worktree.path.clone(), task.id.clone()).with_write_scope(WriteScope::Worktree);
        Self {
            llm,
            task,
            ctx,
            loop_config: AgentLoopConfig::default(),
        }
    }

    pub fn with_replanner(mut self, replanner: Arc<Replanner>) -> Self {
        self.ctx = self.ctx.with_replanner(replanner);
        self
    }

    pub fn with_loop_config(mut self, config: AgentLoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    fn agent_loop(&self) -> AgentLoop {
        AgentLoop::new(
            self.llm.clone(),
            AgentRole::Coder,
            ToolExecutor::standard_with_command_timeout(self.loop_config.command_timeout),
            self.loop_config.clone(),
        )
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are a software engineer implementing one focused change in an isolated \
             working copy.\n\
             Rules:\n\
             - Make the smallest coherent change that satisfies the task.\n\
             - Stay within the declared file list unless the task is impossible without \
               touching another file.\n\
             - Use write_file for every modification; never describe changes without \
               making them.\n\
             - When the change is complete, call complete_task with a one-line summary.\n\
             - If the task turns out to be much larger than described, call \
               request_replan instead of sprawling.\n",
        );
        if !self.task.files.is_empty() {
            prompt.push_str("\nDeclared files:\n");
            for file in &self.task.files {
                prompt.push_str(&format!("- {}\n", file));
            }
        }
        prompt
    }

    /// Implement the task's change in the worktree
    pub async fn execute(&self, cancel: &CancelToken) -> Result<CoderResult> {
        info!(task_id = %self.task.id, "Coder executing task");

        let initial = format!(
            "Task: {}\n\n{}\n\nWork in the current directory. Explore what you need, \
             make the change, then call complete_task.",
            self.task.title, self.task.description
        );

        let outcome = self
            .agent_loop()
            .run(&self.system_prompt(), &initial, &self.ctx, cancel)
            .await?;

        let files_changed = self.ctx.written_files().await;
        debug!(
            task_id = %self.task.id,
            turns = outcome.turns,
            files = files_changed.len(),
            "Coder finished"
        );

        Ok(CoderResult {
            success: outcome.completed(),
            files_changed,
            output: outcome.final_text.unwrap_or_default(),
            iterations: outcome.turns,
            usage: outcome.usage,
        })
    }
}

#[async_trait]
impl IssueFixer for CoderAgent {
    /// Repair normalized stage failures
    async fn fix_issues(&self, errors: &[NormalizedError], cancel: &CancelToken) -> Result<()> {
        info!(task_id = %self.task.id, error_count = errors.len(), "Coder repairing failures");

        let rendered: Vec<String> = errors.iter().map(|e| format!("- {}", e.render())).collect();
        let initial = format!(
            "The quality pipeline failed for task \"{}\". Fix these errors, changing as \
             little as possible, then call complete_task:\n\n{}",
            self.task.title,
            rendered.join("\n")
        );

        let outcome = self
            .agent_loop()
            .run(&self.system_prompt(), &initial, &self.ctx, cancel)
            .await?;

        if !outcome.completed() {
            debug!(task_id = %self.task.id, ?outcome.stop_cause, "Repair loop stopped early");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRequest, ChatResponse, FinishReason, LlmClient, LlmError, RetryPolicy, ToolCall};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedLlm {
        responses: Mutex<VecDeque<ChatResponse>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.prompts.lock().unwrap().push(request.system_prompt.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Malformed("script exhausted".to_string()))
        }
    }

    fn write_then_complete() -> Vec<ChatResponse> {
        vec![
            ChatResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "c1".to_string(),
                    name: "write_file".to_string(),
                    input: serde_json::json!({"path": "src/greet.rs", "content": "pub fn greet() -> &'static str { \"hello\" }"}),
                }],
                finish_reason: FinishReason::ToolUse,
                usage: Default::default(),
            },
            ChatResponse {
                content: Some("implemented".to_string()),
                tool_calls: vec![ToolCall {
                    id: "c2".to_string(),
                    name: "complete_task".to_string(),
                    input: serde_json::json!({"summary": "added greet"}),
                }],
                finish_reason: FinishReason::ToolUse,
                usage: Default::default(),
            },
        ]
    }

    fn worktree_at(path: PathBuf) -> WorktreeInfo {
        WorktreeInfo {
            task_id: "task-1".to_string(),
            path,
            branch: "nexus/task-1".to_string(),
        }
    }

    fn coder(dir: &tempfile::TempDir, responses: Vec<ChatResponse>) -> (Arc<ScriptedLlm>, CoderAgent) {
        let scripted = ScriptedLlm::new(responses);
        let llm = Arc::new(LlmService::new(scripted.clone(), RetryPolicy::none()));
        let mut task = Task::with_id("task-1", "Add greet");
        task.description = "Add a greet function returning hello".to_string();
        task.files = vec!["src/greet.rs".to_string()];

        let agent = CoderAgent::new(llm, task, &worktree_at(dir.path().to_path_buf()));
        (scripted, agent)
    }

    #[tokio::test]
    async fn test_execute_writes_files_and_reports_them() {
        let dir = tempdir().unwrap();
        let (_scripted, agent) = coder(&dir, write_then_complete());

        let result = agent.execute(&CancelToken::new()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.files_changed, vec!["src/greet.rs"]);
        assert_eq!(result.iterations, 2);
        assert!(dir.path().join("src/greet.rs").exists());
    }

    #[tokio::test]
    async fn test_system_prompt_pins_declared_files() {
        let dir = tempdir().unwrap();
        let (scripted, agent) = coder(&dir, vec![ChatResponse::text("noop")]);

        agent.execute(&CancelToken::new()).await.unwrap();

        let prompts = scripted.prompts.lock().unwrap();
        assert!(prompts[0].contains("src/greet.rs"));
        assert!(prompts[0].contains("smallest coherent change"));
    }

    #[tokio::test]
    async fn test_fix_issues_renders_errors_into_prompt() {
        let dir = tempdir().unwrap();
        let (scripted, agent) = coder(
            &dir,
            vec![ChatResponse {
                content: Some("fixed".to_string()),
                tool_calls: vec![ToolCall {
                    id: "c1".to_string(),
                    name: "complete_task".to_string(),
                    input: serde_json::json!({"summary": "fixed lint"}),
                }],
                finish_reason: FinishReason::ToolUse,
                usage: Default::default(),
            }],
        );

        let errors = vec![NormalizedError::new("lint", "trailing semicolon").at("src/greet.rs", Some(1))];
        agent.fix_issues(&errors, &CancelToken::new()).await.unwrap();

        // One fresh conversation happened
        assert_eq!(scripted.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_cancelled() {
        let dir = tempdir().unwrap();
        let (_scripted, agent) = coder(&dir, write_then_complete());
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = agent.execute(&cancel).await.unwrap();
        assert!(!result.success);
        assert!(result.files_changed.is_empty());
    }
}
