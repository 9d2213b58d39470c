//! Bounded agent loop
//!
//! One conversation with the LLM, bounded by turn count, wall-clock
//! deadline, and cancellation. Tool-use directives are executed through
//! the agent's `ToolExecutor`; anything else is terminal content.
//! Cancellation is cooperative and observed at turn boundaries.

use std::time::{Duration, Instant};

use std::sync::Arc;

use eyre::Result;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::domain::AgentRole;
use crate::llm::{ChatRequest, ChatResponse, ContentBlock, FinishReason, LlmService, Message, TokenUsage};
use crate::tools::{ToolContext, ToolExecutor};

/// Bounds on one agent loop invocation
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Maximum LLM turns
    pub max_turns: u32,

    /// Wall-clock budget for the whole loop
    pub deadline: Duration,

    /// Max tokens per response
    pub max_tokens: u32,

    /// Budget for commands the agent runs through its tools
    pub command_timeout: Duration,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 30,
            deadline: Duration::from_secs(1800),
            max_tokens: 16384,
            command_timeout: Duration::from_secs(120),
        }
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The model finished its turn (or called `complete_task`)
    Completed,
    /// Turn budget exhausted
    MaxTurns,
    /// Wall-clock budget exhausted
    DeadlineExceeded,
    /// Cooperative cancellation
    Cancelled,
}

/// Result of one loop invocation
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Last text content from the model, if any
    pub final_text: Option<String>,

    /// Turns consumed
    pub turns: u32,

    /// Accumulated token usage
    pub usage: TokenUsage,

    /// Why the loop stopped
    pub stop_cause: StopCause,
}

impl AgentOutcome {
    pub fn completed(&self) -> bool {
        self.stop_cause == StopCause::Completed
    }
}

/// Drives one bounded conversation for a role
pub struct AgentLoop {
    llm: Arc<LlmService>,
    role: AgentRole,
    tools: ToolExecutor,
    config: AgentLoopConfig,
}

impl AgentLoop {
    pub fn new(llm: Arc<LlmService>, role: AgentRole, tools: ToolExecutor, config: AgentLoopConfig) -> Self {
        Self {
            llm,
            role,
            tools,
            config,
        }
    }

    /// Run the conversation to a stop cause
    pub async fn run(
        &self,
        system_prompt: &str,
        initial_prompt: &str,
        ctx: &ToolContext,
        cancel: &CancelToken,
    ) -> Result<AgentOutcome> {
        let started = Instant::now();
        let mut messages = vec![Message::user(initial_prompt)];
        let mut usage = TokenUsage::default();
        let mut final_text: Option<String> = None;
        let mut turns = 0u32;

        debug!(role = %self.role, task_id = %ctx.task_id, "Agent loop starting");

        loop {
            // All bounds are checked at turn boundaries
            if cancel.is_cancelled() {
                info!(role = %self.role, task_id = %ctx.task_id, turns, "Agent loop cancelled");
                return Ok(self.outcome(final_text, turns, usage, StopCause::Cancelled));
            }
            if turns >= self.config.max_turns {
                warn!(role = %self.role, task_id = %ctx.task_id, turns, "Agent loop hit its turn budget");
                return Ok(self.outcome(final_text, turns, usage, StopCause::MaxTurns));
            }
            if started.elapsed() >= self.config.deadline {
                warn!(role = %self.role, task_id = %ctx.task_id, turns, "Agent loop hit its deadline");
                return Ok(self.outcome(final_text, turns, usage, StopCause::DeadlineExceeded));
            }

            turns += 1;

            let request = ChatRequest {
                system_prompt: system_prompt.to_string(),
                messages: messages.clone(),
                tools: self.tools.definitions(),
                max_tokens: self.config.max_tokens,
            };

            let response = match cancel.guard(self.llm.chat(self.role, request)).await {
                Some(response) => response?,
                None => {
                    info!(role = %self.role, task_id = %ctx.task_id, "Agent loop cancelled mid-request");
                    return Ok(self.outcome(final_text, turns, usage, StopCause::Cancelled));
                }
            };

            usage.add(response.usage);
            if let Some(text) = &response.content {
                final_text = Some(text.clone());
            }

            messages.push(build_assistant_message(&response));

            match response.finish_reason {
                FinishReason::ToolUse => {
                    let results = self.tools.execute_all(&response.tool_calls, ctx).await;
                    messages.push(build_tool_result_message(&results));

                    // complete_task ends the loop without another round trip
                    if ctx.is_completed() {
                        debug!(role = %self.role, task_id = %ctx.task_id, turns, "Task marked complete via tool");
                        return Ok(self.outcome(final_text, turns, usage, StopCause::Completed));
                    }
                }
                FinishReason::MaxTokens => {
                    messages.push(Message::user(
                        "Continue from where you left off. Your previous response was truncated.",
                    ));
                }
                FinishReason::EndTurn | FinishReason::StopSequence => {
                    return Ok(self.outcome(final_text, turns, usage, StopCause::Completed));
                }
            }
        }
    }

    fn outcome(&self, final_text: Option<String>, turns: u32, usage: TokenUsage, stop_cause: StopCause) -> AgentOutcome {
        AgentOutcome {
            final_text,
            turns,
            usage,
            stop_cause,
        }
    }
}

fn build_assistant_message(response: &ChatResponse) -> Message {
    let mut blocks = Vec::new();

    if let Some(text) = &response.content {
        blocks.push(ContentBlock::text(text));
    }
    for call in &response.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });
    }

    Message::assistant_blocks(blocks)
}

fn build_tool_result_message(results: &[(String, crate::tools::ToolResult)]) -> Message {
    let blocks: Vec<ContentBlock> = results
        .iter()
        .map(|(id, result)| ContentBlock::tool_result(id, &result.content, result.is_error))
        .collect();

    Message::user_blocks(blocks)
}
