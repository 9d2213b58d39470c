//! ToolExecutor - dispatches tool calls for an agent loop

use std::collections::HashMap;

use crate::llm::{ToolCall, ToolDefinition};

use super::builtin::{
    CompleteTaskTool, ListDirectoryTool, ReadFileTool, RequestReplanTool, RunCommandTool, WriteFileTool,
};
use super::{Tool, ToolContext, ToolResult};

/// Holds the tools available to one agent role
pub struct ToolExecutor {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolExecutor {
    /// Full tool set for the coder
    pub fn standard() -> Self {
        Self::standard_with_command_timeout(std::time::Duration::from_secs(120))
    }

    /// Full tool set with a specific command budget
    pub fn standard_with_command_timeout(command_timeout: std::time::Duration) -> Self {
        let mut executor = Self::empty();
        executor.add_tool(Box::new(ReadFileTool));
        executor.add_tool(Box::new(WriteFileTool));
        executor.add_tool(Box::new(ListDirectoryTool));
        executor.add_tool(Box::new(RunCommandTool::with_timeout(command_timeout)));
        executor.add_tool(Box::new(CompleteTaskTool));
        executor.add_tool(Box::new(RequestReplanTool));
        executor
    }

    /// Read-only subset for the reviewer
    pub fn read_only() -> Self {
        let mut executor = Self::empty();
        executor.add_tool(Box::new(ReadFileTool));
        executor.add_tool(Box::new(ListDirectoryTool));
        executor.add_tool(Box::new(CompleteTaskTool));
        executor.add_tool(Box::new(RequestReplanTool));
        executor
    }

    /// Create an empty executor (tests)
    pub fn empty() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Add a tool to the executor
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Tool definitions advertised to the LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a single tool call
    pub async fn execute(&self, tool_call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        match self.tools.get(&tool_call.name) {
            Some(tool) => tool.execute(tool_call.input.clone(), ctx).await,
            None => ToolResult::error(format!("Unknown tool: {}", tool_call.name)),
        }
    }

    /// Execute tool calls in order, pairing each with its call ID
    pub async fn execute_all(&self, tool_calls: &[ToolCall], ctx: &ToolContext) -> Vec<(String, ToolResult)> {
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            let result = self.execute(call, ctx).await;
            results.push((call.id.clone(), result));
        }
        results
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}
