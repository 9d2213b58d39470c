//! LLM client trait, Anthropic binding, retry, and usage accounting

pub mod anthropic;
pub mod client;
pub mod error;
pub mod retry;
pub mod types;

pub use anthropic::AnthropicClient;
pub use client::{LlmClient, LlmService, UsageReport, count_tokens};
pub use error::LlmError;
pub use retry::RetryPolicy;
pub use types::{
    ChatRequest, ChatResponse, ContentBlock, FinishReason, Message, MessageContent, Role, StreamChunk, TokenUsage,
    ToolCall, ToolDefinition,
};
