//! LLM client trait and the usage-tracking service wrapper

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::domain::AgentRole;

use super::error::LlmError;
use super::retry::RetryPolicy;
use super::types::{ChatRequest, ChatResponse, StreamChunk, TokenUsage};

/// Uniform chat interface over an LLM provider
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Submit a chat request and wait for the full response
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Streaming variant: chunks flow through the channel, the final
    /// response is returned once the stream closes
    async fn chat_streaming(
        &self,
        request: ChatRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ChatResponse, LlmError> {
        // Default: degrade to a blocking call and emit one delta
        let response = self.chat(request).await?;
        if let Some(content) = &response.content {
            let _ = chunk_tx.send(StreamChunk::TextDelta(content.clone())).await;
        }
        let _ = chunk_tx
            .send(StreamChunk::MessageDone {
                finish_reason: response.finish_reason,
                usage: response.usage,
            })
            .await;
        Ok(response)
    }
}

/// Rough token estimate used for budget decisions before a request
///
/// Four characters per token is the conventional approximation; exact
/// counts come back in the response usage.
pub fn count_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Per-role usage snapshot
pub type UsageReport = HashMap<AgentRole, TokenUsage>;

/// Shared LLM entry point: retry policy + per-role usage accounting
///
/// Callers assemble messages themselves; the service only owns transport
/// concerns (retry, backoff, accounting).
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    usage: Mutex<UsageReport>,
}

impl LlmService {
    pub fn new(client: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a chat request on behalf of an agent role
    pub async fn chat(&self, role: AgentRole, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let client = self.client.clone();
        let response = self.retry.execute(|| client.chat(request.clone())).await?;

        debug!(
            %role,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "LlmService::chat completed"
        );

        let mut usage = self.usage.lock().await;
        usage.entry(role).or_default().add(response.usage);

        Ok(response)
    }

    /// Read-only snapshot of accumulated usage per role
    pub async fn usage_report(&self) -> UsageReport {
        self.usage.lock().await.clone()
    }

    /// Total usage across roles
    pub async fn total_usage(&self) -> TokenUsage {
        let usage = self.usage.lock().await;
        let mut total = TokenUsage::default();
        for sample in usage.values() {
            total.add(*sample);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::FinishReason;

    struct FixedClient;

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                content: Some("ok".to_string()),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::EndTurn,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            })
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            system_prompt: "test".to_string(),
            messages: vec![super::super::types::Message::user("hi")],
            tools: Vec::new(),
            max_tokens: 128,
        }
    }

    #[test]
    fn test_count_tokens_heuristic() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("abcd"), 1);
        assert_eq!(count_tokens("abcde"), 2);
    }

    #[tokio::test]
    async fn test_usage_accumulates_per_role() {
        let service = LlmService::new(Arc::new(FixedClient), RetryPolicy::default());

        service.chat(AgentRole::Coder, request()).await.unwrap();
        service.chat(AgentRole::Coder, request()).await.unwrap();
        service.chat(AgentRole::Reviewer, request()).await.unwrap();

        let report = service.usage_report().await;
        assert_eq!(report[&AgentRole::Coder].input_tokens, 20);
        assert_eq!(report[&AgentRole::Reviewer].input_tokens, 10);
        assert!(!report.contains_key(&AgentRole::Merger));

        let total = service.total_usage().await;
        assert_eq!(total.input_tokens, 30);
        assert_eq!(total.output_tokens, 15);
    }

    #[tokio::test]
    async fn test_default_streaming_degrades_to_blocking() {
        let client = FixedClient;
        let (tx, mut rx) = mpsc::channel(8);
        let response = client.chat_streaming(request(), tx).await.unwrap();
        assert_eq!(response.content.as_deref(), Some("ok"));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, StreamChunk::TextDelta(ref s) if s == "ok"));
        let done = rx.recv().await.unwrap();
        assert!(matches!(done, StreamChunk::MessageDone { .. }));
    }
}
