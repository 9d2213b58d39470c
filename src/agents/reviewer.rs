//! Reviewer agent
//!
//! Produces a structured review verdict for a diff. A single chat with
//! a strict-JSON contract; the reviewer never writes files. The review
//! stage runner applies the blocking rule on top of this verdict.

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;
use tracing::{debug, info};

use crate::domain::AgentRole;
use crate::llm::{ChatRequest, LlmError, LlmService, Message};
use crate::qa::{CodeReviewer, ReviewVerdict};

/// Diffs larger than this get truncated before review
const MAX_DIFF_BYTES: usize = 120 * 1024;

const SYSTEM_PROMPT: &str = "You are a meticulous code reviewer. Review the diff and respond \
     with ONLY a JSON object, no prose and no code fences:\n\
     {\n\
       \"approved\": true | false,\n\
       \"issues\": [\n\
         {\"severity\": \"critical\" | \"major\" | \"minor\" | \"suggestion\",\n\
          \"file\": \"path or null\", \"line\": 1, \"message\": \"...\"}\n\
       ]\n\
     }\n\
     Severity guide: critical = incorrect or unsafe behavior; major = \
     likely bug or serious design flaw; minor = style or clarity; \
     suggestion = optional improvement.";

/// Role-specialized wrapper around the LLM for structured reviews
pub struct ReviewerAgent {
    llm: Arc<LlmService>,
    max_tokens: u32,
}

impl ReviewerAgent {
    pub fn new(llm: Arc<LlmService>) -> Self {
        Self {
            llm,
            max_tokens: 4096,
        }
    }

    /// Strict JSON parse, tolerating only fenced wrappers
    fn parse_verdict(content: &str) -> Result<ReviewVerdict, LlmError> {
        let trimmed = content.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim();

        serde_json::from_str::<ReviewVerdict>(body)
            .map_err(|e| LlmError::Malformed(format!("review verdict is not valid JSON: {}", e)))
    }
}

#[async_trait]
impl CodeReviewer for ReviewerAgent {
    async fn review(&self, diff: &str) -> Result<ReviewVerdict> {
        info!(diff_bytes = diff.len(), "Reviewer examining diff");

        let clipped = if diff.len() > MAX_DIFF_BYTES {
            format!("{}\n[diff truncated]", &diff[..MAX_DIFF_BYTES])
        } else {
            diff.to_string()
        };

        let request = ChatRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user(format!("Review this diff:\n\n{}", clipped))],
            tools: Vec::new(),
            max_tokens: self.max_tokens,
        };

        let response = self.llm.chat(AgentRole::Reviewer, request).await?;
        let content = response
            .content
            .ok_or_else(|| LlmError::Malformed("reviewer returned no content".to_string()))?;

        let verdict = Self::parse_verdict(&content)?;
        debug!(approved = verdict.approved, issues = verdict.issues.len(), "Review parsed");
        Ok(verdict)
    }
}
