//! LLM client abstraction
//!
//! Every backend (Anthropic / OpenAI-compatible / Mock) implements LlmClient: complete (single reply) and complete_stream (token stream).

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::memory::Message;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// Streaming completion; backends without streaming yield the full reply as one chunk
    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>, String>;

    /// Cumulative (prompt_tokens, completion_tokens, total_tokens); (0, 0, 0) when not tracked
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
