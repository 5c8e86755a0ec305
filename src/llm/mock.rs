//! Mock LLM client (tests and offline runs, no API needed)
//!
//! Replays scripted replies in order; once the script runs out it answers with a short
//! summary of the last user message.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{stream, Stream};

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(Into::into).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every message list passed to `complete`, in call order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        if let Some(next) = self.script.lock().ok().and_then(|mut s| s.pop_front()) {
            return Ok(next);
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!(
            "Mock analyst received: {last_user}\n\nSources: none · Confidence: low"
        ))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>, String> {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}
