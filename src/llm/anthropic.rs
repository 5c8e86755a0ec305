//! Anthropic Messages API client
//!
//! Plain `POST /v1/messages` over reqwest. System messages are hoisted into the top-level
//! `system` field; consecutive same-role messages are merged because the API requires
//! strict user/assistant alternation starting with user.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::llm::{LlmClient, TokenUsage};
use crate::memory::{Message, Role};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub struct AnthropicClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    usage: TokenUsage,
}

impl AnthropicClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: &str,
        max_tokens: u32,
        timeout_secs: u64,
    ) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| format!("Build HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            max_tokens,
            usage: TokenUsage::new(),
        })
    }
}

/// Split system text out and merge same-role neighbours
fn to_wire(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut wire: Vec<WireMessage> = Vec::new();
    for m in messages {
        let role = match m.role {
            Role::System => {
                system_parts.push(m.content.as_str());
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        match wire.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&m.content);
            }
            _ => wire.push(WireMessage {
                role,
                content: m.content.clone(),
            }),
        }
    }
    if wire.first().map(|m| m.role) == Some("assistant") {
        wire.insert(
            0,
            WireMessage {
                role: "user",
                content: "(conversation resumed)".to_string(),
            },
        );
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, wire)
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let (system, wire) = to_wire(messages);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: wire,
        };
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(500).collect();
            return Err(format!("HTTP {status}: {snippet}"));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| format!("Decode response: {e}"))?;
        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.input_tokens, usage.output_tokens);
        }
        Ok(parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>, String> {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }
}
