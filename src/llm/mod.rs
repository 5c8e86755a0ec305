//! LLM layer: client abstraction and backends (Anthropic / OpenAI-compatible / Mock)

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use anthropic::AnthropicClient;
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use crate::config::AppConfig;
use crate::core::AgentError;

/// Pick the LLM backend from `[llm].provider`
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let provider = cfg.llm.provider.to_lowercase();
    match provider.as_str() {
        "anthropic" => {
            let api_key = cfg
                .llm
                .resolved_api_key()
                .ok_or_else(|| AgentError::ConfigError("ANTHROPIC_API_KEY is not set".into()))?;
            tracing::info!(model = %cfg.llm.model, "Using Anthropic LLM");
            let client = AnthropicClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &api_key,
                cfg.llm.max_tokens,
                cfg.llm.request_timeout_secs,
            )
            .map_err(AgentError::ConfigError)?;
            Ok(Arc::new(client))
        }
        "openai" => {
            let api_key = cfg
                .llm
                .resolved_api_key()
                .ok_or_else(|| AgentError::ConfigError("OPENAI_API_KEY is not set".into()))?;
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &api_key,
            )))
        }
        "mock" => {
            tracing::warn!("Using Mock LLM; answers are canned");
            Ok(Arc::new(MockLlmClient::default()))
        }
        other => Err(AgentError::ConfigError(format!(
            "Unknown LLM provider '{other}' (expected anthropic, openai or mock)"
        ))),
    }
}
