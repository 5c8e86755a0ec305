//! Error recovery engine
//!
//! Maps an AgentError to a RecoveryAction. Failed data sources never end a question: their
//! payload goes back to the model as an observation.

use crate::core::{AgentError, RecoveryAction};

/// JSON repair prompts are injected at most this many times per question
pub const MAX_JSON_RETRIES: usize = 2;

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output was not valid JSON: {raw}. \
                When calling a tool, output exactly one JSON object and nothing else, \
                shaped as {{\"tool\": \"tool_name\", \"args\": {{...}}}}. \
                Example: {{\"tool\": \"geocode_zip\", \"args\": {{\"zip_code\": \"20001\"}}}}. \
                When answering, reply in plain Markdown without any JSON object."
            )),
            AgentError::HallucinatedTool(name) => RecoveryAction::RetryWithPrompt(format!(
                "Tool '{name}' does not exist or is not available here. \
                Use only the tools listed in the system prompt."
            )),
            AgentError::ToolTimeout(name) => RecoveryAction::RetryWithPrompt(format!(
                "Error: tool {name} timed out. Continue with the data you have \
                and lower the stated confidence for anything that depended on it."
            )),
            AgentError::ToolExecutionFailed(payload) => RecoveryAction::RetryWithPrompt(format!(
                "Error: {payload}\nContinue with the remaining sources and mention \
                the missing data, with reduced confidence."
            )),
            AgentError::LlmError(msg) => RecoveryAction::AskUser(format!(
                "The language model request failed: {msg}. Check the network and API key."
            )),
            AgentError::Cancelled => RecoveryAction::Abort,
            _ => RecoveryAction::Abort,
        }
    }
}
