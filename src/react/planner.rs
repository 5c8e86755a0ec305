//! Planner: one model call per step, and parsing of its output into a tool call or an answer

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// `{"tool": "geocode_zip", "args": {"zip_code": "20001"}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// Final answer for the user
    Response(String),
    ToolCall(ToolCall),
}

/// A fenced ```json block or the span from the first `{` to the last `}` is tried as a tool call.
/// Text that fails to parse is only an error when it mentions a `"tool"` key; otherwise it is
/// treated as a prose answer that happens to contain braces.
pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            &trimmed[start..=end]
        } else {
            return Ok(PlannerOutput::Response(trimmed.to_string()));
        }
    } else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    match serde_json::from_str::<ToolCall>(json_str) {
        Ok(call) if !call.tool.trim().is_empty() => Ok(PlannerOutput::ToolCall(call)),
        Ok(_) => Ok(PlannerOutput::Response(trimmed.to_string())),
        Err(_) if !json_str.contains("\"tool\"") => Ok(PlannerOutput::Response(trimmed.to_string())),
        Err(e) => Err(AgentError::JsonParseError(format!("{e}: {json_str}"))),
    }
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Cumulative (prompt, completion, total) tokens of the underlying client
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// Prepend `system` to the conversation and ask the model for the next step
    pub async fn plan_with_system(
        &self,
        messages: &[Message],
        system: &str,
    ) -> Result<String, AgentError> {
        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(system.to_string()));
        full_messages.extend_from_slice(messages);
        self.llm
            .complete(&full_messages)
            .await
            .map_err(AgentError::LlmError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_and_fenced_tool_calls() {
        let bare = parse_llm_output(r#"{"tool": "geocode_zip", "args": {"zip_code": "20001"}}"#).unwrap();
        assert_eq!(
            bare,
            PlannerOutput::ToolCall(ToolCall {
                tool: "geocode_zip".into(),
                args: json!({"zip_code": "20001"})
            })
        );

        let fenced = "Let me check.\n```json\n{\"tool\": \"get_walkscore\", \"args\": {}}\n```";
        assert!(matches!(
            parse_llm_output(fenced).unwrap(),
            PlannerOutput::ToolCall(ToolCall { ref tool, .. }) if tool == "get_walkscore"
        ));
    }

    #[test]
    fn prose_is_an_answer_even_with_braces() {
        let text = "Median rent is $2,400 {per HUD}.\n\nSources: HUD · Confidence: medium";
        assert_eq!(
            parse_llm_output(text).unwrap(),
            PlannerOutput::Response(text.to_string())
        );
    }

    #[test]
    fn broken_tool_json_is_an_error() {
        let err = parse_llm_output(r#"{"tool": "geocode_zip", "args": {"zip_code": }"#).unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }
}
