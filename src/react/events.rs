//! Per-question process events: tool calls, delegation and the streamed answer

use serde::Serialize;

/// Single event, serializable as JSON for display
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    StepUpdate { step: usize, max_steps: usize },
    /// Waiting on the model
    Thinking,
    ToolStart {
        call_id: u64,
        tool: String,
        preview: String,
    },
    ToolEnd {
        call_id: u64,
        tool: String,
        status: String,
        elapsed_ms: u64,
    },
    ToolError {
        call_id: Option<u64>,
        message: String,
        details: serde_json::Value,
    },
    /// A focused analyst was started for part of the question
    Delegation { analyst: String },
    /// Recovery action (RetryWithPrompt / AskUser / Abort)
    Recovery { action: String, detail: String },
    /// A slice of the final answer
    MessageChunk { text: String },
    MessageDone,
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    Error { text: String },
}
