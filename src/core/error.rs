//! Agent errors and recovery actions
//!
//! Paired with RecoveryEngine: an AgentError decides between RetryWithPrompt / AskUser / Abort.

use thiserror::Error;

/// Errors raised while answering one question (LLM, parsing, tools, cancellation)
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Location error: {0}")]
    Location(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Recovery suggested by the engine for a given error
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// Inject a hint into the next round so the model retries (e.g. malformed JSON)
    RetryWithPrompt(String),
    /// Surface the problem to the user and stop this question
    AskUser(String),
    /// Stop the current question
    Abort,
}
