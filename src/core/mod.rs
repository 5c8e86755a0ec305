//! Core layer: errors and recovery

pub mod error;
pub mod recovery;

pub use error::{AgentError, RecoveryAction};
pub use recovery::{RecoveryEngine, MAX_JSON_RETRIES};
