//! Memory layer: conversation history

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
