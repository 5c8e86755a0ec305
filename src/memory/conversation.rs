//! Short-term memory: conversation history
//!
//! Keeps the last N (question, answer) turns; older turns are pruned so each prompt stays bounded.

use serde::{Deserialize, Serialize};

/// Message role (matches the LLM APIs)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Last `max_turns` user/assistant pairs, oldest first
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    turns: Vec<(String, String)>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn push_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push((question.into(), answer.into()));
        self.prune();
    }

    pub fn turns(&self) -> &[(String, String)] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn prune(&mut self) {
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_recent_turns() {
        let mut memory = ConversationMemory::new(2);
        memory.push_turn("q1", "a1");
        memory.push_turn("q2", "a2");
        memory.push_turn("q3", "a3");
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.turns()[0].0, "q2");
        assert_eq!(memory.turns()[1], ("q3".to_string(), "a3".to_string()));
    }

    #[test]
    fn clear_empties_history() {
        let mut memory = ConversationMemory::new(6);
        memory.push_turn("q", "a");
        memory.clear();
        assert!(memory.is_empty());
    }
}
