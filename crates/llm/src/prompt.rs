//! Prompt building and conversation history

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

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
}

/// Rolling window of the most recent user/assistant messages
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    max_messages: usize,
    messages: VecDeque<Message>,
}

impl ConversationHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            messages: VecDeque::with_capacity(max_messages + 1),
        }
    }

    /// Append one completed exchange, evicting the oldest messages
    pub fn record_turn(&mut self, query: impl Into<String>, reply: impl Into<String>) {
        self.push(Message::user(query));
        self.push(Message::assistant(reply));
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Prompt builder: system prompt, then history, then the current query
#[derive(Debug, Default)]
pub struct PromptBuilder {
    messages: Vec<Message>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the system prompt; blank prompts are skipped
    pub fn system_prompt(mut self, prompt: &str) -> Self {
        if !prompt.trim().is_empty() {
            self.messages.push(Message::system(prompt));
        }
        self
    }

    /// Add conversation history
    pub fn with_history(mut self, history: &[Message]) -> Self {
        self.messages.extend(history.iter().cloned());
        self
    }

    /// Add current user message
    pub fn user_message(mut self, message: &str) -> Self {
        self.messages.push(Message::user(message));
        self
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Build final message list
    pub fn build(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }

    #[test]
    fn test_history_keeps_most_recent() {
        let mut history = ConversationHistory::new(5);
        history.record_turn("q1", "a1");
        history.record_turn("q2", "a2");
        history.record_turn("q3", "a3");

        let messages = history.messages();
        assert_eq!(messages.len(), 5);
        // Oldest user message evicted first
        assert_eq!(messages[0], Message::assistant("a1"));
        assert_eq!(messages[4], Message::assistant("a3"));
    }

    #[test]
    fn test_history_zero_window() {
        let mut history = ConversationHistory::new(0);
        history.record_turn("q", "a");
        assert!(history.is_empty());
    }

    #[test]
    fn test_history_clear() {
        let mut history = ConversationHistory::new(4);
        history.record_turn("q", "a");
        assert_eq!(history.len(), 2);
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_prompt_order() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let messages = PromptBuilder::new()
            .system_prompt("Be brief.")
            .with_history(&history)
            .user_message("how are you")
            .build();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[3], Message::user("how are you"));
    }

    #[test]
    fn test_blank_system_prompt_skipped() {
        let builder = PromptBuilder::new().system_prompt("  ").user_message("x");
        assert_eq!(builder.message_count(), 1);
    }
}
