use serde::{Deserialize, Serialize};

use crate::types::Citation;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    /// The local user.
    #[serde(rename = "user")]
    User,
    /// The generation backend.
    #[serde(rename = "assistant", alias = "ai", alias = "bot", alias = "model")]
    Assistant,
}

/// One committed turn of a conversation.
///
/// Messages are immutable once they are part of a session. Citations only ever appear on
/// assistant messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The author.
    pub sender: Sender,
    /// Raw text as typed or generated; never markup.
    pub content: String,
    /// Sources backing an assistant answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            content: content.into(),
            citations: Vec::new(),
        }
    }

    /// Create an assistant message with its citations.
    pub fn assistant(content: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            sender: Sender::Assistant,
            content: content.into(),
            citations,
        }
    }

    /// True when the user wrote this message.
    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn user_message_omits_empty_citations() {
        let message = Message::user("Hello");
        assert_eq!(
            to_value(&message).unwrap(),
            json!({"sender": "user", "content": "Hello"})
        );
    }

    #[test]
    fn legacy_sender_spelling_reads_as_assistant() {
        let message: Message =
            serde_json::from_value(json!({"sender": "ai", "content": "Salam"})).unwrap();
        assert_eq!(message.sender, Sender::Assistant);
        assert!(message.citations.is_empty());
    }
}
