//! Conversation messages and context keys
//!
//! A [`ConversationMessage`] is one immutable chat turn. Messages are owned
//! by the [`ConversationContext`](crate::short_term) that buffers them and
//! are dropped on eviction or promoted into long-term memory by the
//! transfer pipeline.

use serde::{Deserialize, Serialize};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// End user
    User,
    /// The assistant
    Assistant,
    /// System / platform
    System,
}

/// Message body - plain text or structured multi-part content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Multi-part content (text plus attachment references)
    Parts {
        /// Optional text component
        text: Option<String>,
        /// Attachment URLs or identifiers
        attachments: Vec<String>,
    },
}

impl MessageContent {
    /// The text component, empty if there is none
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Parts { text, .. } => text.as_deref().unwrap_or(""),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// One chat turn, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique message id
    pub id: String,

    /// Author (user or bot id)
    pub author_id: String,

    /// Channel the message was posted in
    pub channel_id: String,

    /// Message body
    pub content: MessageContent,

    /// Wall-clock timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Role of the author
    pub role: MessageRole,
}

impl ConversationMessage {
    /// Create a message with a generated id and the current timestamp
    pub fn new(
        author_id: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<MessageContent>,
        role: MessageRole,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: author_id.into(),
            channel_id: channel_id.into(),
            content: content.into(),
            timestamp: chrono::Utc::now(),
            role,
        }
    }

    /// Convenience constructor for a user message
    pub fn user(
        author_id: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<MessageContent>,
    ) -> Self {
        Self::new(author_id, channel_id, content, MessageRole::User)
    }

    /// Convenience constructor for an assistant message
    pub fn assistant(channel_id: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        Self::new("assistant", channel_id, content, MessageRole::Assistant)
    }

    /// The text body of the message
    pub fn text(&self) -> &str {
        self.content.text()
    }
}

/// Scope of a conversation context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// Per-user context (DMs, cross-channel user memory)
    User,
    /// Per-channel context
    Channel,
}

/// Key identifying one short-term context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    /// Scope of the context
    pub scope: ContextScope,
    /// User or channel id
    pub id: String,
}

impl ContextKey {
    /// Create a context key
    pub fn new(scope: ContextScope, id: impl Into<String>) -> Self {
        Self {
            scope,
            id: id.into(),
        }
    }

    /// Key for a user-scoped context
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(ContextScope::User, id)
    }

    /// Key for a channel-scoped context
    pub fn channel(id: impl Into<String>) -> Self {
        Self::new(ContextScope::Channel, id)
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scope {
            ContextScope::User => write!(f, "user::{}", self.id),
            ContextScope::Channel => write!(f, "channel::{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_access() {
        let msg = ConversationMessage::user("u1", "c1", "hello world");
        assert_eq!(msg.text(), "hello world");
        assert_eq!(msg.role, MessageRole::User);

        let multi = ConversationMessage::new(
            "u1",
            "c1",
            MessageContent::Parts {
                text: Some("see attachment".to_string()),
                attachments: vec!["https://example.com/img.png".to_string()],
            },
            MessageRole::User,
        );
        assert_eq!(multi.text(), "see attachment");
    }

    #[test]
    fn test_context_key_display() {
        assert_eq!(ContextKey::user("42").to_string(), "user::42");
        assert_eq!(ContextKey::channel("99").to_string(), "channel::99");
    }

    #[test]
    fn test_context_key_equality() {
        assert_eq!(ContextKey::user("42"), ContextKey::user("42"));
        assert_ne!(ContextKey::user("42"), ContextKey::channel("42"));
    }
}
