//! Core Identifiers and Message Types
//!
//! Shared vocabulary for the engine: conversation/message identity, the
//! rendered message unit, and the payload carried by a terminal finish event.
//!
//! # Design Philosophy
//!
//! Conversation and message ids are opaque server-assigned strings. The
//! engine never inspects them beyond equality: they exist for staleness
//! checks, pagination cursors, and feedback routing. Request identity (the
//! client-side half) lives in [`crate::session`].

use serde::{Deserialize, Serialize};

/// Opaque identifier of a conversation, assigned by the server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Wrap a raw server-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of a message, assigned by the server.
///
/// Locally echoed user messages that have not round-tripped yet use a
/// `local-` prefixed id minted by the engine; these never collide with
/// server ids and are replaced on the next history load.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Wrap a raw server-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a local (not yet server-acknowledged) message id.
    #[must_use]
    pub fn local(seq: u64) -> Self {
        Self(format!("local-{seq}"))
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a rendered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The human user.
    User,
    /// The assistant.
    Assistant,
}

/// A rendered message unit.
///
/// Identity is the server-assigned id; it is the dedup key during
/// pagination and the anchor for feedback submission. The DOM node a
/// sink attaches to a message is the sink's own business.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned message id.
    pub id: MessageId,
    /// Author of the message.
    pub role: MessageRole,
    /// Markdown content.
    pub content: String,
}

impl Message {
    /// Create a message.
    pub fn new(id: MessageId, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
        }
    }
}

/// Payload carried by the terminal finish event of a stream.
///
/// `answer` reflects server-side post-processing that the incremental
/// stream never sees, so when present it always wins over the accumulated
/// buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishPayload {
    /// Authoritative final answer text, if the server produced one.
    pub answer: Option<String>,
    /// Conversation id the reply belongs to (echoed by the server).
    pub conversation_id: Option<ConversationId>,
    /// Server-assigned id of the completed assistant message.
    pub message_id: Option<MessageId>,
    /// Suggested follow-up questions, possibly empty.
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}

/// One page of backward history as returned by the backend.
///
/// This is the engine-side shape; the HTTP wire envelope that carries it
/// lives in the backend.
#[derive(Clone, Debug, Default)]
pub struct HistoryPage {
    /// Messages in chronological order (oldest first within the page).
    pub messages: Vec<Message>,
    /// Whether an older page exists beyond this one.
    pub has_more: bool,
    /// Id of the oldest message in this page, if any.
    pub first_id: Option<MessageId>,
}

/// User feedback on an assistant message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    /// Thumbs up.
    Like,
    /// Retract a previous thumbs up.
    Unlike,
}

impl FeedbackType {
    /// Wire representation used by the feedback endpoint.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Unlike => "unlike",
        }
    }
}

/// Summary of a conversation as listed by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id.
    pub id: ConversationId,
    /// Display title.
    #[serde(default)]
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_message_ids_are_prefixed() {
        let id = MessageId::local(7);
        assert_eq!(id.as_str(), "local-7");
        assert_ne!(id, MessageId::local(8));
    }

    #[test]
    fn test_feedback_wire_names() {
        assert_eq!(FeedbackType::Like.as_str(), "like");
        assert_eq!(FeedbackType::Unlike.as_str(), "unlike");
    }

    #[test]
    fn test_finish_payload_deserializes_with_missing_fields() {
        let payload: FinishPayload = serde_json::from_str(r#"{"answer":"hi"}"#).unwrap();
        assert_eq!(payload.answer.as_deref(), Some("hi"));
        assert!(payload.follow_up_questions.is_empty());
        assert!(payload.message_id.is_none());
    }

    #[test]
    fn test_role_wire_casing() {
        let role: MessageRole = serde_json::from_str(r#""assistant""#).unwrap();
        assert_eq!(role, MessageRole::Assistant);
    }
}
