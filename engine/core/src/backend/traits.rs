//! Backend trait definitions.
//!
//! Everything the engine needs from a chat backend, expressed as one
//! async trait so tests can substitute a scripted double for the HTTP
//! implementation.
//!
//! Errors at this seam are `anyhow`: the engine categorizes and presents
//! them, it never matches on transport internals.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::{
    ConversationId, ConversationSummary, FeedbackType, HistoryPage, MessageId,
};
use crate::session::RequestToken;
use crate::stream::StreamEvent;

/// A streaming send, as handed to the transport.
#[derive(Clone, Debug)]
pub struct SendRequest {
    /// Token every resulting event must carry.
    pub token: RequestToken,
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Message text.
    pub content: String,
}

/// The transport seam.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Create a conversation and return its summary.
    async fn create_conversation(&self, title: &str) -> anyhow::Result<ConversationSummary>;

    /// List the user's conversations, newest first.
    async fn list_conversations(&self) -> anyhow::Result<Vec<ConversationSummary>>;

    /// Rename a conversation.
    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> anyhow::Result<()>;

    /// Delete a conversation.
    async fn delete_conversation(&self, id: &ConversationId) -> anyhow::Result<()>;

    /// Delete every message in a conversation, keeping the conversation.
    async fn clear_conversation(&self, id: &ConversationId) -> anyhow::Result<()>;

    /// Fetch one page of messages strictly older than `before` (or the
    /// newest page when `before` is `None`), oldest first.
    async fn fetch_history(
        &self,
        id: &ConversationId,
        before: Option<&MessageId>,
        limit: usize,
    ) -> anyhow::Result<HistoryPage>;

    /// Send a message and stream the reply.
    ///
    /// The returned channel yields events until a terminal event or
    /// transport failure; the sender side closes afterwards.
    async fn send_streaming(
        &self,
        request: SendRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamEvent>>;

    /// Submit feedback on an assistant message.
    async fn submit_feedback(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        feedback: FeedbackType,
    ) -> anyhow::Result<()>;
}
