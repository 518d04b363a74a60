//! HTTP Backend
//!
//! [`ChatBackend`] over a JSON REST API with newline-delimited JSON
//! streaming for replies.
//!
//! # Wire Format
//!
//! REST responses arrive in a `{"status":"ok", ...}` envelope with
//! camelCase field names; the envelope DTOs here unwrap that into the
//! engine's own types. History, for example:
//!
//! ```json
//! {"status":"ok","messages":[{"id":"m1","role":"user","content":"hi"}],
//!  "hasMore":true,"firstId":"m1"}
//! ```
//!
//! A streaming send POSTs to `/api/chat` and reads the response body as
//! one JSON object per line:
//!
//! ```json
//! {"type":"start"}
//! {"type":"heartbeat"}
//! {"type":"token","text":"Hel"}
//! {"type":"message","full_text":"Hello"}
//! {"type":"error","cause":"model overloaded"}
//! {"type":"finish","answer":"Hello!","message_id":"m42"}
//! ```
//!
//! Unparseable lines are logged and skipped; the stream itself decides
//! when the reply is over. A body that ends without a terminal event is
//! reported as a transport error so the engine never waits on a closed
//! connection.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::messages::{
    ConversationId, ConversationSummary, FeedbackType, FinishPayload, HistoryPage, Message,
    MessageId,
};
use crate::stream::{StreamEvent, StreamEventKind};

use super::traits::{ChatBackend, SendRequest};

/// Capacity of the per-request event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Start,
    Heartbeat,
    Token {
        text: String,
    },
    Message {
        full_text: String,
    },
    Error {
        cause: String,
    },
    Finish {
        #[serde(flatten)]
        payload: FinishPayload,
    },
}

impl WireEvent {
    fn into_kind(self) -> StreamEventKind {
        match self {
            Self::Start => StreamEventKind::Start,
            Self::Heartbeat => StreamEventKind::Heartbeat,
            Self::Token { text } => StreamEventKind::Token { text },
            Self::Message { full_text } => StreamEventKind::Snapshot { full_text },
            Self::Error { cause } => StreamEventKind::Error { cause },
            Self::Finish { payload } => StreamEventKind::Finish(payload),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Finish { .. })
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    conversation_id: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct TitleBody<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct RenameBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct FeedbackBody<'a> {
    conversation_id: &'a str,
    message_id: &'a str,
    feedback_type: &'a str,
}

/// Bare `{"status":"ok"}` acknowledgement.
#[derive(Debug, Deserialize)]
struct AckEnvelope {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ConversationEnvelope {
    status: String,
    conversation: ConversationSummary,
}

#[derive(Debug, Deserialize)]
struct ConversationsEnvelope {
    status: String,
    #[serde(default)]
    conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEnvelope {
    status: String,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    has_more: bool,
    first_id: Option<MessageId>,
}

impl HistoryEnvelope {
    fn into_page(self) -> HistoryPage {
        HistoryPage {
            messages: self.messages,
            has_more: self.has_more,
            first_id: self.first_id,
        }
    }
}

fn check_status(status: &str) -> anyhow::Result<()> {
    if status == "ok" {
        Ok(())
    } else {
        anyhow::bail!("server reported status {status:?}")
    }
}

// ============================================================================
// Backend
// ============================================================================

/// [`ChatBackend`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a backend for the configured base URL.
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// The client, for sharing with the image fetcher.
    #[must_use]
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn ensure_success(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("HTTP {status}: {}", body.trim())
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn create_conversation(&self, title: &str) -> anyhow::Result<ConversationSummary> {
        let response = self
            .client
            .post(self.url("/api/conversations"))
            .json(&TitleBody { title })
            .send()
            .await?;
        let envelope: ConversationEnvelope = ensure_success(response).await?.json().await?;
        check_status(&envelope.status)?;
        Ok(envelope.conversation)
    }

    async fn list_conversations(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        let response = self
            .client
            .get(self.url("/api/conversations"))
            .send()
            .await?;
        let envelope: ConversationsEnvelope = ensure_success(response).await?.json().await?;
        check_status(&envelope.status)?;
        Ok(envelope.conversations)
    }

    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/api/conversations/{id}")))
            .json(&RenameBody { name: title })
            .send()
            .await?;
        let ack: AckEnvelope = ensure_success(response).await?.json().await?;
        check_status(&ack.status)
    }

    async fn delete_conversation(&self, id: &ConversationId) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/conversations/{id}")))
            .send()
            .await?;
        let ack: AckEnvelope = ensure_success(response).await?.json().await?;
        check_status(&ack.status)
    }

    async fn clear_conversation(&self, id: &ConversationId) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/conversations/{id}/clear")))
            .send()
            .await?;
        let ack: AckEnvelope = ensure_success(response).await?.json().await?;
        check_status(&ack.status)
    }

    async fn fetch_history(
        &self,
        id: &ConversationId,
        before: Option<&MessageId>,
        limit: usize,
    ) -> anyhow::Result<HistoryPage> {
        let mut request = self
            .client
            .get(self.url(&format!("/api/conversations/{id}/history")))
            .query(&[("limit", limit.to_string())]);
        if let Some(before) = before {
            // The server calls the backward anchor `afterId`.
            request = request.query(&[("afterId", before.as_str())]);
        }
        let response = request.send().await?;
        let envelope: HistoryEnvelope = ensure_success(response).await?.json().await?;
        check_status(&envelope.status)?;
        Ok(envelope.into_page())
    }

    async fn send_streaming(
        &self,
        request: SendRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamEvent>> {
        let response = self
            .client
            .post(self.url("/api/chat"))
            // The reply can outlast the request timeout; the engine's
            // own liveness deadline covers stalls.
            .timeout(std::time::Duration::from_secs(3600))
            .json(&ChatBody {
                conversation_id: request.conversation_id.as_str(),
                content: &request.content,
            })
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let token = request.token;
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut pending = String::new();
            let mut saw_terminal = false;

            'read: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent {
                                token: token.clone(),
                                kind: StreamEventKind::Error {
                                    cause: format!("network: {e}"),
                                },
                            })
                            .await;
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let wire: WireEvent = match serde_json::from_str(line) {
                        Ok(wire) => wire,
                        Err(e) => {
                            warn!(error = %e, "skipping unparseable stream line");
                            continue;
                        }
                    };
                    saw_terminal = wire.is_terminal();
                    let event = StreamEvent {
                        token: token.clone(),
                        kind: wire.into_kind(),
                    };
                    if tx.send(event).await.is_err() {
                        // Receiver gone; nobody cares about the rest.
                        debug!("event receiver dropped, abandoning stream");
                        break 'read;
                    }
                    if saw_terminal {
                        return;
                    }
                }
            }

            if !saw_terminal {
                let _ = tx
                    .send(StreamEvent {
                        token,
                        kind: StreamEventKind::Error {
                            cause: "connection closed before the reply finished".to_string(),
                        },
                    })
                    .await;
            }
        });

        Ok(rx)
    }

    async fn submit_feedback(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        feedback: FeedbackType,
    ) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.url("/api/feedback"))
            .json(&FeedbackBody {
                conversation_id: conversation.as_str(),
                message_id: message.as_str(),
                feedback_type: feedback.as_str(),
            })
            .send()
            .await?;
        let ack: AckEnvelope = ensure_success(response).await?.json().await?;
        check_status(&ack.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_event_parsing() {
        let wire: WireEvent = serde_json::from_str(r#"{"type":"token","text":"Hi"}"#).unwrap();
        assert!(matches!(wire, WireEvent::Token { ref text } if text == "Hi"));

        let wire: WireEvent =
            serde_json::from_str(r#"{"type":"message","full_text":"Hello"}"#).unwrap();
        assert!(matches!(
            wire.into_kind(),
            StreamEventKind::Snapshot { ref full_text } if full_text == "Hello"
        ));
    }

    #[test]
    fn test_finish_payload_is_flattened() {
        let wire: WireEvent = serde_json::from_str(
            r#"{"type":"finish","answer":"done","message_id":"m1","follow_up_questions":["More?"]}"#,
        )
        .unwrap();
        assert!(wire.is_terminal());
        let StreamEventKind::Finish(payload) = wire.into_kind() else {
            panic!("expected finish");
        };
        assert_eq!(payload.answer.as_deref(), Some("done"));
        assert_eq!(payload.message_id, Some(MessageId::new("m1")));
        assert_eq!(payload.follow_up_questions, vec!["More?".to_string()]);
    }

    #[test]
    fn test_bare_finish_parses() {
        let wire: WireEvent = serde_json::from_str(r#"{"type":"finish"}"#).unwrap();
        let StreamEventKind::Finish(payload) = wire.into_kind() else {
            panic!("expected finish");
        };
        assert_eq!(payload, FinishPayload::default());
    }

    #[test]
    fn test_unknown_event_type_is_an_error() {
        let wire: Result<WireEvent, _> = serde_json::from_str(r#"{"type":"telemetry"}"#);
        assert!(wire.is_err());
    }

    #[test]
    fn test_history_envelope_unwraps_to_page() {
        let envelope: HistoryEnvelope = serde_json::from_str(
            r#"{
                "status": "ok",
                "messages": [
                    {"id": "m1", "role": "user", "content": "hi"},
                    {"id": "m2", "role": "assistant", "content": "hello"}
                ],
                "hasMore": true,
                "firstId": "m1"
            }"#,
        )
        .unwrap();
        assert_eq!(check_status(&envelope.status).ok(), Some(()));
        let page = envelope.into_page();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[1].role, crate::messages::MessageRole::Assistant);
        assert!(page.has_more);
        assert_eq!(page.first_id, Some(MessageId::new("m1")));
    }

    #[test]
    fn test_empty_history_envelope_defaults() {
        let envelope: HistoryEnvelope = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        let page = envelope.into_page();
        assert!(page.messages.is_empty());
        assert!(!page.has_more);
        assert!(page.first_id.is_none());
    }

    #[test]
    fn test_conversation_envelopes_unwrap() {
        let created: ConversationEnvelope = serde_json::from_str(
            r#"{"status":"ok","conversation":{"id":"c1","title":"First"}}"#,
        )
        .unwrap();
        assert_eq!(created.conversation.id, ConversationId::new("c1"));

        let listed: ConversationsEnvelope = serde_json::from_str(
            r#"{"status":"ok","conversations":[{"id":"c1","title":"First"}]}"#,
        )
        .unwrap();
        assert_eq!(listed.conversations.len(), 1);
    }

    #[test]
    fn test_non_ok_status_is_an_error() {
        assert!(check_status("ok").is_ok());
        assert!(check_status("error").is_err());
    }

    #[test]
    fn test_request_body_wire_names() {
        let rename = serde_json::to_value(RenameBody { name: "Renamed" }).unwrap();
        assert_eq!(rename["name"], "Renamed");

        let feedback = serde_json::to_value(FeedbackBody {
            conversation_id: "c1",
            message_id: "m1",
            feedback_type: "like",
        })
        .unwrap();
        assert_eq!(feedback["conversation_id"], "c1");
        assert_eq!(feedback["message_id"], "m1");
        assert_eq!(feedback["feedback_type"], "like");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let backend = HttpBackend::new(&ApiConfig {
            base_url: "http://localhost:9000/".to_string(),
            ..ApiConfig::default()
        })
        .unwrap();
        assert_eq!(backend.url("/api/chat"), "http://localhost:9000/api/chat");
    }
}
