//! Stream Event Coordination
//!
//! The event union produced by the transport and the coordinator that
//! folds those events into session state, the reply buffer, and render
//! calls.
//!
//! # Design Philosophy
//!
//! Every event carries a copy of the [`RequestToken`] it was issued
//! under, and the coordinator applies an event only if that token is
//! still the session's current one. Everything else is dropped with a
//! debug log and zero side effects. This gate is what makes cancellation
//! correct: transport teardown of a superseded request is best-effort,
//! and any events that slip through simply stop mattering.
//!
//! Content accumulates last-writer-wins. Token events append; snapshot
//! events replace the buffer wholesale, even when the replacement is
//! shorter than what streamed so far.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::errors::ErrorCategory;
use crate::messages::{ConversationId, FinishPayload, MessageId, MessageRole};
use crate::render::{RenderSink, RenderSync};
use crate::session::{RequestToken, SessionController, TimeoutKind};

/// Notice shown when a stream is abandoned for lack of liveness.
pub const STALL_NOTICE: &str = "The reply seems to have stalled. Please try again.";

// ============================================================================
// Events
// ============================================================================

/// One event from a streaming reply.
#[derive(Clone, Debug)]
pub struct StreamEvent {
    /// The request this event belongs to.
    pub token: RequestToken,
    /// What happened.
    pub kind: StreamEventKind,
}

/// The transport-level event union.
#[derive(Clone, Debug)]
pub enum StreamEventKind {
    /// The stream is established.
    Start,
    /// Keep-alive with no content.
    Heartbeat,
    /// An incremental text fragment to append.
    Token {
        /// The fragment.
        text: String,
    },
    /// A full-text snapshot that replaces everything accumulated so far.
    Snapshot {
        /// The authoritative text at this point in the stream.
        full_text: String,
    },
    /// The stream failed.
    Error {
        /// Raw error text from the transport.
        cause: String,
    },
    /// The stream completed.
    Finish(FinishPayload),
}

// ============================================================================
// Coordinator
// ============================================================================

/// What applying an event meant for the request.
#[derive(Debug, PartialEq)]
pub enum EventOutcome {
    /// The event carried a stale token and had no effect.
    Ignored,
    /// The stream continues.
    Progress,
    /// The stream completed; the reply has been committed.
    Finished(FinishedReply),
    /// The stream failed; a notice has been shown.
    Failed(ErrorCategory),
}

/// Details of a committed reply, for post-finish work.
#[derive(Debug, PartialEq)]
pub struct FinishedReply {
    /// Id of the committed assistant message.
    pub message_id: MessageId,
    /// Conversation id echoed by the server, if any.
    pub conversation_id: Option<ConversationId>,
    /// Image URLs deferred into lazy containers, in order of appearance.
    pub image_urls: Vec<String>,
}

/// Outcome of a timer poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Nothing due, or only the waiting hint fired.
    Continue,
    /// Liveness expired; the request has been marked timed out.
    TimedOut,
}

/// Folds stream events into the reply buffer and the sink.
///
/// One coordinator serves one request at a time; `begin` resets it when a
/// new request starts.
#[derive(Debug, Default)]
pub struct StreamCoordinator {
    buffer: String,
    sync: RenderSync,
    limits: LimitsConfig,
}

impl StreamCoordinator {
    /// Create a coordinator with an empty buffer.
    #[must_use]
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            buffer: String::new(),
            sync: RenderSync::new(),
            limits,
        }
    }

    /// Reset for a new request.
    pub fn begin(&mut self) {
        self.buffer.clear();
        self.sync.reset();
    }

    /// The accumulated reply text.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Apply one event.
    ///
    /// Events whose token is not the session's current one are dropped
    /// before any state is touched.
    pub fn handle_event(
        &mut self,
        session: &mut SessionController,
        sink: &mut dyn RenderSink,
        event: StreamEvent,
        now: Instant,
    ) -> EventOutcome {
        if !session.is_current(&event.token) {
            debug!(request_id = %event.token.request_id, "dropping event for superseded request");
            return EventOutcome::Ignored;
        }

        match event.kind {
            StreamEventKind::Start => {
                session.note_liveness(now);
                EventOutcome::Progress
            }
            StreamEventKind::Heartbeat => {
                session.note_liveness(now);
                EventOutcome::Progress
            }
            StreamEventKind::Token { text } => {
                session.note_content(now);
                self.buffer.push_str(&text);
                self.sync.update(&self.buffer);
                EventOutcome::Progress
            }
            StreamEventKind::Snapshot { full_text } => {
                session.note_content(now);
                if full_text.len() < self.buffer.len() {
                    debug!(
                        buffered = self.buffer.len(),
                        snapshot = full_text.len(),
                        "snapshot shrank the reply buffer"
                    );
                }
                self.buffer = full_text;
                self.sync.update(&self.buffer);
                EventOutcome::Progress
            }
            StreamEventKind::Error { cause } => {
                let category = ErrorCategory::categorize(&cause);
                warn!(%cause, ?category, "stream failed");
                sink.replace_live_with_notice(category.user_message());
                session.record_error(self.limits.max_retries);
                EventOutcome::Failed(category)
            }
            StreamEventKind::Finish(payload) => {
                self.finish(session, sink, &event.token, payload)
            }
        }
    }

    fn finish(
        &mut self,
        session: &mut SessionController,
        sink: &mut dyn RenderSink,
        token: &RequestToken,
        payload: FinishPayload,
    ) -> EventOutcome {
        // The post-processed answer reflects work the incremental stream
        // never sees; when present it wins over the buffer.
        let text = payload.answer.unwrap_or_else(|| self.buffer.clone());
        let message_id = payload
            .message_id
            .unwrap_or_else(|| MessageId::local(token.seq));

        if let Some(id) = payload.conversation_id.clone() {
            session.adopt_conversation(id);
        }
        session.record_success();

        let image_urls = self.sync.finalize(
            sink,
            message_id.clone(),
            MessageRole::Assistant,
            &text,
            &payload.follow_up_questions,
        );
        info!(message_id = %message_id, images = image_urls.len(), "reply committed");

        EventOutcome::Finished(FinishedReply {
            message_id,
            conversation_id: payload.conversation_id,
            image_urls,
        })
    }

    /// Paint any pending buffer content.
    pub fn flush(&mut self, sink: &mut dyn RenderSink) -> bool {
        self.sync.flush(sink)
    }

    /// Poll the staged deadlines.
    ///
    /// A grace expiry shows the waiting hint and the stream continues. A
    /// liveness expiry shows the stall notice and marks the session timed
    /// out; the caller ends the request, folding back to Idle. A stall is
    /// not an error and does not touch the failure streak.
    pub fn poll_timers(
        &mut self,
        session: &mut SessionController,
        sink: &mut dyn RenderSink,
        now: Instant,
    ) -> TimerOutcome {
        match session.timeout_due(now) {
            None => TimerOutcome::Continue,
            Some(TimeoutKind::GraceExpired) => {
                self.sync.show_waiting_hint(sink);
                TimerOutcome::Continue
            }
            Some(TimeoutKind::LivenessExpired) => {
                warn!("stream liveness expired");
                sink.replace_live_with_notice(STALL_NOTICE);
                session.mark_timed_out();
                TimerOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::render::testing::RecordingSink;
    use pretty_assertions::assert_eq;

    struct Harness {
        session: SessionController,
        coordinator: StreamCoordinator,
        sink: RecordingSink,
        token: RequestToken,
        now: Instant,
    }

    impl Harness {
        fn start() -> Self {
            let mut session = SessionController::new(StreamConfig::for_testing());
            let now = Instant::now();
            let token = session.begin_request(now).unwrap();
            let mut coordinator = StreamCoordinator::new(LimitsConfig::default());
            coordinator.begin();
            Self {
                session,
                coordinator,
                sink: RecordingSink::default(),
                token,
                now,
            }
        }

        fn apply(&mut self, kind: StreamEventKind) -> EventOutcome {
            let event = StreamEvent {
                token: self.token.clone(),
                kind,
            };
            self.coordinator
                .handle_event(&mut self.session, &mut self.sink, event, self.now)
        }
    }

    #[test]
    fn test_tokens_append_to_buffer() {
        let mut h = Harness::start();
        h.apply(StreamEventKind::Start);
        h.apply(StreamEventKind::Token {
            text: "Hello".to_string(),
        });
        h.apply(StreamEventKind::Token {
            text: ", world".to_string(),
        });
        assert_eq!(h.coordinator.buffer(), "Hello, world");
        h.coordinator.flush(&mut h.sink);
        assert_eq!(h.sink.calls, vec!["live:Hello, world"]);
    }

    #[test]
    fn test_snapshot_replaces_buffer_even_when_shorter() {
        let mut h = Harness::start();
        h.apply(StreamEventKind::Token {
            text: "a very long draft of the reply".to_string(),
        });
        h.apply(StreamEventKind::Snapshot {
            full_text: "short".to_string(),
        });
        assert_eq!(h.coordinator.buffer(), "short");
    }

    #[test]
    fn test_token_after_snapshot_appends_to_snapshot() {
        let mut h = Harness::start();
        h.apply(StreamEventKind::Snapshot {
            full_text: "base".to_string(),
        });
        h.apply(StreamEventKind::Token {
            text: "+more".to_string(),
        });
        assert_eq!(h.coordinator.buffer(), "base+more");
    }

    #[test]
    fn test_stale_events_are_dropped_without_effect() {
        let mut h = Harness::start();
        h.apply(StreamEventKind::Token {
            text: "kept".to_string(),
        });
        let stale = h.token.clone();
        h.session.switch_conversation(None);
        h.token = h.session.begin_request(h.now).unwrap();
        h.coordinator.begin();

        let outcome = h.coordinator.handle_event(
            &mut h.session,
            &mut h.sink,
            StreamEvent {
                token: stale,
                kind: StreamEventKind::Token {
                    text: "ghost".to_string(),
                },
            },
            h.now,
        );
        assert_eq!(outcome, EventOutcome::Ignored);
        assert_eq!(h.coordinator.buffer(), "");
        assert!(h.sink.calls.is_empty());
    }

    #[test]
    fn test_finish_answer_wins_over_buffer() {
        let mut h = Harness::start();
        h.apply(StreamEventKind::Token {
            text: "draft".to_string(),
        });
        let outcome = h.apply(StreamEventKind::Finish(FinishPayload {
            answer: Some("final".to_string()),
            message_id: Some(MessageId::new("m1")),
            ..Default::default()
        }));
        let EventOutcome::Finished(reply) = outcome else {
            panic!("expected Finished, got {outcome:?}");
        };
        assert_eq!(reply.message_id, MessageId::new("m1"));
        assert_eq!(h.sink.calls, vec!["final:final|"]);
    }

    #[test]
    fn test_finish_without_answer_commits_buffer() {
        let mut h = Harness::start();
        h.apply(StreamEventKind::Token {
            text: "streamed text".to_string(),
        });
        let outcome = h.apply(StreamEventKind::Finish(FinishPayload::default()));
        let EventOutcome::Finished(reply) = outcome else {
            panic!("expected Finished, got {outcome:?}");
        };
        // No server id: a local id derived from the request keeps the
        // message addressable until the next history load.
        assert_eq!(reply.message_id, MessageId::local(h.token.seq));
        assert_eq!(h.sink.calls, vec!["final:streamed text|"]);
    }

    #[test]
    fn test_finish_adopts_server_conversation_id() {
        let mut h = Harness::start();
        let outcome = h.apply(StreamEventKind::Finish(FinishPayload {
            conversation_id: Some(ConversationId::new("conv-1")),
            ..Default::default()
        }));
        assert!(matches!(outcome, EventOutcome::Finished(_)));
        assert_eq!(
            h.session.active_conversation().map(ConversationId::as_str),
            Some("conv-1")
        );
    }

    #[test]
    fn test_finish_defers_images_and_reports_urls() {
        let mut h = Harness::start();
        let outcome = h.apply(StreamEventKind::Finish(FinishPayload {
            answer: Some("![a](http://x/1.png) and ![b](http://x/2.png)".to_string()),
            ..Default::default()
        }));
        let EventOutcome::Finished(reply) = outcome else {
            panic!("expected Finished, got {outcome:?}");
        };
        assert_eq!(
            reply.image_urls,
            vec!["http://x/1.png".to_string(), "http://x/2.png".to_string()]
        );
    }

    #[test]
    fn test_error_event_shows_categorized_notice() {
        let mut h = Harness::start();
        let outcome = h.apply(StreamEventKind::Error {
            cause: "connection refused".to_string(),
        });
        assert_eq!(outcome, EventOutcome::Failed(ErrorCategory::Network));
        assert_eq!(
            h.sink.calls,
            vec![format!("notice:{}", ErrorCategory::Network.user_message())]
        );
        assert_eq!(h.session.consecutive_errors(), 1);
    }

    #[test]
    fn test_grace_expiry_shows_waiting_hint_once() {
        let mut h = Harness::start();
        h.apply(StreamEventKind::Start);
        let later = h.now + StreamConfig::for_testing().first_content_grace;
        let outcome = h
            .coordinator
            .poll_timers(&mut h.session, &mut h.sink, later);
        assert_eq!(outcome, TimerOutcome::Continue);
        assert_eq!(h.sink.calls, vec!["hint"]);
    }

    #[test]
    fn test_liveness_expiry_is_a_soft_failure() {
        let mut h = Harness::start();
        let later = h.now + StreamConfig::for_testing().liveness_timeout;
        let outcome = h
            .coordinator
            .poll_timers(&mut h.session, &mut h.sink, later);
        assert_eq!(outcome, TimerOutcome::TimedOut);
        assert_eq!(h.sink.calls, vec![format!("notice:{STALL_NOTICE}")]);
        // A stall is not an error.
        assert_eq!(h.session.consecutive_errors(), 0);
    }

    #[test]
    fn test_heartbeat_defers_liveness_but_not_hint() {
        let mut h = Harness::start();
        let config = StreamConfig::for_testing();
        let mid = h.now + config.liveness_timeout / 2;
        h.coordinator.handle_event(
            &mut h.session,
            &mut h.sink,
            StreamEvent {
                token: h.token.clone(),
                kind: StreamEventKind::Heartbeat,
            },
            mid,
        );
        // The original liveness deadline passes without a stall.
        let original_deadline = h.now + config.liveness_timeout;
        assert_eq!(
            h.coordinator
                .poll_timers(&mut h.session, &mut h.sink, original_deadline),
            TimerOutcome::Continue
        );
        // But the waiting hint still fired: heartbeats are not content.
        assert_eq!(h.sink.calls, vec!["hint"]);
    }
}
