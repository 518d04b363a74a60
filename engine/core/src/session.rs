//! Session and Request Lifecycle
//!
//! One controller owns the active-request slot and the session state
//! machine. Every stream event and timer decision is gated through it.
//!
//! # Design Philosophy
//!
//! Cancellation is entirely token-based. Switching conversations, clearing
//! a conversation, or starting a new send never tears down an in-flight
//! transfer; it invalidates the current [`RequestToken`], and events that
//! arrive carrying a stale token are dropped at the gate. Temporal order
//! is irrelevant: only token validity determines whether an event has any
//! effect.
//!
//! Error and Timeout are resting states, not terminal ones. Ending a
//! request always folds the session back to Idle so the next send starts
//! from a clean slate.

use std::time::Instant;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::errors::EngineError;
use crate::messages::ConversationId;

// ============================================================================
// Request identity
// ============================================================================

/// Unique identifier of a single streaming request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying one request against one conversation.
///
/// A copy of the token travels with every event the transport produces for
/// that request. An event is applied only if its token still matches the
/// controller's current one; everything else is a silent no-op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestToken {
    /// Conversation the request targets. `None` until the server assigns
    /// an id for an auto-created conversation.
    pub conversation_id: Option<ConversationId>,
    /// Unique id of this request.
    pub request_id: RequestId,
    /// Monotonic sequence number, strictly increasing per controller.
    pub seq: u64,
}

// ============================================================================
// Session state machine
// ============================================================================

/// Where the session currently is in the request lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// No request in flight; input enabled.
    Idle,
    /// Request sent, no response activity yet.
    Connecting,
    /// Stream established and producing events.
    Streaming,
    /// The last request ended with a presented error.
    Error,
    /// The last request was abandoned for lack of liveness.
    Timeout,
}

impl SessionStatus {
    /// Whether a request is currently in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

/// Owns the active-request slot, the session status, and the staged
/// timeout deadlines.
#[derive(Debug)]
pub struct SessionController {
    status: SessionStatus,
    active_conversation: Option<ConversationId>,
    current: Option<RequestToken>,
    next_seq: u64,
    consecutive_errors: u32,
    /// Deadline for the first content after the stream establishes.
    /// Armed on the Connecting to Streaming transition, not at send.
    grace_deadline: Option<Instant>,
    /// Rolling deadline for stream liveness; pushed forward by any
    /// content-bearing or heartbeat event.
    liveness_deadline: Option<Instant>,
    config: StreamConfig,
}

/// What a due timeout means for the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The first-content grace period expired; show a waiting hint but
    /// keep the request alive.
    GraceExpired,
    /// No liveness signal within the threshold; abandon the request.
    LivenessExpired,
}

impl SessionController {
    /// Create a controller in the Idle state.
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self {
            status: SessionStatus::Idle,
            active_conversation: None,
            current: None,
            next_seq: 0,
            consecutive_errors: 0,
            grace_deadline: None,
            liveness_deadline: None,
            config,
        }
    }

    /// Current session status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The conversation currently displayed, if any.
    #[must_use]
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active_conversation.as_ref()
    }

    /// The token of the request currently in flight, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<&RequestToken> {
        self.current.as_ref()
    }

    /// Consecutive failed requests since the last success.
    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    // ------------------------------------------------------------------
    // Request lifecycle
    // ------------------------------------------------------------------

    /// Start a new request, minting a fresh token.
    ///
    /// Refused while another request is in flight; the caller surfaces
    /// that as disabled input rather than queueing.
    pub fn begin_request(&mut self, now: Instant) -> Result<RequestToken, EngineError> {
        if self.status.is_busy() {
            return Err(EngineError::Busy);
        }
        self.next_seq += 1;
        let token = RequestToken {
            conversation_id: self.active_conversation.clone(),
            request_id: RequestId::generate(),
            seq: self.next_seq,
        };
        debug!(request_id = %token.request_id, seq = token.seq, "request started");
        self.current = Some(token.clone());
        self.status = SessionStatus::Connecting;
        self.grace_deadline = None;
        self.liveness_deadline = Some(now + self.config.liveness_timeout);
        Ok(token)
    }

    /// Whether `token` is still the request the session cares about.
    #[must_use]
    pub fn is_current(&self, token: &RequestToken) -> bool {
        self.current.as_ref() == Some(token)
    }

    /// End the request identified by `token`, folding the session to Idle.
    ///
    /// Stale tokens are ignored: a request that was superseded must not
    /// disturb its successor's state.
    pub fn end_request(&mut self, token: &RequestToken) {
        if !self.is_current(token) {
            debug!(request_id = %token.request_id, "ignoring end of superseded request");
            return;
        }
        self.current = None;
        self.grace_deadline = None;
        self.liveness_deadline = None;
        self.status = SessionStatus::Idle;
    }

    /// Adopt the server-assigned conversation id for an auto-created
    /// conversation, patching the in-flight token to match.
    pub fn adopt_conversation(&mut self, id: ConversationId) {
        if let Some(token) = &mut self.current {
            if token.conversation_id.is_none() {
                token.conversation_id = Some(id.clone());
            }
        }
        self.active_conversation = Some(id);
    }

    /// Record a liveness signal (stream establishment or a heartbeat).
    ///
    /// Moves Connecting to Streaming, arming the first-content grace
    /// window, and pushes the liveness deadline forward. Later heartbeats
    /// leave the grace deadline untouched: a live but silent stream still
    /// owes the user a waiting hint.
    pub fn note_liveness(&mut self, now: Instant) {
        if self.status == SessionStatus::Connecting {
            self.status = SessionStatus::Streaming;
            self.grace_deadline = Some(now + self.config.first_content_grace);
        }
        self.liveness_deadline = Some(now + self.config.liveness_timeout);
    }

    /// Record content-bearing activity, which also retires the grace
    /// deadline.
    pub fn note_content(&mut self, now: Instant) {
        self.note_liveness(now);
        self.grace_deadline = None;
    }

    /// Record a failed request and report whether the failure streak has
    /// reached the escalation threshold.
    pub fn record_error(&mut self, threshold: u32) -> bool {
        self.consecutive_errors += 1;
        self.status = SessionStatus::Error;
        if self.consecutive_errors >= threshold {
            warn!(
                consecutive = self.consecutive_errors,
                "repeated request failures"
            );
            true
        } else {
            false
        }
    }

    /// Record a successful request, clearing the failure streak.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Mark the session as timed out, pending `end_request`.
    pub fn mark_timed_out(&mut self) {
        self.status = SessionStatus::Timeout;
    }

    // ------------------------------------------------------------------
    // Conversation switches and clears
    // ------------------------------------------------------------------

    /// Switch to another conversation (or to a fresh unsaved one).
    ///
    /// Any in-flight request is invalidated on the spot; its remaining
    /// events will fail the token gate and vanish.
    pub fn switch_conversation(&mut self, id: Option<ConversationId>) {
        if let Some(token) = self.current.take() {
            debug!(request_id = %token.request_id, "request superseded by conversation switch");
        }
        self.grace_deadline = None;
        self.liveness_deadline = None;
        self.active_conversation = id;
        self.status = SessionStatus::Idle;
    }

    /// Clear the current conversation's transcript.
    ///
    /// Same token invalidation as a switch; the active conversation is
    /// kept.
    pub fn clear_conversation(&mut self) {
        self.current = None;
        self.grace_deadline = None;
        self.liveness_deadline = None;
        self.status = SessionStatus::Idle;
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Check staged deadlines against `now`.
    ///
    /// Grace expiry is reported once, then retired; liveness expiry is
    /// reported as long as a request is in flight. Liveness wins when
    /// both are due.
    pub fn timeout_due(&mut self, now: Instant) -> Option<TimeoutKind> {
        if self.current.is_none() {
            return None;
        }
        if let Some(deadline) = self.liveness_deadline {
            if now >= deadline {
                return Some(TimeoutKind::LivenessExpired);
            }
        }
        if let Some(deadline) = self.grace_deadline {
            if now >= deadline {
                self.grace_deadline = None;
                return Some(TimeoutKind::GraceExpired);
            }
        }
        None
    }
}
