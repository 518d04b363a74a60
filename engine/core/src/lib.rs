//! # Parlor Core
//!
//! Client-side engine for a streaming conversational surface. The engine
//! owns everything between user input and render calls: request identity
//! and staleness, stream event folding, staged timeouts, image
//! load/cache state, and backward history pagination. It draws nothing
//! itself; a [`render::RenderSink`] implementation does.
//!
//! ```text
//!    user input                     backend (HTTP / NDJSON)
//!        |                               |
//!        v                               v
//!   +---------+   token gate   +------------------+
//!   | Chat    |--------------->| StreamCoordinator |
//!   | Engine  |                +------------------+
//!   +---------+                    |         |
//!    |   |   |                     v         v
//!    |   |   |             SessionController  RenderSync
//!    |   |   +--> HistoryPager                    |
//!    |   +------> ImageLoadCache                  v
//!    |                                       RenderSink
//!    +----------------------------------------> (UI)
//! ```
//!
//! # Design Philosophy
//!
//! Superseded work is ignored before it is cancelled. Every streaming
//! request carries a token, and a single gate decides whether an event
//! still matters; aborting the underlying task on a conversation switch
//! is a best-effort courtesy, never the correctness mechanism. Failures
//! stay local to what failed: one image, one history page, one request.

#![deny(missing_docs)]

pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod history;
pub mod images;
pub mod markdown;
pub mod messages;
pub mod render;
pub mod session;
pub mod stream;
pub mod validate;

pub use backend::{ChatBackend, HttpBackend, SendRequest, TaskRegistry};
pub use config::{load_config, ConfigError, EngineConfig};
pub use engine::ChatEngine;
pub use errors::{EngineError, ErrorCategory};
pub use history::{HistoryCursor, HistoryPager, LoadOutcome};
pub use images::{ImageFetcher, ImageLoadCache, ImageSlot, ImageStatus};
pub use messages::{
    ConversationId, ConversationSummary, FeedbackType, FinishPayload, HistoryPage, Message,
    MessageId, MessageRole,
};
pub use render::{RenderSink, ScrollMetrics, SharedSink};
pub use session::{RequestToken, SessionController, SessionStatus};
pub use stream::{StreamCoordinator, StreamEvent, StreamEventKind};
pub use validate::{InputValidator, ValidationResult};
