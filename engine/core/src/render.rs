//! Render Synchronization
//!
//! The seam between engine logic and whatever actually draws the
//! transcript, plus the synchronizer that keeps the in-progress assistant
//! reply painted while tokens arrive.
//!
//! # Design Philosophy
//!
//! The engine never touches a widget or a DOM node. Everything it wants
//! shown goes through [`RenderSink`], which makes the whole stream
//! pipeline testable with a recording double. Live renders are coalesced:
//! token events only update a pending buffer, and the run loop's tick
//! flushes at most one render per interval, skipping flushes whose content
//! has not changed.

use std::sync::Arc;
use std::time::Duration;

use crate::images::ImageSlot;
use crate::markdown;
use crate::messages::{Message, MessageId};

// ============================================================================
// Sink seam
// ============================================================================

/// Scroll position of the transcript viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScrollMetrics {
    /// Distance from the top of the content to the top of the viewport.
    pub scroll_top: f64,
    /// Total height of the transcript content.
    pub scroll_height: f64,
    /// Height of the visible viewport.
    pub viewport_height: f64,
}

impl ScrollMetrics {
    /// Whether the viewport is pinned to the bottom of the content.
    ///
    /// A zero-sized viewport has not been measured yet and reports false,
    /// so nothing auto-scrolls before layout has happened.
    #[must_use]
    pub fn at_bottom(&self) -> bool {
        self.viewport_height > 0.0
            && self.scroll_top + self.viewport_height >= self.scroll_height - 1.0
    }
}

/// Presentation seam the engine renders through.
///
/// Implementations translate these calls into actual UI mutations; the
/// engine only guarantees the order and content of the calls.
pub trait RenderSink: Send {
    /// Append a user message at the bottom of the transcript.
    fn insert_user_message(&mut self, message: &Message);

    /// Show the waiting hint in the live reply area.
    fn show_waiting_hint(&mut self);

    /// Replace the live (in-progress) reply area with new markdown.
    fn set_live_content(&mut self, content: &str);

    /// Commit the live reply as a finished assistant message and show any
    /// suggested follow-up questions after it.
    fn finalize_live(&mut self, message: &Message, follow_ups: &[String]);

    /// Replace the live reply area with a notice (error text or a retry
    /// prompt) instead of content.
    fn replace_live_with_notice(&mut self, notice: &str);

    /// Remove every message from the transcript.
    fn clear_transcript(&mut self);

    /// Insert older messages above the current content, each fading in
    /// `stagger_step` later than the one before it.
    fn splice_older(&mut self, messages: &[Message], stagger_step: Duration);

    /// Whether a message with this id is already rendered.
    fn contains_message(&self, id: &MessageId) -> bool;

    /// Current scroll position.
    fn scroll_metrics(&self) -> ScrollMetrics;

    /// Set the scroll position directly, without animation.
    fn set_scroll_top(&mut self, top: f64);

    /// Scroll to the bottom of the transcript.
    fn scroll_to_bottom(&mut self);

    /// The lazy image containers inside a rendered message.
    fn image_slots(&self, id: &MessageId) -> Vec<Arc<dyn ImageSlot>>;
}

/// Shared, lockable handle to a sink.
pub type SharedSink = Arc<parking_lot::Mutex<dyn RenderSink>>;

// ============================================================================
// Live-render synchronizer
// ============================================================================

/// Keeps the live reply area in sync with the accumulating stream buffer.
#[derive(Debug, Default)]
pub struct RenderSync {
    pending: Option<String>,
    last_flushed: String,
    waiting_hint_shown: bool,
}

impl RenderSync {
    /// Create a synchronizer with nothing rendered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record new buffer content to be rendered at the next flush.
    pub fn update(&mut self, buffer: &str) {
        self.pending = Some(buffer.to_string());
    }

    /// Show the waiting hint, once, if no content has rendered yet.
    pub fn show_waiting_hint(&mut self, sink: &mut dyn RenderSink) {
        if self.waiting_hint_shown || !self.last_flushed.is_empty() {
            return;
        }
        self.waiting_hint_shown = true;
        sink.show_waiting_hint();
    }

    /// Paint pending content if it differs from what is already shown.
    ///
    /// Image references are masked to a fixed placeholder so partial
    /// loads never thrash layout mid-stream. Returns whether a render
    /// happened.
    pub fn flush(&mut self, sink: &mut dyn RenderSink) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        if pending == self.last_flushed {
            return false;
        }
        let pinned = sink.scroll_metrics().at_bottom();
        sink.set_live_content(&markdown::mask_images(&pending));
        if pinned {
            sink.scroll_to_bottom();
        }
        self.last_flushed = pending;
        self.waiting_hint_shown = false;
        true
    }

    /// Commit the final reply.
    ///
    /// The caption artifact is stripped, image references become lazy
    /// containers, and the URLs they defer are returned in order for
    /// preload and activation.
    pub fn finalize(
        &mut self,
        sink: &mut dyn RenderSink,
        id: MessageId,
        role: crate::messages::MessageRole,
        text: &str,
        follow_ups: &[String],
    ) -> Vec<String> {
        let stripped = markdown::strip_caption_suffixes(text);
        let (content, urls) = markdown::finalize_images(&stripped);
        sink.finalize_live(&Message::new(id, role, content), follow_ups);
        self.reset();
        urls
    }

    /// Forget all live state, leaving the sink untouched.
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_flushed.clear();
        self.waiting_hint_shown = false;
    }

    /// Whether any content has been painted to the live area.
    #[must_use]
    pub fn has_rendered(&self) -> bool {
        !self.last_flushed.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::messages::MessageRole;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_at_bottom_requires_a_measured_viewport() {
        assert!(!ScrollMetrics::default().at_bottom());
        assert!(ScrollMetrics {
            scroll_top: 900.0,
            scroll_height: 1000.0,
            viewport_height: 100.0,
        }
        .at_bottom());
        assert!(!ScrollMetrics {
            scroll_top: 0.0,
            scroll_height: 1000.0,
            viewport_height: 100.0,
        }
        .at_bottom());
    }

    #[test]
    fn test_flush_without_metrics_does_not_autoscroll() {
        // Default metrics mean the sink has not been measured; flushing
        // must paint without forcing a scroll.
        let mut sync = RenderSync::new();
        let mut sink = RecordingSink::default();
        sync.update("hello");
        assert!(sync.flush(&mut sink));
        assert_eq!(sink.calls, vec!["live:hello"]);
    }

    #[test]
    fn test_flush_skips_unchanged_content() {
        let mut sync = RenderSync::new();
        let mut sink = RecordingSink::default();
        sync.update("hello");
        assert!(sync.flush(&mut sink));
        sync.update("hello");
        assert!(!sync.flush(&mut sink));
        assert_eq!(sink.calls, vec!["live:hello"]);
    }

    #[test]
    fn test_flush_coalesces_rapid_updates() {
        let mut sync = RenderSync::new();
        let mut sink = RecordingSink::default();
        sync.update("a");
        sync.update("ab");
        sync.update("abc");
        assert!(sync.flush(&mut sink));
        // Only the latest buffer was painted.
        assert_eq!(sink.calls, vec!["live:abc"]);
    }

    #[test]
    fn test_flush_masks_images() {
        let mut sync = RenderSync::new();
        let mut sink = RecordingSink::default();
        sync.update("see ![x](http://x/a.png)");
        sync.flush(&mut sink);
        assert!(sink.calls[0].contains(markdown::STREAMING_IMAGE_PLACEHOLDER));
        assert!(!sink.calls[0].contains("a.png"));
    }

    #[test]
    fn test_flush_keeps_bottom_pin() {
        let mut sync = RenderSync::new();
        let mut sink = RecordingSink {
            metrics: ScrollMetrics {
                scroll_top: 900.0,
                scroll_height: 1000.0,
                viewport_height: 100.0,
            },
            ..Default::default()
        };
        sync.update("hello");
        sync.flush(&mut sink);
        assert_eq!(sink.calls, vec!["live:hello", "bottom"]);
    }

    #[test]
    fn test_waiting_hint_shown_once_and_only_before_content() {
        let mut sync = RenderSync::new();
        let mut sink = RecordingSink::default();
        sync.show_waiting_hint(&mut sink);
        sync.show_waiting_hint(&mut sink);
        assert_eq!(sink.calls, vec!["hint"]);

        sync.update("text");
        sync.flush(&mut sink);
        // Content has rendered; the hint never comes back.
        sync.show_waiting_hint(&mut sink);
        assert_eq!(sink.calls, vec!["hint", "live:text"]);
    }

    #[test]
    fn test_finalize_strips_caption_and_defers_images() {
        let mut sync = RenderSync::new();
        let mut sink = RecordingSink::default();
        let urls = sync.finalize(
            &mut sink,
            MessageId::new("m1"),
            MessageRole::Assistant,
            "![a](http://x/1.png) [image generated by assistant] done",
            &["And then?".to_string()],
        );
        assert_eq!(urls, vec!["http://x/1.png".to_string()]);
        let call = &sink.calls[0];
        assert!(call.contains("data-src=\"http://x/1.png\""));
        assert!(!call.to_lowercase().contains("generated by assistant"));
        assert!(call.ends_with("|And then?"));
        assert!(!sync.has_rendered());
    }
}
