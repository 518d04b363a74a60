//! Backward History Pagination
//!
//! Cursor state and splice logic for loading older messages above the
//! transcript.
//!
//! # Design Philosophy
//!
//! At most one backward fetch is outstanding; requests while one is in
//! flight are refused, not queued. Fetching and rendering are split into
//! two phases so no sink lock is held across the network await: `begin`
//! claims the in-flight slot and yields the cursor, `apply_page` folds
//! the response into the transcript, `fail` releases the slot.
//!
//! Pages are deduplicated against what is already rendered. Only the
//! residue is spliced, and the viewport is re-anchored so the message the
//! user was looking at does not move.

use tracing::{debug, warn};

use crate::config::HistoryConfig;
use crate::messages::{HistoryPage, MessageId};
use crate::render::RenderSink;

/// Cursor into the conversation's backward history.
#[derive(Clone, Debug, Default)]
pub struct HistoryCursor {
    /// Oldest message id currently known; the `before` anchor of the next
    /// fetch.
    pub first_id: Option<MessageId>,
    /// Whether the server has older messages beyond the cursor.
    pub has_more: bool,
}

/// Parameters for the next backward fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchParams {
    /// Fetch messages strictly older than this id.
    pub before: Option<MessageId>,
    /// Page size.
    pub limit: usize,
}

/// Result of folding one fetched page into the transcript.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// New messages were spliced in above the existing content.
    Spliced {
        /// Ids of the spliced messages, oldest first.
        ids: Vec<MessageId>,
    },
    /// Every message in the page was already rendered; nothing changed
    /// visually but the cursor advanced past the page.
    Skipped,
    /// No older history exists.
    Exhausted,
}

/// Why a backward fetch was not started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchRefusal {
    /// A fetch is already outstanding.
    Busy,
    /// The history is already exhausted.
    Exhausted,
}

/// Owns the backward-pagination cursor for the active conversation.
#[derive(Debug)]
pub struct HistoryPager {
    cursor: HistoryCursor,
    loading: bool,
    config: HistoryConfig,
}

impl HistoryPager {
    /// Create a pager with no conversation loaded.
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            cursor: HistoryCursor::default(),
            loading: false,
            config,
        }
    }

    /// Current cursor.
    #[must_use]
    pub fn cursor(&self) -> &HistoryCursor {
        &self.cursor
    }

    /// Whether a fetch is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Reset for a newly opened conversation whose newest page has just
    /// been rendered.
    pub fn reset(&mut self, first_id: Option<MessageId>, has_more: bool) {
        self.cursor = HistoryCursor { first_id, has_more };
        self.loading = false;
    }

    /// Claim the in-flight slot and produce fetch parameters.
    ///
    /// Refused while another fetch is outstanding or when the history is
    /// exhausted; the caller treats both as a no-op scroll event.
    pub fn begin(&mut self) -> Result<FetchParams, FetchRefusal> {
        if self.loading {
            return Err(FetchRefusal::Busy);
        }
        if !self.cursor.has_more {
            return Err(FetchRefusal::Exhausted);
        }
        self.loading = true;
        Ok(FetchParams {
            before: self.cursor.first_id.clone(),
            limit: self.config.page_size,
        })
    }

    /// Release the in-flight slot after a failed fetch.
    ///
    /// The cursor is untouched; the same page can be retried on the next
    /// scroll. Pagination failures never escalate beyond a log line.
    pub fn fail(&mut self, error: &anyhow::Error) {
        warn!(error = %error, "history fetch failed");
        self.loading = false;
    }

    /// Fold a fetched page into the transcript.
    ///
    /// Messages already rendered are dropped; the residue is spliced
    /// above the current content and the scroll position re-anchored so
    /// the visible content does not jump.
    pub fn apply_page(&mut self, sink: &mut dyn RenderSink, page: HistoryPage) -> LoadOutcome {
        self.loading = false;

        if page.messages.is_empty() {
            // An empty page cannot advance the cursor; treating it as
            // exhausted prevents an infinite refetch of nothing.
            self.cursor.has_more = false;
            return LoadOutcome::Exhausted;
        }

        let residue: Vec<_> = page
            .messages
            .into_iter()
            .filter(|m| !sink.contains_message(&m.id))
            .collect();

        if residue.is_empty() {
            debug!("history page fully deduplicated");
            // The cursor only moves for content that was actually
            // spliced, except when the server says there is nothing
            // further to move toward.
            if !page.has_more {
                self.cursor.has_more = false;
                return LoadOutcome::Exhausted;
            }
            return LoadOutcome::Skipped;
        }

        let ids: Vec<MessageId> = residue.iter().map(|m| m.id.clone()).collect();
        // Oldest spliced message becomes the next fetch anchor.
        self.cursor.first_id = ids.first().cloned();
        self.cursor.has_more = page.has_more;
        let before = sink.scroll_metrics();
        sink.splice_older(&residue, self.config.stagger_step);
        let after = sink.scroll_metrics();
        // Keep the previously visible message where it was.
        sink.set_scroll_top(before.scroll_top + (after.scroll_height - before.scroll_height));

        LoadOutcome::Spliced { ids }
    }
}
