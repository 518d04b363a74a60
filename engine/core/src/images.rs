//! Image Loading and Caching
//!
//! Session-lifetime cache of per-URL load outcomes plus the activation
//! protocol that drives a lazy image container from Loading to a revealed
//! image or an error card.
//!
//! # Design Philosophy
//!
//! The cache is keyed by URL and is strictly monotonic: Loading may become
//! Loaded or Failed, and the terminal states never revert. A URL that
//! failed once renders its error card instantly on every later encounter
//! with no new network activity. Failures are local to one image; nothing
//! here can abort a stream or a history load.
//!
//! Activation treats the underlying image element as racy by construction.
//! The native load may already have finished (possibly as a broken decode)
//! before anyone is listening, so each activation first checks for a
//! completed-but-undecodable image and reroutes it through a fresh probe
//! fetch, otherwise waits for the native outcome under a deadline, and in
//! every case applies exactly one final result through a one-shot guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::ImageConfig;

// ============================================================================
// Cache states
// ============================================================================

/// Load state of one image URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageStatus {
    /// A load is in flight.
    Loading,
    /// The image loaded and decoded successfully.
    Loaded,
    /// The load failed; terminal for the session.
    Failed,
}

impl ImageStatus {
    /// Whether this state may never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Loading)
    }
}

// ============================================================================
// Slot and fetcher seams
// ============================================================================

/// Outcome of a native image load, as reported by the slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeOutcome {
    /// The element fired its load event.
    Loaded,
    /// The element fired its error event.
    Failed(String),
}

/// One lazy image container in rendered content.
///
/// Implemented by the presentation layer (and by test doubles). The slot
/// owns the element-level details; the cache drives it purely through this
/// interface.
#[async_trait]
pub trait ImageSlot: Send + Sync {
    /// The image URL this slot displays.
    fn url(&self) -> String;

    /// Whether the element has already completed with an undecodable
    /// result. Detects loads that finished broken before activation.
    fn is_broken(&self) -> bool;

    /// Show the loading treatment (spinner or skeleton).
    fn show_loading(&self);

    /// Reveal the loaded image. `animate` is false when the slot has
    /// already played its entrance once.
    fn reveal(&self, animate: bool);

    /// Replace the slot with an inline error card.
    fn show_error(&self);

    /// Whether this slot has played its reveal animation before.
    fn was_revealed(&self) -> bool;

    /// Record that the reveal animation has played.
    fn mark_revealed(&self);

    /// Start the native load: apply lazy/async decode hints, then move
    /// the deferred URL into the element.
    fn begin_native_load(&self);

    /// Wait for the element's load or error event.
    async fn native_completion(&self) -> NativeOutcome;
}

/// Network seam for the opportunistic preload at stream finish.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch the URL far enough to know whether it is a usable image.
    async fn probe(&self, url: &str) -> Result<(), String>;
}

/// [`ImageFetcher`] backed by a shared HTTP client.
#[derive(Clone, Debug)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Create a fetcher using the given client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn probe(&self, url: &str) -> Result<(), String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        if bytes.is_empty() {
            return Err("empty response body".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// One-shot finalization
// ============================================================================

/// Guard ensuring a slot's final visual state is applied exactly once,
/// however the native load and error paths race.
#[derive(Debug, Default)]
pub struct FinalizeGuard(AtomicBool);

impl FinalizeGuard {
    /// Create an unfired guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to finalize. Returns true exactly once.
    pub fn try_finalize(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Session-lifetime cache of image load outcomes, shared across messages.
pub struct ImageLoadCache {
    states: DashMap<String, ImageStatus>,
    config: ImageConfig,
    fetcher: Arc<dyn ImageFetcher>,
}

impl ImageLoadCache {
    /// Create an empty cache using `fetcher` for probes.
    #[must_use]
    pub fn new(config: ImageConfig, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            states: DashMap::new(),
            config,
            fetcher,
        }
    }

    /// Current cached status for a URL.
    #[must_use]
    pub fn status(&self, url: &str) -> Option<ImageStatus> {
        self.states.get(url).map(|s| *s)
    }

    /// Record the start of a load. A no-op if the URL already has any
    /// recorded state.
    pub fn mark_loading(&self, url: &str) {
        self.states
            .entry(url.to_string())
            .or_insert(ImageStatus::Loading);
    }

    /// Record a terminal outcome. Terminal states never change, so a
    /// second writer loses silently.
    pub fn mark_terminal(&self, url: &str, status: ImageStatus) {
        debug_assert!(status.is_terminal());
        let mut entry = self
            .states
            .entry(url.to_string())
            .or_insert(ImageStatus::Loading);
        if !entry.is_terminal() {
            *entry = status;
        }
    }

    /// Drop a Loading entry that never resolved, so a later activation
    /// starts fresh. Terminal entries are kept.
    pub fn forget_unresolved(&self, url: &str) {
        self.states
            .remove_if(url, |_, status| !status.is_terminal());
    }

    /// Opportunistically fetch `url` before its container activates,
    /// waiting at most `budget`.
    ///
    /// A resolved probe warms both the cache and (for HTTP fetchers) the
    /// client's connection pool. An unresolved probe is forgotten so the
    /// container's own activation is unaffected.
    pub async fn preload(&self, url: &str, budget: Duration) {
        if self.status(url).is_some_and(|s| s.is_terminal()) {
            return;
        }
        self.mark_loading(url);
        match tokio::time::timeout(budget, self.fetcher.probe(url)).await {
            Ok(Ok(())) => {
                debug!(url, "image preload resolved");
                self.mark_terminal(url, ImageStatus::Loaded);
            }
            Ok(Err(reason)) => {
                warn!(url, %reason, "image preload failed");
                self.mark_terminal(url, ImageStatus::Failed);
            }
            Err(_) => {
                debug!(url, "image preload did not resolve within budget");
                self.forget_unresolved(url);
            }
        }
    }

    /// Drive one slot to its final visual state.
    ///
    /// Cache hits short-circuit without network activity. Otherwise the
    /// native load runs under the configured deadline and exactly one
    /// outcome is applied.
    pub async fn activate(&self, slot: &dyn ImageSlot) -> ImageStatus {
        let url = slot.url();

        match self.status(&url) {
            Some(ImageStatus::Loaded) => {
                self.reveal_once(slot);
                return ImageStatus::Loaded;
            }
            Some(ImageStatus::Failed) => {
                slot.show_error();
                return ImageStatus::Failed;
            }
            Some(ImageStatus::Loading) | None => {}
        }

        self.mark_loading(&url);
        slot.show_loading();
        slot.begin_native_load();

        // The load may already have completed broken before any listener
        // attached; its event stream is dead, so a fresh probe fetch of
        // the same URL decides instead.
        if slot.is_broken() {
            debug!(url, "image completed broken before activation, probing");
            let guard = FinalizeGuard::new();
            return match tokio::time::timeout(self.config.load_timeout, self.fetcher.probe(&url))
                .await
            {
                Ok(Ok(())) => self.finalize(slot, &url, &guard, Ok(())),
                Ok(Err(reason)) => self.finalize(slot, &url, &guard, Err(&reason)),
                Err(_) => self.finalize(slot, &url, &guard, Err("load timed out")),
            };
        }

        let guard = FinalizeGuard::new();
        match tokio::time::timeout(self.config.load_timeout, slot.native_completion()).await {
            Ok(NativeOutcome::Loaded) => {
                // A load event with a zero-size decode is a broken image.
                if slot.is_broken() {
                    self.finalize(slot, &url, &guard, Err("undecodable image"))
                } else {
                    self.finalize(slot, &url, &guard, Ok(()))
                }
            }
            Ok(NativeOutcome::Failed(reason)) => {
                self.finalize(slot, &url, &guard, Err(reason.as_str()))
            }
            Err(_) => self.finalize(slot, &url, &guard, Err("load timed out")),
        }
    }

    fn finalize(
        &self,
        slot: &dyn ImageSlot,
        url: &str,
        guard: &FinalizeGuard,
        outcome: Result<(), &str>,
    ) -> ImageStatus {
        if !guard.try_finalize() {
            return self.status(url).unwrap_or(ImageStatus::Loading);
        }
        match outcome {
            Ok(()) => {
                self.mark_terminal(url, ImageStatus::Loaded);
                self.reveal_once(slot);
                ImageStatus::Loaded
            }
            Err(reason) => {
                warn!(url, reason, "image load failed");
                self.mark_terminal(url, ImageStatus::Failed);
                slot.show_error();
                ImageStatus::Failed
            }
        }
    }

    /// Reveal with the entrance animation only the first time this slot
    /// shows its image; re-renders of the same slot swap in silently.
    fn reveal_once(&self, slot: &dyn ImageSlot) {
        let animate = !slot.was_revealed();
        slot.reveal(animate);
        slot.mark_revealed();
    }
}
