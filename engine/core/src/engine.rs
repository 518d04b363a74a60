//! Engine Facade
//!
//! [`ChatEngine`] ties the session controller, stream coordinator,
//! history pager, and image cache together behind one handle.
//!
//! # Design Philosophy
//!
//! Each send spawns one background task that owns the request end to end:
//! conversation auto-creation, the event loop, timer polling, and the
//! post-finish image work. A superseded token silences the task's events
//! unconditionally; a conversation switch or clear additionally aborts
//! the task best-effort so it stops draining a dead stream. Locks are
//! only ever held across synchronous work, never across an await.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{ChatBackend, HttpBackend, SendRequest, TaskRegistry};
use crate::config::EngineConfig;
use crate::errors::{EngineError, ErrorCategory};
use crate::history::{FetchRefusal, HistoryPager, LoadOutcome};
use crate::images::{HttpImageFetcher, ImageFetcher, ImageLoadCache, ImageStatus};
use crate::messages::{
    ConversationId, ConversationSummary, FeedbackType, Message, MessageId, MessageRole,
};
use crate::render::SharedSink;
use crate::session::{RequestToken, SessionController, SessionStatus};
use crate::stream::{EventOutcome, StreamCoordinator, TimerOutcome};
use crate::validate::{InputValidator, ValidationResult};

/// The client-side engine for one chat surface.
#[derive(Clone)]
pub struct ChatEngine {
    config: EngineConfig,
    backend: Arc<dyn ChatBackend>,
    sink: SharedSink,
    session: Arc<Mutex<SessionController>>,
    pager: Arc<Mutex<HistoryPager>>,
    images: Arc<ImageLoadCache>,
    validator: InputValidator,
    tasks: Arc<TaskRegistry>,
}

impl ChatEngine {
    /// Create an engine over an arbitrary backend and image fetcher.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn ChatBackend>,
        fetcher: Arc<dyn ImageFetcher>,
        sink: SharedSink,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(SessionController::new(config.stream.clone()))),
            pager: Arc::new(Mutex::new(HistoryPager::new(config.history.clone()))),
            images: Arc::new(ImageLoadCache::new(config.images.clone(), fetcher)),
            validator: InputValidator::new(config.limits.clone()),
            tasks: Arc::new(TaskRegistry::new()),
            backend,
            sink,
            config,
        }
    }

    /// Create an engine over the HTTP backend described by the config.
    pub fn over_http(config: EngineConfig, sink: SharedSink) -> anyhow::Result<Self> {
        let backend = HttpBackend::new(&config.api)?;
        let fetcher = Arc::new(HttpImageFetcher::new(backend.client()));
        Ok(Self::new(config, Arc::new(backend), fetcher, sink))
    }

    /// Current session status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.lock().status()
    }

    /// The conversation currently displayed, if any.
    #[must_use]
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.session.lock().active_conversation().cloned()
    }

    /// The image cache, shared across messages for the session.
    #[must_use]
    pub fn images(&self) -> &Arc<ImageLoadCache> {
        &self.images
    }

    /// Abort all background request tasks.
    pub fn shutdown(&self) {
        self.tasks.shutdown();
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a message in the active conversation, streaming the reply.
    ///
    /// If no conversation is active one is created first, titled from the
    /// message text. Refused while another request is in flight.
    pub fn send_message(&self, content: &str) -> Result<RequestToken, EngineError> {
        if let ValidationResult::Invalid(reason) = self.validator.validate_message(content) {
            return Err(EngineError::Validation(reason));
        }
        let content = content.trim().to_string();

        let token = self.session.lock().begin_request(Instant::now())?;
        {
            let mut sink = self.sink.lock();
            sink.insert_user_message(&Message::new(
                MessageId::new(format!("local-{}-user", token.seq)),
                MessageRole::User,
                content.clone(),
            ));
            sink.scroll_to_bottom();
        }

        let engine = self.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let request_id = task_token.request_id;
            engine.run_request(task_token, content).await;
            engine.tasks.deregister(request_id);
        });
        self.tasks.register(token.request_id, handle);
        Ok(token)
    }

    async fn run_request(&self, mut token: RequestToken, content: String) {
        let mut coordinator = StreamCoordinator::new(self.config.limits.clone());
        coordinator.begin();

        // Resolve the target conversation, creating one if the send
        // happened in a fresh transcript.
        let conversation_id = match token.conversation_id.clone() {
            Some(id) => id,
            None => match self.create_for_send(&token, &content).await {
                Some(id) => id,
                None => return,
            },
        };
        self.resync_token(&mut token);

        let request = SendRequest {
            token: token.clone(),
            conversation_id,
            content,
        };
        let mut rx = match self.backend.send_streaming(request).await {
            Ok(rx) => rx,
            Err(e) => {
                self.fail_request(&token, &e.to_string());
                return;
            }
        };

        let mut ticker = tokio::time::interval(self.config.stream.tick_interval);
        loop {
            tokio::select! {
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => {
                        let outcome = {
                            let mut session = self.session.lock();
                            let mut sink = self.sink.lock();
                            coordinator.handle_event(
                                &mut session,
                                &mut *sink,
                                event,
                                Instant::now(),
                            )
                        };
                        match outcome {
                            EventOutcome::Progress => {}
                            EventOutcome::Ignored => {
                                if !self.session.lock().is_current(&token) {
                                    debug!(request_id = %token.request_id, "request superseded, task exiting");
                                    return;
                                }
                            }
                            EventOutcome::Finished(reply) => {
                                self.resync_token(&mut token);
                                self.session.lock().end_request(&token);
                                self.post_finish(reply).await;
                                return;
                            }
                            EventOutcome::Failed(_) => {
                                self.session.lock().end_request(&token);
                                return;
                            }
                        }
                    }
                    None => {
                        // Channel closed with no terminal event.
                        let mut session = self.session.lock();
                        if session.is_current(&token) {
                            self.sink
                                .lock()
                                .replace_live_with_notice(ErrorCategory::Generic.user_message());
                            session.record_error(self.config.limits.max_retries);
                            session.end_request(&token);
                        }
                        return;
                    }
                },
                _ = ticker.tick() => {
                    let mut session = self.session.lock();
                    if !session.is_current(&token) {
                        debug!(request_id = %token.request_id, "request superseded, task exiting");
                        return;
                    }
                    let mut sink = self.sink.lock();
                    coordinator.flush(&mut *sink);
                    let outcome =
                        coordinator.poll_timers(&mut session, &mut *sink, Instant::now());
                    if outcome == TimerOutcome::TimedOut {
                        session.end_request(&token);
                        return;
                    }
                }
            }
        }
    }

    /// Create the conversation a fresh-transcript send targets.
    async fn create_for_send(&self, token: &RequestToken, content: &str) -> Option<ConversationId> {
        let title = self.validator.derive_title(content);
        match self.backend.create_conversation(&title).await {
            Ok(summary) => {
                let mut session = self.session.lock();
                if !session.is_current(token) {
                    return None;
                }
                info!(conversation_id = %summary.id, "conversation auto-created");
                session.adopt_conversation(summary.id.clone());
                Some(summary.id)
            }
            Err(e) => {
                self.fail_request(token, &e.to_string());
                None
            }
        }
    }

    /// Pick up token patches (conversation adoption) made by the session.
    fn resync_token(&self, token: &mut RequestToken) {
        let session = self.session.lock();
        if let Some(current) = session.current_token() {
            if current.request_id == token.request_id {
                *token = current.clone();
            }
        }
    }

    /// Present a categorized failure and fold the request away.
    fn fail_request(&self, token: &RequestToken, cause: &str) {
        let mut session = self.session.lock();
        if !session.is_current(token) {
            return;
        }
        let category = ErrorCategory::categorize(cause);
        warn!(%cause, ?category, "request failed");
        self.sink
            .lock()
            .replace_live_with_notice(category.user_message());
        session.record_error(self.config.limits.max_retries);
        session.end_request(token);
    }

    /// Preload the first image, then start every deferred container in
    /// the committed reply.
    async fn post_finish(&self, reply: crate::stream::FinishedReply) {
        if reply.image_urls.is_empty() {
            return;
        }
        for url in &reply.image_urls {
            if !self.validator.validate_image_url(url).is_valid() {
                warn!(%url, "refusing to load malformed image URL");
                self.images.mark_terminal(url, ImageStatus::Failed);
            }
        }
        if let Some(first) = reply.image_urls.first() {
            self.images
                .preload(first, self.config.images.preload_timeout)
                .await;
        }
        self.activate_message_images(&[reply.message_id]);
    }

    /// Activate the lazy image containers of already-attached messages.
    fn activate_message_images(&self, ids: &[MessageId]) {
        let slots: Vec<_> = {
            let sink = self.sink.lock();
            ids.iter().flat_map(|id| sink.image_slots(id)).collect()
        };
        for slot in slots {
            let images = Arc::clone(&self.images);
            tokio::spawn(async move {
                images.activate(slot.as_ref()).await;
            });
        }
    }

    // ------------------------------------------------------------------
    // Conversation lifecycle
    // ------------------------------------------------------------------

    /// Switch the transcript to another conversation, or to a fresh
    /// unsaved one with `None`.
    ///
    /// Any in-flight request is invalidated immediately; the newest page
    /// of the target conversation is then fetched and rendered.
    pub async fn switch_conversation(
        &self,
        id: Option<ConversationId>,
    ) -> Result<(), EngineError> {
        let superseded = {
            let mut session = self.session.lock();
            let superseded = session.current_token().map(|t| t.request_id);
            session.switch_conversation(id.clone());
            superseded
        };
        // Best-effort transport teardown; the invalidated token is what
        // actually silences the old stream.
        if let Some(request_id) = superseded {
            self.tasks.abort(request_id);
        }
        self.sink.lock().clear_transcript();
        self.pager.lock().reset(None, false);

        let Some(id) = id else {
            return Ok(());
        };

        let page = self
            .backend
            .fetch_history(&id, None, self.config.history.page_size)
            .await
            .map_err(|e| {
                warn!(conversation_id = %id, error = %e, "failed to load conversation");
                EngineError::Pagination(e.to_string())
            })?;

        {
            let session = self.session.lock();
            // The user may have moved on while the page was in flight.
            if session.active_conversation() != Some(&id) {
                debug!(conversation_id = %id, "discarding page for abandoned switch");
                return Ok(());
            }
        }

        let ids: Vec<MessageId> = page.messages.iter().map(|m| m.id.clone()).collect();
        {
            let mut sink = self.sink.lock();
            sink.splice_older(&page.messages, self.config.history.stagger_step);
            sink.scroll_to_bottom();
        }
        self.pager.lock().reset(page.first_id, page.has_more);
        self.activate_message_images(&ids);
        Ok(())
    }

    /// Create a conversation with an explicit title and switch to it.
    pub async fn create_conversation(
        &self,
        title: &str,
    ) -> Result<ConversationSummary, EngineError> {
        if let ValidationResult::Invalid(reason) = self.validator.validate_title(title) {
            return Err(EngineError::Validation(reason));
        }
        let summary = self
            .backend
            .create_conversation(title.trim())
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        self.switch_conversation(Some(summary.id.clone())).await?;
        Ok(summary)
    }

    /// List the user's conversations.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, EngineError> {
        self.backend
            .list_conversations()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))
    }

    /// Rename a conversation.
    pub async fn rename_conversation(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), EngineError> {
        if let ValidationResult::Invalid(reason) = self.validator.validate_title(title) {
            return Err(EngineError::Validation(reason));
        }
        self.backend
            .rename_conversation(id, title.trim())
            .await
            .map_err(|e| EngineError::Network(e.to_string()))
    }

    /// Delete a conversation. Deleting the active one empties the
    /// transcript.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<(), EngineError> {
        self.backend
            .delete_conversation(id)
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        if self.active_conversation().as_ref() == Some(id) {
            self.switch_conversation(None).await?;
        }
        Ok(())
    }

    /// Delete every message in the active conversation, keeping the
    /// conversation itself.
    pub async fn clear_conversation(&self) -> Result<(), EngineError> {
        let Some(id) = self.active_conversation() else {
            return Ok(());
        };
        self.backend
            .clear_conversation(&id)
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        let superseded = {
            let mut session = self.session.lock();
            let superseded = session.current_token().map(|t| t.request_id);
            session.clear_conversation();
            superseded
        };
        if let Some(request_id) = superseded {
            self.tasks.abort(request_id);
        }
        self.sink.lock().clear_transcript();
        self.pager.lock().reset(None, false);
        Ok(())
    }

    /// Submit feedback on an assistant message in the active
    /// conversation.
    pub async fn submit_feedback(
        &self,
        message: &MessageId,
        feedback: FeedbackType,
    ) -> Result<(), EngineError> {
        let Some(conversation) = self.active_conversation() else {
            return Err(EngineError::Validation(
                "No active conversation".to_string(),
            ));
        };
        self.backend
            .submit_feedback(&conversation, message, feedback)
            .await
            .map_err(|e| EngineError::Network(e.to_string()))
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Load one page of older messages above the transcript.
    ///
    /// Returns `None` when nothing was started: no active conversation, a
    /// fetch already outstanding, or the history exhausted.
    pub async fn load_older(&self) -> Result<Option<LoadOutcome>, EngineError> {
        let Some(conversation) = self.active_conversation() else {
            return Ok(None);
        };
        let params = match self.pager.lock().begin() {
            Ok(params) => params,
            Err(FetchRefusal::Busy) | Err(FetchRefusal::Exhausted) => return Ok(None),
        };

        let page = match self
            .backend
            .fetch_history(&conversation, params.before.as_ref(), params.limit)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.pager.lock().fail(&e);
                return Err(EngineError::Pagination(e.to_string()));
            }
        };

        let outcome = {
            let mut sink = self.sink.lock();
            self.pager.lock().apply_page(&mut *sink, page)
        };
        if let LoadOutcome::Spliced { ids } = &outcome {
            self.activate_message_images(ids);
        }
        Ok(Some(outcome))
    }
}
