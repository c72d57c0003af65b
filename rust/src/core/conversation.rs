// Conversation sessions: subscription lifecycle, history fetches and the
// realtime receive path for both read modes.

use std::collections::HashMap;
use std::time::Instant;

use flume::Receiver;
use tokio::task::AbortHandle;

use crate::backend::{Page, PageRequest, SubscriptionHandle, Topic, TransportEvent};
use crate::error::EngineError;
use crate::state::{ConversationStatus, ConversationViewState, Participant, ViewerContext};
use crate::updates::{CoreMsg, InternalEvent};

use super::config::AppConfig;
use super::merger::{merge_event, MergeTarget, MessageEvent};
use super::paging::PaginationCursor;
use super::send::OutgoingDraft;
use super::timeline::Timeline;
use super::typing::{PresenceChange, TypingDebounce, TypingTracker};
use super::unread::{ReadMode, UnreadSet};
use super::AppCore;

#[derive(Debug)]
pub(super) struct LiveSubscription {
    handle: SubscriptionHandle,
    topic: Topic,
    forwarder: AbortHandle,
}

/// Everything one `(conversation, mode)` subscription owns. Dropped as a
/// whole when the conversation identity changes.
#[derive(Debug)]
pub(super) struct ConversationSession {
    /// Identifies this session in async results and transport events.
    pub token: u64,
    pub conversation_id: String,
    pub mode: ReadMode,
    pub timeline: Timeline,
    pub unread: UnreadSet,
    pub participants: Vec<Participant>,
    pub status: ConversationStatus,
    pub cursor: PaginationCursor,
    pub subscriptions: Vec<LiveSubscription>,
    pub typing: TypingTracker,
    pub debounce: TypingDebounce,
    pub loading: bool,
    pub loading_older: bool,
    pub load_error: Option<String>,
    pub anchor_epoch: u64,
    pub stale: bool,
    /// Failed or in-flight sends by local id, kept for resend.
    pub outbox: HashMap<String, OutgoingDraft>,
}

impl ConversationSession {
    pub(super) fn new(
        token: u64,
        conversation_id: &str,
        mode: ReadMode,
        config: &AppConfig,
        viewer: &ViewerContext,
    ) -> Self {
        let mut session = Self {
            token,
            conversation_id: conversation_id.to_string(),
            mode,
            timeline: Timeline::new(),
            unread: UnreadSet::new(),
            participants: vec![],
            status: ConversationStatus::Active,
            cursor: PaginationCursor::new(),
            subscriptions: vec![],
            typing: TypingTracker::new(config.typing_ttl()),
            debounce: TypingDebounce::new(config.typing_idle()),
            loading: mode == ReadMode::FullHistory,
            loading_older: false,
            load_error: None,
            anchor_epoch: 0,
            stale: false,
            outbox: HashMap::new(),
        };
        // Own optimistic sends must group even before the first page lands.
        session.merge_participants(vec![Participant {
            user_id: viewer.user_id.clone(),
            display_name: viewer.display_name.clone(),
            role: viewer.role,
            avatar_url: None,
        }]);
        session
    }

    /// Participants are unique by id; fresher snapshots replace older ones.
    pub(super) fn merge_participants(&mut self, incoming: Vec<Participant>) {
        for p in incoming {
            match self.participants.iter_mut().find(|e| e.user_id == p.user_id) {
                Some(existing) => *existing = p,
                None => self.participants.push(p),
            }
        }
    }

    /// View fields that don't need grouping or the shared url cache.
    pub(super) fn view_skeleton(&self) -> ConversationViewState {
        let mut view = ConversationViewState::loading(&self.conversation_id);
        view.status = self.status;
        view.participants = self.participants.clone();
        view.last_message = self.timeline.latest().cloned();
        view.has_more = self.cursor.has_more();
        view.loading = self.loading;
        view.loading_older = self.loading_older;
        view.load_error = self.load_error.clone();
        view.anchor_epoch = self.anchor_epoch;
        view
    }
}

impl AppCore {
    pub(super) fn session_mut(&mut self, token: u64) -> Option<&mut ConversationSession> {
        if let Some(session) = self.current.as_mut().filter(|s| s.token == token) {
            return Some(session);
        }
        self.watches.values_mut().find(|s| s.token == token)
    }

    pub(super) fn is_current_token(&self, token: u64) -> bool {
        self.current.as_ref().is_some_and(|s| s.token == token)
    }

    /// The open thread, if it is `conversation_id`.
    pub(super) fn current_for(&mut self, conversation_id: &str) -> Option<&mut ConversationSession> {
        self.current
            .as_mut()
            .filter(|s| s.conversation_id == conversation_id)
    }

    fn emit_for_token(&mut self, token: u64) {
        if self.is_current_token(token) {
            self.emit_current_conversation();
        } else {
            self.emit_summaries();
        }
    }

    pub(super) fn open_conversation(&mut self, conversation_id: &str) {
        let Some(viewer) = self.viewer.clone() else {
            self.toast(EngineError::AuthenticationRequired.user_visible_message());
            return;
        };
        if self
            .current
            .as_ref()
            .is_some_and(|s| s.conversation_id == conversation_id)
        {
            return;
        }

        // The previous thread's timers and streams are gone before anything
        // of the new one exists.
        self.close_current();
        if let Some(mut watch) = self.watches.remove(conversation_id) {
            // Never both modes for one conversation.
            self.teardown_session(&mut watch);
            tracing::debug!(conversation_id, "summary watch suspended");
        }

        let token = self.next_token();
        let mut session = ConversationSession::new(
            token,
            conversation_id,
            ReadMode::FullHistory,
            &self.config,
            &viewer,
        );
        self.restore_parked(&mut session);
        let request = match self.subscribe_session(&mut session) {
            Ok(()) => Some(
                session
                    .cursor
                    .initial_request(conversation_id, self.page_size()),
            ),
            Err(e) => {
                tracing::warn!(conversation_id, %e, "subscription setup failed");
                session.loading = false;
                session.load_error = Some(e.user_visible_message());
                None
            }
        };
        tracing::info!(conversation_id, token, "conversation opened");
        self.current = Some(session);
        if let Some(request) = request {
            self.spawn_page_fetch(token, request);
        }
        self.emit_current_conversation();
    }

    /// Tear down the open thread and hand the conversation back to its
    /// summary watch, if any.
    pub(super) fn close_current(&mut self) {
        let Some(mut session) = self.current.take() else {
            return;
        };
        self.teardown_session(&mut session);
        self.park_outbox(&mut session);
        tracing::info!(conversation_id = %session.conversation_id, "conversation closed");
        if self.watched.contains(&session.conversation_id) {
            self.start_watch(&session.conversation_id);
        }
    }

    /// Retry after a conversation-level failure: fresh cursor, and fresh
    /// subscriptions if setting them up failed.
    pub(super) fn reload_conversation(&mut self, conversation_id: &str) {
        if self.current_for(conversation_id).is_none() {
            self.open_conversation(conversation_id);
            return;
        }
        let Some(mut session) = self.current.take() else {
            return;
        };
        if session.subscriptions.is_empty() {
            if let Err(e) = self.subscribe_session(&mut session) {
                tracing::warn!(conversation_id, %e, "subscription setup failed");
                session.load_error = Some(e.user_visible_message());
                self.current = Some(session);
                self.emit_current_conversation();
                return;
            }
        }
        session.cursor = PaginationCursor::new();
        session.load_error = None;
        session.loading = true;
        session.loading_older = false;
        session.stale = false;
        let request = session
            .cursor
            .initial_request(conversation_id, self.page_size());
        let token = session.token;
        self.current = Some(session);
        self.spawn_page_fetch(token, request);
        self.emit_current_conversation();
    }

    pub(super) fn load_older_messages(&mut self, conversation_id: &str) {
        let limit = self.page_size();
        let Some(session) = self.current_for(conversation_id) else {
            tracing::debug!(conversation_id, "load older: conversation not open");
            return;
        };
        let Some(request) = session.cursor.older_request(conversation_id, limit) else {
            tracing::debug!(
                conversation_id,
                has_more = session.cursor.has_more(),
                in_flight = session.cursor.in_flight(),
                "load older: nothing to fetch"
            );
            return;
        };
        session.loading_older = true;
        let token = session.token;
        self.spawn_page_fetch(token, request);
        self.emit_current_conversation();
    }

    pub(super) fn watch_conversation(&mut self, conversation_id: &str) {
        if self.viewer.is_none() {
            self.toast(EngineError::AuthenticationRequired.user_visible_message());
            return;
        }
        if !self.watched.insert(conversation_id.to_string()) {
            return;
        }
        let open = self
            .current
            .as_ref()
            .is_some_and(|s| s.conversation_id == conversation_id);
        if !open {
            self.start_watch(conversation_id);
        }
        self.emit_summaries();
    }

    pub(super) fn unwatch_conversation(&mut self, conversation_id: &str) {
        if !self.watched.remove(conversation_id) {
            return;
        }
        if let Some(mut session) = self.watches.remove(conversation_id) {
            self.teardown_session(&mut session);
        }
        self.emit_summaries();
    }

    /// Summary watches start from an empty unread set; only live events
    /// (and reconnect refetches) move it.
    fn start_watch(&mut self, conversation_id: &str) {
        let Some(viewer) = self.viewer.clone() else {
            return;
        };
        let token = self.next_token();
        let mut session = ConversationSession::new(
            token,
            conversation_id,
            ReadMode::UpdatesOnly,
            &self.config,
            &viewer,
        );
        match self.subscribe_session(&mut session) {
            Ok(()) => {
                tracing::debug!(conversation_id, token, "summary watch started");
                self.watches.insert(conversation_id.to_string(), session);
            }
            Err(e) => {
                // Retried on the next foreground.
                tracing::warn!(conversation_id, %e, "summary watch subscription failed");
            }
        }
    }

    fn subscribe_session(&self, session: &mut ConversationSession) -> Result<(), EngineError> {
        let id = session.conversation_id.as_str();
        let topics = match session.mode {
            ReadMode::FullHistory => vec![Topic::messages(id), Topic::presence(id)],
            // Inbox rows don't show typing.
            ReadMode::UpdatesOnly => vec![Topic::messages(id)],
        };
        for topic in topics {
            match self.backends.transport.subscribe(&topic) {
                Ok(sub) => {
                    let forwarder = self.spawn_forwarder(session.token, &topic, sub.events);
                    tracing::debug!(%topic, token = session.token, mode = session.mode.tag(), "subscribed");
                    session.subscriptions.push(LiveSubscription {
                        handle: sub.handle,
                        topic,
                        forwarder,
                    });
                }
                Err(e) => {
                    self.unsubscribe_all(session);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn spawn_forwarder(
        &self,
        token: u64,
        topic: &Topic,
        events: Receiver<TransportEvent>,
    ) -> AbortHandle {
        let tx = self.core_sender.clone();
        let presence = matches!(topic, Topic::Presence { .. });
        self.runtime
            .spawn(async move {
                while let Ok(event) = events.recv_async().await {
                    // Connection state is tracked on the message stream only.
                    if presence
                        && matches!(
                            event,
                            TransportEvent::Disconnected | TransportEvent::Reconnected
                        )
                    {
                        continue;
                    }
                    let msg = CoreMsg::Internal(Box::new(InternalEvent::Transport { token, event }));
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
            })
            .abort_handle()
    }

    fn unsubscribe_all(&self, session: &mut ConversationSession) {
        for sub in session.subscriptions.drain(..) {
            sub.forwarder.abort();
            self.backends.transport.unsubscribe(sub.handle);
            tracing::debug!(topic = %sub.topic, "unsubscribed");
        }
    }

    /// Synchronously cancel everything the session owns.
    pub(super) fn teardown_session(&self, session: &mut ConversationSession) {
        self.unsubscribe_all(session);
        session.typing.dispose();
        if session.debounce.stop() {
            if let Some(viewer) = self.viewer.as_ref() {
                self.publish_typing(&session.conversation_id, &viewer.user_id, false);
            }
        }
    }

    pub(super) fn spawn_page_fetch(&self, token: u64, request: PageRequest) {
        let store = self.backends.store.clone();
        let tx = self.core_sender.clone();
        let initial = request.initial;
        tracing::debug!(
            conversation_id = %request.conversation_id,
            initial,
            limit = request.limit,
            "fetch page"
        );
        self.runtime.spawn_blocking(move || {
            let result = store.fetch_page(request).map_err(EngineError::from);
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PageFetched {
                token,
                initial,
                result,
            })));
        });
    }

    fn request_mark_seen(&self, conversation_id: &str) {
        let Some(viewer_id) = self.viewer.as_ref().map(|v| v.user_id.clone()) else {
            return;
        };
        let store = self.backends.store.clone();
        let tx = self.core_sender.clone();
        let conversation_id = conversation_id.to_string();
        self.runtime.spawn_blocking(move || {
            let result = store
                .mark_seen(&conversation_id, &viewer_id)
                .map_err(EngineError::from);
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MarkSeenFinished {
                conversation_id,
                result,
            })));
        });
    }

    pub(super) fn handle_page_fetched(
        &mut self,
        token: u64,
        initial: bool,
        result: Result<Page, EngineError>,
    ) {
        let Some(viewer_id) = self.viewer.as_ref().map(|v| v.user_id.clone()) else {
            return;
        };
        let Some(session) = self.session_mut(token) else {
            tracing::debug!(token, initial, "page for closed session dropped");
            return;
        };

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                let conversation_id = session.conversation_id.clone();
                if !initial {
                    session.cursor.fetch_failed();
                    session.loading_older = false;
                    tracing::warn!(%conversation_id, %e, "older page fetch failed");
                    let msg = e.user_visible_message();
                    self.project_current_conversation();
                    self.toast(msg);
                    return;
                }
                if session.mode == ReadMode::FullHistory && !session.cursor.loaded_initial() {
                    session.cursor.fetch_failed();
                    session.loading = false;
                    session.load_error = Some(e.user_visible_message());
                    tracing::warn!(%conversation_id, %e, "initial page fetch failed");
                    self.emit_for_token(token);
                } else {
                    // Stays stale; the next reconnect or foreground retries.
                    tracing::warn!(%conversation_id, %e, "refetch after reconnect failed");
                }
                return;
            }
        };

        session.merge_participants(page.participants);
        if let Some(status) = page.status {
            session.status = status;
        }

        let mut mark_seen = false;
        match session.mode {
            ReadMode::FullHistory if initial => {
                if !session.cursor.loaded_initial() {
                    session.cursor.advance(true, page.next_cursor);
                } else {
                    // Refetch after reconnect. If the page overlaps what is
                    // loaded the backward cursor stays valid; otherwise more
                    // than a page was missed and paging resumes below it.
                    let overlaps = page
                        .messages
                        .iter()
                        .any(|m| session.timeline.contains(&m.id));
                    if let (false, Some(next)) = (overlaps, page.next_cursor) {
                        tracing::info!(conversation_id = %session.conversation_id, "history gap after reconnect");
                        session.cursor.rewind(next);
                    }
                }
                session.loading = false;
                session.load_error = None;
                session.stale = false;
                let added = session.timeline.merge_page(page.messages);
                mark_seen = session.timeline.has_unseen_from_others(&viewer_id);
                tracing::debug!(conversation_id = %session.conversation_id, added, "latest page merged");
            }
            ReadMode::FullHistory => {
                let added = session.timeline.merge_page(page.messages);
                session.cursor.advance(false, page.next_cursor);
                session.loading_older = false;
                session.anchor_epoch += 1;
                mark_seen = session.timeline.has_unseen_from_others(&viewer_id);
                tracing::debug!(conversation_id = %session.conversation_id, added, "older page merged");
            }
            ReadMode::UpdatesOnly => {
                session.stale = false;
                session.unread.reconcile_page(&page.messages, &viewer_id);
                session.timeline.merge_page(page.messages);
            }
        }

        let conversation_id = session.conversation_id.clone();
        if mark_seen {
            self.request_mark_seen(&conversation_id);
        }
        self.emit_for_token(token);
    }

    pub(super) fn handle_transport_event(&mut self, token: u64, event: TransportEvent) {
        let Some(viewer_id) = self.viewer.as_ref().map(|v| v.user_id.clone()) else {
            return;
        };
        if self.session_mut(token).is_none() {
            tracing::debug!(token, event = event.tag(), "event for closed session dropped");
            return;
        }

        match event {
            TransportEvent::Insert(msg) => {
                self.apply_message_event(token, &viewer_id, MessageEvent::Insert(msg));
            }
            TransportEvent::Update(msg) => {
                self.apply_message_event(token, &viewer_id, MessageEvent::Update(msg));
            }
            TransportEvent::Presence { user_id, is_typing } => {
                self.apply_presence(token, &viewer_id, &user_id, is_typing);
            }
            TransportEvent::Disconnected => {
                if let Some(session) = self.session_mut(token) {
                    session.stale = true;
                    let err = EngineError::StaleSubscription(session.conversation_id.clone());
                    tracing::warn!(%err, "transport disconnected");
                }
            }
            TransportEvent::Reconnected => {
                tracing::info!(token, "transport reconnected");
                self.resync_session(token);
            }
        }
    }

    fn apply_message_event(&mut self, token: u64, viewer_id: &str, event: MessageEvent) {
        let Some(session) = self.session_mut(token) else {
            return;
        };
        let outcome = merge_event(
            MergeTarget {
                conversation_id: &session.conversation_id,
                viewer_id,
                mode: session.mode,
                timeline: &mut session.timeline,
                unread: &mut session.unread,
            },
            event,
        );
        if let Some(id) = outcome.appended.as_deref() {
            // Their message is out; they stopped typing it.
            if let Some(sender) = session.timeline.get(id).map(|m| m.sender_id.clone()) {
                session.typing.clear_user(&sender);
            }
        }
        let conversation_id = session.conversation_id.clone();
        if outcome.mark_seen {
            self.request_mark_seen(&conversation_id);
        }
        if outcome.changed {
            self.emit_for_token(token);
        }
        if let Some(id) = outcome.appended {
            self.emit_notification(&conversation_id, &id);
        }
    }

    fn apply_presence(&mut self, token: u64, viewer_id: &str, user_id: &str, is_typing: bool) {
        let Some(session) = self.session_mut(token) else {
            return;
        };
        let change = session
            .typing
            .observe(user_id, is_typing, viewer_id, Instant::now());
        match change {
            PresenceChange::Armed { generation } => {
                let ttl = session.typing.ttl();
                let handle = self.spawn_typing_expiry(token, user_id, generation, ttl);
                if let Some(session) = self.session_mut(token) {
                    session.typing.attach_timer(user_id, generation, handle);
                }
                self.emit_for_token(token);
            }
            PresenceChange::Removed => self.emit_for_token(token),
            PresenceChange::Unchanged => {}
        }
    }

    /// Missed events can't be recovered from the stream; refetch the latest
    /// page and reconcile instead.
    fn resync_session(&mut self, token: u64) {
        let limit = self.page_size();
        let Some(session) = self.session_mut(token) else {
            return;
        };
        session.stale = true;
        let request = PageRequest {
            conversation_id: session.conversation_id.clone(),
            cursor: None,
            limit,
            initial: true,
        };
        self.spawn_page_fetch(token, request);
    }

    pub(super) fn resync_all(&mut self) {
        if self.viewer.is_none() {
            return;
        }
        let mut tokens: Vec<u64> = self.watches.values().map(|s| s.token).collect();
        if let Some(session) = self.current.as_ref() {
            if session.subscriptions.is_empty() {
                // Setup failed earlier; the user retries via reload.
                tracing::debug!(conversation_id = %session.conversation_id, "skip resync without subscriptions");
            } else if session.cursor.loaded_initial() {
                tokens.push(session.token);
            }
        }
        for token in tokens {
            self.resync_session(token);
        }

        // Watches whose subscription failed earlier.
        let open = self.current.as_ref().map(|s| s.conversation_id.clone());
        let missing: Vec<String> = self
            .watched
            .iter()
            .filter(|id| !self.watches.contains_key(*id) && open.as_deref() != Some(id.as_str()))
            .cloned()
            .collect();
        for id in missing {
            self.start_watch(&id);
        }
        self.emit_summaries();
    }

    fn spawn_typing_expiry(
        &self,
        token: u64,
        user_id: &str,
        generation: u64,
        ttl: std::time::Duration,
    ) -> AbortHandle {
        let tx = self.core_sender.clone();
        let user_id = user_id.to_string();
        self.runtime
            .spawn(async move {
                tokio::time::sleep(ttl).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::TypingExpired {
                    token,
                    user_id,
                    generation,
                })));
            })
            .abort_handle()
    }

    pub(super) fn set_local_typing(&mut self, conversation_id: &str, is_typing: bool) {
        let Some(user_id) = self.viewer.as_ref().map(|v| v.user_id.clone()) else {
            return;
        };
        let Some(session) = self.current_for(conversation_id) else {
            tracing::debug!(conversation_id, "typing for a conversation that is not open");
            return;
        };
        let token = session.token;
        if !is_typing {
            if session.debounce.stop() {
                self.publish_typing(conversation_id, &user_id, false);
            }
            return;
        }

        let keystroke = session.debounce.keystroke();
        let idle = session.debounce.idle();
        if keystroke.publish_start {
            self.publish_typing(conversation_id, &user_id, true);
        }
        let tx = self.core_sender.clone();
        let generation = keystroke.generation;
        let handle = self
            .runtime
            .spawn(async move {
                tokio::time::sleep(idle).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::TypingIdle {
                    token,
                    generation,
                })));
            })
            .abort_handle();
        if let Some(session) = self.current_for(conversation_id) {
            session.debounce.attach_timer(generation, handle);
        }
    }

    pub(super) fn handle_typing_idle(&mut self, token: u64, generation: u64) {
        let Some(user_id) = self.viewer.as_ref().map(|v| v.user_id.clone()) else {
            return;
        };
        let Some(session) = self.current.as_mut().filter(|s| s.token == token) else {
            return;
        };
        if session.debounce.idle_elapsed(generation) {
            let conversation_id = session.conversation_id.clone();
            self.publish_typing(&conversation_id, &user_id, false);
        }
    }

    pub(super) fn publish_typing(&self, conversation_id: &str, user_id: &str, is_typing: bool) {
        let transport = self.backends.transport.clone();
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        self.runtime.spawn_blocking(move || {
            if let Err(e) = transport.publish_presence(&conversation_id, &user_id, is_typing) {
                tracing::warn!(%conversation_id, is_typing, %e, "typing publish failed");
            }
        });
    }
}
