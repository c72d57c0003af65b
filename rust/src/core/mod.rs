mod config;
mod conversation;
mod grouping;
mod media;
mod merger;
pub(crate) mod paging;
mod send;
mod timeline;
mod typing;
mod unread;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use flume::Sender;

use crate::actions::AppAction;
use crate::backend::Backends;
use crate::state::{AppState, ConversationSummary, TypingMember, ViewerContext};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub(crate) use config::{load_app_config, AppConfig};

use conversation::ConversationSession;
use grouping::group_messages;

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    next_token: u64,
    local_seq: u64,
    last_outgoing_ms: i64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: AppConfig,
    runtime: tokio::runtime::Runtime,
    backends: Backends,

    viewer: Option<ViewerContext>,

    // The thread open in full-history mode (at most one per view).
    current: Option<ConversationSession>,
    // Conversations the UI asked to watch in updates-only mode, and the live
    // sessions for them. A watched id has no live session while the same
    // conversation is `current`.
    watched: BTreeSet<String>,
    watches: BTreeMap<String, ConversationSession>,
    // Unconfirmed sends of closed threads, by local id.
    parked_sends: HashMap<String, send::ParkedSend>,

    // storage path -> signed url
    attachment_urls: HashMap<String, media::CachedUrl>,
    pending_urls: HashSet<String>,
    // Not re-requested automatically; ResolveAttachmentUrl retries.
    failed_urls: HashSet<String>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        config: AppConfig,
        backends: Backends,
        shared_state: Arc<RwLock<AppState>>,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            next_token: 0,
            local_seq: 0,
            last_outgoing_ms: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            backends,
            viewer: None,
            current: None,
            watched: BTreeSet::new(),
            watches: BTreeMap::new(),
            parked_sends: HashMap::new(),
            attachment_urls: HashMap::new(),
            pending_urls: HashSet::new(),
            failed_urls: HashSet::new(),
        };

        // Ensure ChatApp::state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    /// Re-project the open thread (regroup from the timeline) and emit.
    fn emit_current_conversation(&mut self) {
        self.request_missing_attachment_urls();
        self.project_current_conversation();
        self.project_summaries();
        self.emit_state();
    }

    fn emit_summaries(&mut self) {
        self.project_summaries();
        self.emit_state();
    }

    fn emit_notification(&mut self, conversation_id: &str, message_id: &str) {
        let rev = self.next_rev();
        // Keep snapshot rev in sync with the update stream even though this is a side-effect update.
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::NotificationCue {
            rev,
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Keep toast in state until the UI explicitly clears it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn project_current_conversation(&mut self) {
        let Some(session) = self.current.as_ref() else {
            self.state.current_conversation = None;
            return;
        };
        let now = Instant::now();
        let typing_members = session
            .typing
            .active(now)
            .into_iter()
            .map(|entry| TypingMember {
                user_id: entry.user_id.clone(),
                name: session
                    .participants
                    .iter()
                    .find(|p| p.user_id == entry.user_id)
                    .map(|p| p.display_name.clone()),
            })
            .collect();
        let attachment_urls = session
            .timeline
            .messages()
            .iter()
            .filter_map(|m| m.attachment.as_ref())
            .filter_map(|a| {
                self.attachment_urls
                    .get(&a.storage_path)
                    .filter(|cached| !cached.is_expired(now))
                    .map(|cached| (a.storage_path.clone(), cached.url.clone()))
            })
            .collect();

        let mut view = session.view_skeleton();
        view.groups = group_messages(
            session.timeline.messages(),
            &session.participants,
            self.config.group_window_ms(),
        );
        view.typing_members = typing_members;
        view.attachment_urls = attachment_urls;
        self.state.current_conversation = Some(view);
    }

    fn project_summaries(&mut self) {
        let current_id = self.current.as_ref().map(|s| s.conversation_id.clone());
        let mut summaries = Vec::with_capacity(self.watched.len());
        for id in &self.watched {
            if let Some(session) = self.watches.get(id) {
                summaries.push(ConversationSummary {
                    conversation_id: id.clone(),
                    unread_messages: session.unread.ids().to_vec(),
                    unread_count: u32::try_from(session.unread.len()).unwrap_or(u32::MAX),
                    last_message: session.timeline.latest().cloned(),
                    suspended: false,
                });
            } else {
                // Open in full-history mode: everything on screen counts as read.
                let open = current_id.as_deref() == Some(id.as_str());
                summaries.push(ConversationSummary {
                    conversation_id: id.clone(),
                    unread_messages: vec![],
                    unread_count: 0,
                    last_message: self
                        .current
                        .as_ref()
                        .filter(|_| open)
                        .and_then(|s| s.timeline.latest().cloned()),
                    suspended: open,
                });
            }
        }
        self.state.summaries = summaries;
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Tag only: actions can carry message bodies and file bytes.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::SignIn { viewer } => {
                if self.viewer.as_ref().map(|v| &v.user_id) != Some(&viewer.user_id) {
                    // Different user: nothing of the previous session may leak.
                    self.teardown_all();
                    self.parked_sends.clear();
                    self.clear_attachment_urls();
                }
                tracing::info!(user_id = %viewer.user_id, role = ?viewer.role, "signed in");
                self.state.viewer = Some(viewer.clone());
                self.viewer = Some(viewer);
                self.emit_state();
            }
            AppAction::SignOut => {
                self.teardown_all();
                self.parked_sends.clear();
                self.viewer = None;
                self.state.viewer = None;
                self.state.toast = None;
                self.clear_attachment_urls();
                self.emit_current_conversation();
            }
            AppAction::Teardown => {
                self.teardown_all();
                self.emit_current_conversation();
            }
            AppAction::OpenConversation { conversation_id } => {
                self.open_conversation(&conversation_id);
            }
            AppAction::CloseConversation { conversation_id } => {
                if self.current_for(&conversation_id).is_none() {
                    tracing::debug!(%conversation_id, "close: conversation not open");
                    return;
                }
                self.close_current();
                self.emit_current_conversation();
            }
            AppAction::ReloadConversation { conversation_id } => {
                self.reload_conversation(&conversation_id);
            }
            AppAction::LoadOlderMessages { conversation_id } => {
                self.load_older_messages(&conversation_id);
            }
            AppAction::WatchConversation { conversation_id } => {
                self.watch_conversation(&conversation_id);
            }
            AppAction::UnwatchConversation { conversation_id } => {
                self.unwatch_conversation(&conversation_id);
            }
            AppAction::SendMessage {
                conversation_id,
                content,
                kind,
                attachment,
            } => {
                self.handle_send_message(&conversation_id, content, kind, attachment);
            }
            AppAction::ResendMessage {
                conversation_id,
                message_id,
            } => {
                self.handle_resend_message(&conversation_id, &message_id);
            }
            AppAction::DiscardMessage {
                conversation_id,
                message_id,
            } => {
                self.handle_discard_message(&conversation_id, &message_id);
            }
            AppAction::SetTyping {
                conversation_id,
                is_typing,
            } => {
                self.set_local_typing(&conversation_id, is_typing);
            }
            AppAction::ResolveAttachmentUrl { storage_path } => {
                self.resolve_attachment_url(&storage_path);
            }
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_state();
                }
            }
            AppAction::Foregrounded => {
                // The platform may have suspended us; the streams can have gaps.
                self.resync_all();
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::Transport { token, event } => {
                self.handle_transport_event(token, event);
            }
            InternalEvent::PageFetched {
                token,
                initial,
                result,
            } => {
                self.handle_page_fetched(token, initial, result);
            }
            InternalEvent::SendFinished {
                conversation_id,
                local_id,
                result,
            } => {
                self.handle_send_finished(&conversation_id, &local_id, result);
            }
            InternalEvent::MarkSeenFinished {
                conversation_id,
                result,
            } => match result {
                Ok(()) => tracing::debug!(%conversation_id, "mark_seen ok"),
                Err(e) => tracing::warn!(%conversation_id, %e, "mark_seen failed"),
            },
            InternalEvent::AttachmentUrlResolved {
                storage_path,
                result,
            } => {
                self.handle_attachment_url_resolved(storage_path, result);
            }
            InternalEvent::TypingExpired {
                token,
                user_id,
                generation,
            } => {
                let expired = self
                    .current
                    .as_mut()
                    .filter(|s| s.token == token)
                    .map(|s| s.typing.expire(&user_id, generation))
                    .unwrap_or(false);
                if expired {
                    tracing::debug!(%user_id, "typing expired");
                    self.emit_current_conversation();
                }
            }
            InternalEvent::TypingIdle { token, generation } => {
                self.handle_typing_idle(token, generation);
            }
        }
    }

    /// Drop every subscription, timer and session.
    fn teardown_all(&mut self) {
        self.close_current();
        let watches = std::mem::take(&mut self.watches);
        for (_, mut session) in watches {
            self.teardown_session(&mut session);
        }
        self.watched.clear();
        self.state.current_conversation = None;
        self.state.summaries = vec![];
    }
}
